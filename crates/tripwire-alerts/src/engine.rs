//! Evaluation engine.
//!
//! Enforces series-level preconditions, clamps rate metrics, dispatches to
//! the trigger evaluators and stamps the result with the clock. Every call
//! yields a [`Decision`]; nothing here returns an error to the caller.

use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::error::Result;
use crate::evaluators::{evaluate_trigger, Assessment, INCONCLUSIVE_KEY};
use crate::types::{Decision, Evidence, Rule};

/// An ordered numeric series with optional period labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesData {
    /// Values sorted ascending by period; the last is the most recent.
    pub values: Vec<f64>,
    /// Period labels aligned with `values` (may be empty).
    pub periods: Vec<String>,
}

impl SeriesData {
    /// Values without labels.
    #[must_use]
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values,
            periods: Vec::new(),
        }
    }

    /// Attaches period labels.
    #[must_use]
    pub fn with_periods<S: Into<String>>(mut self, periods: impl IntoIterator<Item = S>) -> Self {
        self.periods = periods.into_iter().map(Into::into).collect();
        self
    }

    fn periods(&self) -> Option<&[String]> {
        if self.periods.is_empty() {
            None
        } else {
            Some(self.periods.as_slice())
        }
    }
}

/// Supplies the series for a rule.
pub trait DataProvider {
    /// Returns the series for `rule`.
    ///
    /// # Errors
    ///
    /// Any error; the batch converts it into a non-triggering decision.
    fn fetch(&self, rule: &Rule) -> Result<SeriesData>;
}

impl<F> DataProvider for F
where
    F: Fn(&Rule) -> Result<SeriesData>,
{
    fn fetch(&self, rule: &Rule) -> Result<SeriesData> {
        self(rule)
    }
}

/// Result of a batch evaluation.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// One decision per rule, in input order.
    pub decisions: Vec<Decision>,
    /// Number of triggered decisions.
    pub triggered: usize,
    /// Number of rules whose data could not be fetched.
    pub failed: usize,
    /// Number of disabled rules.
    pub skipped: usize,
}

impl BatchOutcome {
    /// Iterates the triggered decisions.
    pub fn triggered_decisions(&self) -> impl Iterator<Item = &Decision> {
        self.decisions.iter().filter(|d| d.triggered)
    }
}

/// Returns true if the decision carries the inconclusive marker.
#[must_use]
pub fn is_inconclusive(decision: &Decision) -> bool {
    decision
        .evidence
        .get(INCONCLUSIVE_KEY)
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
}

/// Clamps every value to `[0, 1]`, returning the clamped series and how many
/// values changed.
#[must_use]
pub fn clamp_unit_interval(series: &[f64]) -> (Vec<f64>, usize) {
    let mut changed = 0;
    let clamped = series
        .iter()
        .map(|&v| {
            let c = v.clamp(0.0, 1.0);
            if c != v {
                changed += 1;
            }
            c
        })
        .collect();
    (clamped, changed)
}

/// Turns rules and series into decisions.
#[derive(Debug, Clone)]
pub struct EvaluationEngine {
    clock: SharedClock,
}

impl EvaluationEngine {
    /// Creates an engine that stamps decisions with `clock`.
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self { clock }
    }

    /// The engine's clock.
    #[must_use]
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Evaluates `rule` against `series`.
    ///
    /// `periods`, when given and aligned with `series`, labels the window
    /// the decision covers.
    #[must_use]
    pub fn evaluate(&self, rule: &Rule, series: &[f64], periods: Option<&[String]>) -> Decision {
        let timestamp = self.clock.now();
        let rule_id = rule.rule_id();

        if series.is_empty() {
            debug!(rule_id = %rule_id, "rejecting empty series");
            return Decision::rejected(rule_id, "Empty series", timestamp)
                .with_evidence(Evidence::new().with(INCONCLUSIVE_KEY, true));
        }

        if let Some(index) = series.iter().position(|v| !v.is_finite()) {
            let count = series.iter().filter(|v| !v.is_finite()).count();
            debug!(rule_id = %rule_id, index, count, "rejecting non-finite series");
            return Decision::rejected(
                rule_id,
                format!("Series contains {count} non-finite value(s), first at index {index}"),
                timestamp,
            )
            .with_evidence(
                Evidence::new()
                    .with(INCONCLUSIVE_KEY, true)
                    .with("non_finite_count", count)
                    .with("first_non_finite_index", index),
            );
        }

        let assessment = if rule.is_rate_metric() {
            let (clamped, changed) = clamp_unit_interval(series);
            let mut assessment = evaluate_trigger(rule, &clamped);
            if changed > 0 {
                assessment.evidence.insert("clamped_points", changed);
            }
            assessment
        } else {
            evaluate_trigger(rule, series)
        };

        let Assessment {
            triggered,
            evidence,
            message,
        } = assessment;

        debug!(
            rule_id = %rule_id,
            trigger = rule.trigger().kind(),
            triggered,
            "evaluated rule"
        );

        let decision =
            Decision::new(rule_id, triggered, message, timestamp).with_evidence(evidence);
        match window_labels(rule, series.len(), periods) {
            Some((start, end)) => decision.with_window(start, end),
            None => decision,
        }
    }

    /// Evaluates every rule with series from `provider`.
    ///
    /// Disabled rules and provider failures yield non-triggering decisions;
    /// the batch always covers every rule.
    pub fn evaluate_batch<P>(&self, rules: &[Rule], provider: &P) -> BatchOutcome
    where
        P: DataProvider + ?Sized,
    {
        let mut outcome = BatchOutcome::default();

        for rule in rules {
            let decision = match self.evaluate_enabled(rule, provider) {
                RuleEvaluation::Disabled(decision) => {
                    outcome.skipped += 1;
                    decision
                }
                RuleEvaluation::Failed(decision) => {
                    outcome.failed += 1;
                    decision
                }
                RuleEvaluation::Evaluated(decision) => {
                    if decision.triggered {
                        outcome.triggered += 1;
                    }
                    decision
                }
            };
            outcome.decisions.push(decision);
        }

        debug!(
            rules = rules.len(),
            triggered = outcome.triggered,
            failed = outcome.failed,
            skipped = outcome.skipped,
            "batch evaluation complete"
        );
        outcome
    }

    /// Evaluates one rule with series from `provider`, honouring `enabled`.
    pub(crate) fn evaluate_enabled<P>(&self, rule: &Rule, provider: &P) -> RuleEvaluation
    where
        P: DataProvider + ?Sized,
    {
        if !rule.enabled() {
            return RuleEvaluation::Disabled(Decision::rejected(
                rule.rule_id(),
                "Rule disabled",
                self.clock.now(),
            ));
        }

        match provider.fetch(rule) {
            Ok(data) => {
                RuleEvaluation::Evaluated(self.evaluate(rule, &data.values, data.periods()))
            }
            Err(e) => {
                warn!(rule_id = %rule.rule_id(), error = %e, "failed to fetch series");
                RuleEvaluation::Failed(
                    Decision::rejected(
                        rule.rule_id(),
                        format!("Evaluation failed: {e}"),
                        self.clock.now(),
                    )
                    .with_evidence(
                        Evidence::new()
                            .with(INCONCLUSIVE_KEY, true)
                            .with("error", e.to_string()),
                    ),
                )
            }
        }
    }
}

/// How a single rule in a batch was handled.
#[derive(Debug, Clone)]
pub(crate) enum RuleEvaluation {
    Disabled(Decision),
    Failed(Decision),
    Evaluated(Decision),
}

/// Labels of the first and last evaluated points.
fn window_labels(rule: &Rule, len: usize, periods: Option<&[String]>) -> Option<(String, String)> {
    let periods = periods?;
    if periods.len() != len {
        debug!(
            rule_id = %rule.rule_id(),
            values = len,
            periods = periods.len(),
            "ignoring misaligned period labels"
        );
        return None;
    }
    let start = len.saturating_sub(rule.window().len());
    Some((periods[start].clone(), periods[len - 1].clone()))
}
