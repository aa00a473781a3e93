//! Evaluate, dispatch and resolve in one call.
//!
//! Triggered decisions become notifications for the [`Dispatcher`];
//! conclusive non-triggering decisions count as green evaluations for the
//! [`IncidentResolver`]. Decisions that could not be computed (empty or
//! non-finite series, insufficient history, provider failures) do neither.

use std::sync::Arc;

use tracing::debug;
use tripwire_ledger::Ledger;

use crate::clock::SharedClock;
use crate::config::TripwireConfig;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::engine::{is_inconclusive, DataProvider, EvaluationEngine, RuleEvaluation};
use crate::error::Result;
use crate::incident::Incident;
use crate::notification::Notification;
use crate::resolver::IncidentResolver;
use crate::types::{Decision, Rule};

/// What the pipeline did with one rule.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// The rule triggered and went through the dispatcher.
    Triggered {
        /// The evaluation result.
        decision: Decision,
        /// The dispatcher's verdict.
        dispatch: DispatchOutcome,
    },
    /// The rule did not trigger; its incidents were credited a green evaluation.
    Green {
        /// The evaluation result.
        decision: Decision,
        /// Incidents this evaluation auto-resolved.
        auto_resolved: Vec<Incident>,
    },
    /// The rule could not be evaluated.
    Inconclusive {
        /// The rejection decision.
        decision: Decision,
    },
    /// The rule is disabled.
    Skipped {
        /// The short-circuit decision.
        decision: Decision,
    },
}

impl PipelineOutcome {
    /// The decision behind this outcome.
    #[must_use]
    pub const fn decision(&self) -> &Decision {
        match self {
            Self::Triggered { decision, .. }
            | Self::Green { decision, .. }
            | Self::Inconclusive { decision }
            | Self::Skipped { decision } => decision,
        }
    }
}

/// Engine, dispatcher and resolver sharing one clock and one ledger.
#[derive(Debug)]
pub struct Pipeline {
    engine: EvaluationEngine,
    dispatcher: Dispatcher,
    resolver: IncidentResolver,
}

impl Pipeline {
    /// Assembles a pipeline from existing parts.
    #[must_use]
    pub const fn new(
        engine: EvaluationEngine,
        dispatcher: Dispatcher,
        resolver: IncidentResolver,
    ) -> Self {
        Self {
            engine,
            dispatcher,
            resolver,
        }
    }

    /// Opens the ledger named by `config` and builds every part around it.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the ledger
    /// cannot be opened or replayed.
    pub fn open(config: &TripwireConfig, clock: SharedClock) -> Result<Self> {
        config.validate()?;
        let ledger = Arc::new(Ledger::open(config.ledger.ledger_config())?);
        let engine = EvaluationEngine::new(Arc::clone(&clock));
        let dispatcher = Dispatcher::new(
            config.dispatcher.clone(),
            Arc::clone(&clock),
            Arc::clone(&ledger),
        )?;
        let resolver = IncidentResolver::new(config.resolver, clock, ledger)?;
        Ok(Self::new(engine, dispatcher, resolver))
    }

    /// The evaluation engine.
    #[must_use]
    pub const fn engine(&self) -> &EvaluationEngine {
        &self.engine
    }

    /// The dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The resolver.
    #[must_use]
    pub const fn resolver(&self) -> &IncidentResolver {
        &self.resolver
    }

    /// Evaluates `rule` against `series` and routes the decision.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Ledger` if a ledger read or write fails.
    pub fn process(
        &self,
        rule: &Rule,
        series: &[f64],
        periods: Option<&[String]>,
    ) -> Result<PipelineOutcome> {
        if !rule.enabled() {
            let decision =
                Decision::rejected(rule.rule_id(), "Rule disabled", self.engine.clock().now());
            return Ok(PipelineOutcome::Skipped { decision });
        }
        let decision = self.engine.evaluate(rule, series, periods);
        self.route(rule, decision)
    }

    /// Runs every rule with series from `provider`, in order.
    ///
    /// # Errors
    ///
    /// Stops at the first ledger failure.
    pub fn process_batch<P>(&self, rules: &[Rule], provider: &P) -> Result<Vec<PipelineOutcome>>
    where
        P: DataProvider + ?Sized,
    {
        rules
            .iter()
            .map(|rule| match self.engine.evaluate_enabled(rule, provider) {
                RuleEvaluation::Disabled(decision) => Ok(PipelineOutcome::Skipped { decision }),
                RuleEvaluation::Failed(decision) => Ok(PipelineOutcome::Inconclusive { decision }),
                RuleEvaluation::Evaluated(decision) => self.route(rule, decision),
            })
            .collect()
    }

    fn route(&self, rule: &Rule, decision: Decision) -> Result<PipelineOutcome> {
        if decision.triggered {
            let notification = Notification::from_decision(
                rule,
                &decision,
                &self.dispatcher.config().default_channels,
            );
            let dispatch = self.dispatcher.dispatch(&notification)?;
            return Ok(PipelineOutcome::Triggered { decision, dispatch });
        }

        if is_inconclusive(&decision) {
            debug!(
                rule_id = %rule.rule_id(),
                message = %decision.message,
                "inconclusive evaluation"
            );
            return Ok(PipelineOutcome::Inconclusive { decision });
        }

        let auto_resolved = self.resolver.record_green_evaluation(rule.rule_id())?;
        Ok(PipelineOutcome::Green {
            decision,
            auto_resolved,
        })
    }
}
