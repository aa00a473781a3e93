//! Core types for the alerting core.
//!
//! This module provides the data model shared by the engine, dispatcher and
//! resolver:
//! - [`Severity`]: The severity level of a rule
//! - [`ComparisonOperator`]: Operators for comparing values to thresholds
//! - [`Scope`]: The aggregation level a rule monitors
//! - [`Trigger`]: One case per trigger kind, carrying only its own fields
//! - [`Rule`]: A validated, immutable monitored condition
//! - [`Evidence`] and [`Decision`]: The result of evaluating a rule

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AlertError, Result};

/// Tolerance used by [`ComparisonOperator::Eq`].
pub const EQ_TOLERANCE: f64 = 1e-9;

/// Metrics a rule may monitor.
pub const ALLOWED_METRICS: &[&str] = &[
    "employment",
    "unemployment_rate",
    "labor_force_participation_rate",
    "job_openings",
    "job_openings_rate",
    "hires",
    "hires_rate",
    "quits_rate",
    "layoffs",
    "separations_rate",
    "median_wage",
    "wage_growth_pct",
    "retention",
    "error_budget_burn",
];

/// Tokens that mark a metric as a bounded rate in `[0, 1]`.
pub const RATE_TOKENS: &[&str] = &["rate", "ratio", "pct", "percent", "retention"];

/// Returns true if `metric` is in [`ALLOWED_METRICS`].
#[must_use]
pub fn is_allowed_metric(metric: &str) -> bool {
    ALLOWED_METRICS.contains(&metric)
}

/// Returns true if the metric name contains a rate-like token.
#[must_use]
pub fn is_rate_metric(metric: &str) -> bool {
    let lower = metric.to_ascii_lowercase();
    RATE_TOKENS.iter().any(|token| lower.contains(token))
}

static RULE_ID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:-]*$").unwrap_or_else(|_| unreachable!()));

static FILTER_CODE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").unwrap_or_else(|_| unreachable!()));

/// The severity level of a rule and of the incidents it opens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Worth a look.
    Low,
    /// Should be investigated.
    #[default]
    Medium,
    /// Needs attention soon.
    High,
    /// Requires immediate attention.
    Critical,
}

impl Severity {
    /// All severities, lowest first.
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    /// Returns the severity as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Returns the priority of this severity (higher = more urgent).
    #[must_use]
    pub const fn priority(&self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Comparison operators for triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonOperator {
    /// Less than (<).
    Lt,
    /// Less than or equal (<=).
    Lte,
    /// Greater than (>).
    Gt,
    /// Greater than or equal (>=).
    Gte,
    /// Equal within [`EQ_TOLERANCE`].
    Eq,
}

impl ComparisonOperator {
    /// Evaluates `left <op> right`.
    #[must_use]
    pub fn evaluate(&self, left: f64, right: f64) -> bool {
        match self {
            Self::Lt => left < right,
            Self::Lte => left <= right,
            Self::Gt => left > right,
            Self::Gte => left >= right,
            Self::Eq => (left - right).abs() < EQ_TOLERANCE,
        }
    }

    /// Returns the operator tag used in rule definitions.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Eq => "eq",
        }
    }

    /// Returns the operator as a symbol.
    #[must_use]
    pub const fn as_symbol(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Eq => "==",
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_symbol())
    }
}

/// The aggregation level a rule monitors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeLevel {
    /// Whole-country aggregate.
    #[default]
    National,
    /// State or province.
    State,
    /// Metropolitan area.
    Metro,
    /// County.
    County,
    /// Industry sector.
    Industry,
}

impl ScopeLevel {
    /// Returns the level as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::National => "national",
            Self::State => "state",
            Self::Metro => "metro",
            Self::County => "county",
            Self::Industry => "industry",
        }
    }
}

/// Aggregation level plus an optional filter code (e.g. a state code).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    /// Aggregation level.
    pub level: ScopeLevel,
    /// Optional filter code within the level.
    #[serde(default)]
    pub filter: Option<String>,
}

impl Scope {
    /// Creates a scope at `level` with no filter.
    #[must_use]
    pub const fn new(level: ScopeLevel) -> Self {
        Self {
            level,
            filter: None,
        }
    }

    /// The national scope.
    #[must_use]
    pub const fn national() -> Self {
        Self::new(ScopeLevel::National)
    }

    /// Sets the filter code.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if let Some(filter) = &self.filter {
            if !FILTER_CODE_REGEX.is_match(filter) {
                return Err(AlertError::InvalidRule {
                    reason: format!("invalid scope filter code '{filter}'"),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filter {
            Some(filter) => write!(f, "{}:{filter}", self.level.as_str()),
            None => write!(f, "{}", self.level.as_str()),
        }
    }
}

/// Evaluation window in months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    /// Number of monthly periods.
    pub months: u32,
}

impl Window {
    /// Creates a window of `months` periods.
    #[must_use]
    pub const fn months(months: u32) -> Self {
        Self { months }
    }

    /// Number of periods as a `usize`.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.months as usize
    }

    /// True for a zero-length window (never valid on a [`Rule`]).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.months == 0
    }
}

const fn default_yoy_op() -> ComparisonOperator {
    ComparisonOperator::Lte
}

const fn default_slope_op() -> ComparisonOperator {
    ComparisonOperator::Lt
}

/// The condition a rule checks, one case per trigger kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Latest value compared against a fixed threshold.
    Threshold {
        /// Comparison operator.
        op: ComparisonOperator,
        /// Threshold value.
        value: f64,
    },
    /// Latest 12-period percentage change compared against a threshold.
    YoyDeltaPct {
        /// Comparison operator (default `lte`).
        #[serde(default = "default_yoy_op")]
        op: ComparisonOperator,
        /// Threshold in percent.
        value: f64,
    },
    /// Linear trend over the rule window compared against a threshold.
    SlopeWindow {
        /// Comparison operator (default `lt`).
        #[serde(default = "default_slope_op")]
        op: ComparisonOperator,
        /// Slope threshold per period.
        value: f64,
    },
    /// CUSUM change-point scan over the rule window.
    BreakEvent {
        /// Decision interval `h`; the sign is ignored.
        value: f64,
    },
    /// Multi-window error-budget burn rate.
    BurnRate {
        /// Minimum fast-window burn.
        fast_threshold: f64,
        /// Minimum slow-window burn.
        slow_threshold: f64,
    },
}

impl Trigger {
    /// A threshold trigger.
    #[must_use]
    pub const fn threshold(op: ComparisonOperator, value: f64) -> Self {
        Self::Threshold { op, value }
    }

    /// A year-over-year trigger with the default `lte` operator.
    #[must_use]
    pub const fn yoy_delta_pct(value: f64) -> Self {
        Self::YoyDeltaPct {
            op: default_yoy_op(),
            value,
        }
    }

    /// A slope trigger with the default `lt` operator.
    #[must_use]
    pub const fn slope_window(value: f64) -> Self {
        Self::SlopeWindow {
            op: default_slope_op(),
            value,
        }
    }

    /// A structural-break trigger with sensitivity `h`.
    #[must_use]
    pub const fn break_event(h: f64) -> Self {
        Self::BreakEvent { value: h }
    }

    /// A burn-rate trigger.
    #[must_use]
    pub const fn burn_rate(fast_threshold: f64, slow_threshold: f64) -> Self {
        Self::BurnRate {
            fast_threshold,
            slow_threshold,
        }
    }

    /// Returns the trigger kind tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Threshold { .. } => "threshold",
            Self::YoyDeltaPct { .. } => "yoy_delta_pct",
            Self::SlopeWindow { .. } => "slope_window",
            Self::BreakEvent { .. } => "break_event",
            Self::BurnRate { .. } => "burn_rate",
        }
    }

    /// Checks that every numeric field is finite (and burn thresholds non-negative).
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidRule` describing the first bad field.
    pub fn validate(&self) -> Result<()> {
        let finite = |name: &str, v: f64| {
            if v.is_finite() {
                Ok(())
            } else {
                Err(AlertError::InvalidRule {
                    reason: format!("{} trigger {name} must be finite, got {v}", self.kind()),
                })
            }
        };

        match *self {
            Self::Threshold { value, .. }
            | Self::YoyDeltaPct { value, .. }
            | Self::SlopeWindow { value, .. }
            | Self::BreakEvent { value } => finite("value", value),
            Self::BurnRate {
                fast_threshold,
                slow_threshold,
            } => {
                finite("fast_threshold", fast_threshold)?;
                finite("slow_threshold", slow_threshold)?;
                if fast_threshold < 0.0 || slow_threshold < 0.0 {
                    return Err(AlertError::InvalidRule {
                        reason: "burn_rate thresholds must be non-negative".to_string(),
                    });
                }
                Ok(())
            }
        }
    }
}

/// A validated, immutable monitored condition.
///
/// Construct with [`Rule::builder`] or deserialize; both paths run the same
/// validation, so a `Rule` value is never partially valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRule")]
pub struct Rule {
    rule_id: String,
    metric: String,
    scope: Scope,
    window: Window,
    trigger: Trigger,
    horizon: u32,
    severity: Severity,
    enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl Rule {
    /// Maximum allowed length for rule ids.
    pub const MAX_ID_LENGTH: usize = 128;
    /// Smallest allowed window.
    pub const MIN_WINDOW_MONTHS: u32 = 3;
    /// Smallest allowed horizon.
    pub const MIN_HORIZON: u32 = 1;
    /// Largest allowed horizon.
    pub const MAX_HORIZON: u32 = 96;

    /// Creates a new rule builder.
    pub fn builder(
        rule_id: impl Into<String>,
        metric: impl Into<String>,
        trigger: Trigger,
    ) -> RuleBuilder {
        RuleBuilder::new(rule_id, metric, trigger)
    }

    /// Unique rule identifier.
    #[must_use]
    pub fn rule_id(&self) -> &str {
        &self.rule_id
    }

    /// Monitored metric.
    #[must_use]
    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// Monitored scope.
    #[must_use]
    pub const fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Evaluation window.
    #[must_use]
    pub const fn window(&self) -> Window {
        self.window
    }

    /// Trigger condition.
    #[must_use]
    pub const fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    /// Forecast horizon in periods.
    #[must_use]
    pub const fn horizon(&self) -> u32 {
        self.horizon
    }

    /// Severity of incidents opened by this rule.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity
    }

    /// Whether the rule is evaluated.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Optional human-readable description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// True if values should be clamped to `[0, 1]` before evaluation.
    #[must_use]
    pub fn is_rate_metric(&self) -> bool {
        is_rate_metric(&self.metric)
    }
}

/// Raw rule fields as they appear in serialized form.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
    rule_id: String,
    metric: String,
    #[serde(default)]
    scope: Scope,
    window: Window,
    trigger: Trigger,
    horizon: u32,
    #[serde(default)]
    severity: Severity,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    description: Option<String>,
}

const fn default_enabled() -> bool {
    true
}

impl TryFrom<RawRule> for Rule {
    type Error = AlertError;

    fn try_from(raw: RawRule) -> Result<Self> {
        RuleBuilder {
            rule_id: raw.rule_id,
            metric: raw.metric,
            scope: raw.scope,
            window_months: raw.window.months,
            trigger: raw.trigger,
            horizon: raw.horizon,
            severity: raw.severity,
            enabled: raw.enabled,
            description: raw.description,
        }
        .build()
    }
}

/// Builder for creating [`Rule`] instances.
#[derive(Debug, Clone)]
pub struct RuleBuilder {
    rule_id: String,
    metric: String,
    scope: Scope,
    window_months: u32,
    trigger: Trigger,
    horizon: u32,
    severity: Severity,
    enabled: bool,
    description: Option<String>,
}

impl RuleBuilder {
    /// Creates a new builder with required fields.
    fn new(rule_id: impl Into<String>, metric: impl Into<String>, trigger: Trigger) -> Self {
        Self {
            rule_id: rule_id.into(),
            metric: metric.into(),
            scope: Scope::national(),
            window_months: 12,
            trigger,
            horizon: 12,
            severity: Severity::Medium,
            enabled: true,
            description: None,
        }
    }

    /// Sets the scope.
    #[must_use]
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Sets the window length in months.
    #[must_use]
    pub const fn window_months(mut self, months: u32) -> Self {
        self.window_months = months;
        self
    }

    /// Sets the forecast horizon.
    #[must_use]
    pub const fn horizon(mut self, horizon: u32) -> Self {
        self.horizon = horizon;
        self
    }

    /// Sets the severity level.
    #[must_use]
    pub const fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Sets whether the rule is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Builds the [`Rule`].
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidRule` if:
    /// - The rule id is empty, too long, or contains invalid characters
    /// - The metric is not in [`ALLOWED_METRICS`]
    /// - The scope filter code is malformed
    /// - The window is shorter than [`Rule::MIN_WINDOW_MONTHS`]
    /// - The horizon is outside `1..=96`
    /// - A trigger value is not finite
    pub fn build(self) -> Result<Rule> {
        let invalid = |reason: String| Err(AlertError::InvalidRule { reason });

        if self.rule_id.is_empty() {
            return invalid("rule_id cannot be empty".to_string());
        }
        if self.rule_id.len() > Rule::MAX_ID_LENGTH {
            return invalid(format!(
                "rule_id exceeds maximum length of {} characters",
                Rule::MAX_ID_LENGTH
            ));
        }
        if !RULE_ID_REGEX.is_match(&self.rule_id) {
            return invalid(format!("rule_id '{}' contains invalid characters", self.rule_id));
        }
        if !is_allowed_metric(&self.metric) {
            return invalid(format!("metric '{}' is not in the allow-list", self.metric));
        }
        self.scope.validate()?;
        if self.window_months < Rule::MIN_WINDOW_MONTHS {
            return invalid(format!(
                "window must be at least {} months, got {}",
                Rule::MIN_WINDOW_MONTHS,
                self.window_months
            ));
        }
        if !(Rule::MIN_HORIZON..=Rule::MAX_HORIZON).contains(&self.horizon) {
            return invalid(format!(
                "horizon must be between {} and {}, got {}",
                Rule::MIN_HORIZON,
                Rule::MAX_HORIZON,
                self.horizon
            ));
        }
        self.trigger.validate()?;

        Ok(Rule {
            rule_id: self.rule_id,
            metric: self.metric,
            scope: self.scope,
            window: Window::months(self.window_months),
            trigger: self.trigger,
            horizon: self.horizon,
            severity: self.severity,
            enabled: self.enabled,
            description: self.description.filter(|d| !d.trim().is_empty()),
        })
    }
}

/// Named values supporting a [`Decision`], ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Evidence(BTreeMap<String, serde_json::Value>);

impl Evidence {
    /// Creates empty evidence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts any serializable value; values that fail to serialize become `null`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Serialize) {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.0.insert(key.into(), value);
    }

    /// Builder-style [`Evidence::insert`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        self.insert(key, value);
        self
    }

    /// Returns the raw value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Returns `key` as a number.
    #[must_use]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(serde_json::Value::as_f64)
    }

    /// Returns `key` as a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(serde_json::Value::as_str)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }
}

/// The result of evaluating one rule.
///
/// Decisions are never persisted on their own; the dispatcher or the
/// resolver consumes them immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// The evaluated rule.
    pub rule_id: String,
    /// Whether the condition holds.
    pub triggered: bool,
    /// Supporting values specific to the trigger kind.
    pub evidence: Evidence,
    /// Human-readable one-liner.
    pub message: String,
    /// When the evaluation happened.
    pub timestamp: DateTime<Utc>,
    /// Period label of the first evaluated point, if labels were supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_start: Option<String>,
    /// Period label of the last evaluated point, if labels were supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_end: Option<String>,
}

impl Decision {
    /// A decision with no evidence.
    #[must_use]
    pub fn new(
        rule_id: impl Into<String>,
        triggered: bool,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            triggered,
            evidence: Evidence::new(),
            message: message.into(),
            timestamp,
            window_start: None,
            window_end: None,
        }
    }

    /// A non-triggering decision carrying only a message.
    #[must_use]
    pub fn rejected(
        rule_id: impl Into<String>,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(rule_id, false, message, timestamp)
    }

    /// Replaces the evidence.
    #[must_use]
    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence = evidence;
        self
    }

    /// Sets the window labels.
    #[must_use]
    pub fn with_window(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.window_start = Some(start.into());
        self.window_end = Some(end.into());
        self
    }
}
