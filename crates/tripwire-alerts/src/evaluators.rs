//! Trigger evaluators.
//!
//! One pure function per trigger kind. Each maps a (validated, possibly
//! clamped) series to an [`Assessment`]; the engine stamps it with a time
//! and window labels to produce a [`Decision`](crate::types::Decision).
//! Insufficient history is a non-triggering assessment, never an error.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{ComparisonOperator, Evidence, Rule, Trigger};

/// Periods of lookback for year-over-year deltas.
pub const YOY_LOOKBACK: usize = 12;

/// CUSUM allowance `k`, in standardized units.
pub const CUSUM_ALLOWANCE: f64 = 0.25;

/// Relative floor for the CUSUM scale, as a fraction of the window mean.
const CUSUM_RELATIVE_SCALE_FLOOR: f64 = 0.02;

/// Absolute floor for the CUSUM scale.
const CUSUM_MIN_SCALE: f64 = 1e-9;

/// Evidence key marking an assessment that could not be computed.
pub const INCONCLUSIVE_KEY: &str = "inconclusive";

/// Outcome of one evaluator before it is turned into a decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    /// Whether the condition holds.
    pub triggered: bool,
    /// Supporting values.
    pub evidence: Evidence,
    /// Human-readable one-liner.
    pub message: String,
}

impl Assessment {
    fn new(triggered: bool, evidence: Evidence, message: String) -> Self {
        Self {
            triggered,
            evidence,
            message,
        }
    }

    /// A non-triggering assessment for input that could not be evaluated.
    #[must_use]
    pub fn inconclusive(message: impl Into<String>, evidence: Evidence) -> Self {
        Self::new(false, evidence.with(INCONCLUSIVE_KEY, true), message.into())
    }
}

/// Severity tier of a burn rate, on a fixed scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BurnTier {
    /// Below the sustainable rate on both windows.
    None,
    /// Slow window at or above the sustainable rate.
    Low,
    /// Fast window at or above the sustainable rate.
    Medium,
    /// Both windows at or above the sustainable rate.
    High,
    /// Fast window at twice the sustainable rate, slow window above it.
    Critical,
}

impl BurnTier {
    /// Classifies burn magnitudes; first match wins.
    #[must_use]
    pub fn classify(fast: f64, slow: f64) -> Self {
        if fast >= 2.0 && slow >= 1.0 {
            Self::Critical
        } else if fast >= 1.0 && slow >= 1.0 {
            Self::High
        } else if fast >= 1.0 {
            Self::Medium
        } else if slow >= 1.0 {
            Self::Low
        } else {
            Self::None
        }
    }

    /// Returns the tier as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for BurnTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Dispatches to the evaluator for the rule's trigger kind.
#[must_use]
pub fn evaluate_trigger(rule: &Rule, series: &[f64]) -> Assessment {
    let window = rule.window().len();
    match *rule.trigger() {
        Trigger::Threshold { op, value } => evaluate_threshold(op, value, series),
        Trigger::YoyDeltaPct { op, value } => evaluate_yoy_delta(op, value, series),
        Trigger::SlopeWindow { op, value } => evaluate_slope(op, value, window, series),
        Trigger::BreakEvent { value } => evaluate_break(value, window, series),
        Trigger::BurnRate {
            fast_threshold,
            slow_threshold,
        } => evaluate_burn_rate(fast_threshold, slow_threshold, series),
    }
}

/// Compares the last element against `value`.
#[must_use]
pub fn evaluate_threshold(op: ComparisonOperator, value: f64, series: &[f64]) -> Assessment {
    let Some(&current) = series.last() else {
        return Assessment::inconclusive("Empty series", Evidence::new());
    };

    let triggered = op.evaluate(current, value);
    let evidence = Evidence::new()
        .with("current_value", current)
        .with("threshold", value)
        .with("operator", op.as_str());
    let message = format!(
        "Latest value {current:.4} {} threshold {value:.4}{}",
        op.as_symbol(),
        if triggered { "" } else { " (not met)" }
    );
    Assessment::new(triggered, evidence, message)
}

/// Percentage change against the value [`YOY_LOOKBACK`] periods earlier,
/// for every index where the base is non-zero.
#[must_use]
pub fn yoy_deltas(series: &[f64]) -> Vec<(usize, f64)> {
    (YOY_LOOKBACK..series.len())
        .filter_map(|i| {
            let base = series[i - YOY_LOOKBACK];
            if base == 0.0 {
                None
            } else {
                Some((i, 100.0 * (series[i] - base) / base))
            }
        })
        .collect()
}

/// Compares the latest computable year-over-year delta against `value`.
#[must_use]
pub fn evaluate_yoy_delta(op: ComparisonOperator, value: f64, series: &[f64]) -> Assessment {
    let required = YOY_LOOKBACK + 1;
    if series.len() < required {
        return Assessment::inconclusive(
            format!(
                "Insufficient data for YoY delta: need {required} points, have {}",
                series.len()
            ),
            Evidence::new()
                .with("required_points", required)
                .with("available_points", series.len()),
        );
    }

    let Some(&(index, delta)) = yoy_deltas(series).last() else {
        return Assessment::inconclusive(
            "Insufficient data for YoY delta: every base value is zero",
            Evidence::new().with("available_points", series.len()),
        );
    };

    let triggered = op.evaluate(delta, value);
    let evidence = Evidence::new()
        .with("yoy_delta_pct", delta)
        .with("current_value", series[index])
        .with("base_value", series[index - YOY_LOOKBACK])
        .with("index", index)
        .with("threshold", value)
        .with("operator", op.as_str());
    let message = format!(
        "YoY change {delta:.2}% {} {value:.2}%{}",
        op.as_symbol(),
        if triggered { "" } else { " (not met)" }
    );
    Assessment::new(triggered, evidence, message)
}

/// Least-squares slope of `points` against `x = 0..n`.
///
/// Returns `None` for fewer than two points.
#[must_use]
pub fn linear_slope(points: &[f64]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }

    let n = points.len() as f64;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_x2 = 0.0;

    for (i, &y) in points.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_x2 += x * x;
    }

    let denom = n * sum_x2 - sum_x * sum_x;
    if denom.abs() < f64::EPSILON {
        return None;
    }
    Some((n * sum_xy - sum_x * sum_y) / denom)
}

/// Fits a linear trend over the last `window` points and compares its slope.
#[must_use]
pub fn evaluate_slope(
    op: ComparisonOperator,
    value: f64,
    window: usize,
    series: &[f64],
) -> Assessment {
    if series.len() < window || window < 2 {
        return Assessment::inconclusive(
            format!(
                "Insufficient data for slope: need {window} points, have {}",
                series.len()
            ),
            Evidence::new()
                .with("required_points", window)
                .with("available_points", series.len()),
        );
    }

    let tail = &series[series.len() - window..];
    let Some(slope) = linear_slope(tail) else {
        return Assessment::inconclusive("Slope is undefined for this window", Evidence::new());
    };

    let triggered = op.evaluate(slope, value);
    let evidence = Evidence::new()
        .with("slope", slope)
        .with("window", window)
        .with("first_value", tail[0])
        .with("last_value", tail[tail.len() - 1])
        .with("threshold", value)
        .with("operator", op.as_str());
    let message = format!(
        "Slope {slope:.6}/period over {window} periods {} {value:.6}{}",
        op.as_symbol(),
        if triggered { "" } else { " (not met)" }
    );
    Assessment::new(triggered, evidence, message)
}

/// Two-sided CUSUM scan returning the indices (relative to `points`) where
/// either cumulative sum exceeded `h`.
///
/// Points are standardized by the window mean and a floored population
/// standard deviation; both sums reset after each detection.
#[must_use]
pub fn cusum_breaks(points: &[f64], k: f64, h: f64) -> Vec<usize> {
    if points.is_empty() {
        return Vec::new();
    }

    let n = points.len() as f64;
    let mean = points.iter().sum::<f64>() / n;
    let variance = points.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let scale = variance
        .sqrt()
        .max(CUSUM_RELATIVE_SCALE_FLOOR * mean.abs())
        .max(CUSUM_MIN_SCALE);

    let mut breaks = Vec::new();
    let mut s_pos = 0.0_f64;
    let mut s_neg = 0.0_f64;

    for (i, &x) in points.iter().enumerate() {
        let z = (x - mean) / scale;
        s_pos = (s_pos + z - k).max(0.0);
        s_neg = (s_neg - z - k).max(0.0);
        if s_pos > h || s_neg > h {
            breaks.push(i);
            s_pos = 0.0;
            s_neg = 0.0;
        }
    }

    breaks
}

/// Runs a CUSUM change-point scan over the last `window` points.
///
/// Reported indices are positions in the full series.
#[must_use]
pub fn evaluate_break(h: f64, window: usize, series: &[f64]) -> Assessment {
    if series.len() < window {
        return Assessment::inconclusive(
            format!(
                "Insufficient data for break detection: need {window} points, have {}",
                series.len()
            ),
            Evidence::new()
                .with("required_points", window)
                .with("available_points", series.len()),
        );
    }

    let h = h.abs();
    let offset = series.len() - window;
    let breaks: Vec<usize> = cusum_breaks(&series[offset..], CUSUM_ALLOWANCE, h)
        .into_iter()
        .map(|i| i + offset)
        .collect();

    let triggered = !breaks.is_empty();
    let message = if triggered {
        format!(
            "Detected {} structural break(s) in the last {window} periods",
            breaks.len()
        )
    } else {
        format!("No structural break in the last {window} periods")
    };
    let evidence = Evidence::new()
        .with("break_count", breaks.len())
        .with("break_indices", &breaks)
        .with("h", h)
        .with("k", CUSUM_ALLOWANCE)
        .with("window", window);
    Assessment::new(triggered, evidence, message)
}

/// Reads `[fast_burn, slow_burn, ..]` and requires both to meet their thresholds.
///
/// A single-point series is slow-burn-only: both burns take that value.
#[must_use]
pub fn evaluate_burn_rate(fast_threshold: f64, slow_threshold: f64, series: &[f64]) -> Assessment {
    let (fast, slow) = match series {
        [] => return Assessment::inconclusive("Empty series", Evidence::new()),
        [only] => (*only, *only),
        [fast, slow, ..] => (*fast, *slow),
    };

    let triggered = fast >= fast_threshold && slow >= slow_threshold;
    let tier = BurnTier::classify(fast, slow);
    let evidence = Evidence::new()
        .with("fast_burn", fast)
        .with("slow_burn", slow)
        .with("fast_threshold", fast_threshold)
        .with("slow_threshold", slow_threshold)
        .with("tier", tier.as_str());
    let message = format!(
        "Burn rate fast={fast:.2} (>= {fast_threshold:.2}) slow={slow:.2} (>= {slow_threshold:.2}) tier={tier}{}",
        if triggered { "" } else { ", below threshold" }
    );
    Assessment::new(triggered, evidence, message)
}
