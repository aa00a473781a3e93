//! Notifications and their idempotency keys.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::channels::ChannelKind;
use crate::types::{Decision, Evidence, Rule, Scope, Severity};

/// Serializes `value` as compact JSON with object keys sorted at every level.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Hex SHA-256 of the canonical JSON of `{rule_id, scope, window_start, window_end}`.
#[must_use]
pub fn idempotency_key(
    rule_id: &str,
    scope: &Scope,
    window_start: &str,
    window_end: &str,
) -> String {
    let body = serde_json::json!({
        "rule_id": rule_id,
        "scope": scope,
        "window_start": window_start,
        "window_end": window_end,
    });
    hex::encode(Sha256::digest(canonical_json(&body).as_bytes()))
}

/// An outbound message candidate.
///
/// The `notification_id` is derived from the content, so two notifications
/// for the same rule, scope and window always share it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    notification_id: String,
    rule_id: String,
    severity: Severity,
    message: String,
    scope: Scope,
    window_start: String,
    window_end: String,
    channels: Vec<ChannelKind>,
    evidence: Evidence,
    timestamp: DateTime<Utc>,
}

impl Notification {
    /// Creates a notification for `rule` covering `window_start..=window_end`,
    /// sent to the log channel.
    #[must_use]
    pub fn new(
        rule: &Rule,
        message: impl Into<String>,
        window_start: impl Into<String>,
        window_end: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let window_start = window_start.into();
        let window_end = window_end.into();
        Self {
            notification_id: idempotency_key(
                rule.rule_id(),
                rule.scope(),
                &window_start,
                &window_end,
            ),
            rule_id: rule.rule_id().to_string(),
            severity: rule.severity(),
            message: message.into(),
            scope: rule.scope().clone(),
            window_start,
            window_end,
            channels: vec![ChannelKind::Log],
            evidence: Evidence::new(),
            timestamp,
        }
    }

    /// Builds a notification from a decision on `rule`.
    ///
    /// The window comes from the decision's period labels, or from its
    /// timestamp when no labels were supplied.
    #[must_use]
    pub fn from_decision(rule: &Rule, decision: &Decision, channels: &[ChannelKind]) -> Self {
        let fallback = || decision.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);
        let start = decision.window_start.clone().unwrap_or_else(fallback);
        let end = decision.window_end.clone().unwrap_or_else(fallback);
        Self::new(rule, decision.message.clone(), start, end, decision.timestamp)
            .with_channels(channels.iter().copied())
            .with_evidence(decision.evidence.clone())
    }

    /// Sets the channels, dropping duplicates but keeping first-seen order.
    /// An empty list keeps the current channels.
    #[must_use]
    pub fn with_channels(mut self, channels: impl IntoIterator<Item = ChannelKind>) -> Self {
        let mut ordered = Vec::new();
        for channel in channels {
            if !ordered.contains(&channel) {
                ordered.push(channel);
            }
        }
        if !ordered.is_empty() {
            self.channels = ordered;
        }
        self
    }

    /// Sets the evidence.
    #[must_use]
    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence = evidence;
        self
    }

    /// The idempotency key.
    #[must_use]
    pub fn notification_id(&self) -> &str {
        &self.notification_id
    }

    /// The originating rule.
    #[must_use]
    pub fn rule_id(&self) -> &str {
        &self.rule_id
    }

    /// Severity copied from the rule.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity
    }

    /// Message text.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Scope copied from the rule.
    #[must_use]
    pub const fn scope(&self) -> &Scope {
        &self.scope
    }

    /// First period covered.
    #[must_use]
    pub fn window_start(&self) -> &str {
        &self.window_start
    }

    /// Last period covered.
    #[must_use]
    pub fn window_end(&self) -> &str {
        &self.window_end
    }

    /// Channels in delivery order.
    #[must_use]
    pub fn channels(&self) -> &[ChannelKind] {
        &self.channels
    }

    /// Evidence copied from the decision.
    #[must_use]
    pub const fn evidence(&self) -> &Evidence {
        &self.evidence
    }

    /// Creation time.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
