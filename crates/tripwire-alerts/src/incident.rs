//! Incident records and the lifecycle state machine.
//!
//! An [`Incident`] value is immutable once written: every transition builds
//! a new value that the caller appends to the ledger. Transition methods
//! return `None` when the move is not allowed from the current state.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::notification::Notification;
use crate::types::{Scope, Severity};

/// Metadata key holding the per-channel fan-out results.
pub const DISPATCH_RESULTS_KEY: &str = "dispatch_results";
/// Metadata key set on incidents closed by sustained green evaluations.
pub const AUTO_RESOLVED_KEY: &str = "auto_resolved";
/// Metadata key recording the green count that closed an incident.
pub const AUTO_RESOLVED_GREEN_COUNT_KEY: &str = "auto_resolved_green_count";

/// Lifecycle state of an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IncidentState {
    /// Newly dispatched.
    Open,
    /// Acknowledged by an operator.
    Ack,
    /// Silenced by an operator.
    Silenced,
    /// Closed. Terminal.
    Resolved,
}

impl IncidentState {
    /// All states, in lifecycle order.
    pub const ALL: [Self; 4] = [Self::Open, Self::Ack, Self::Silenced, Self::Resolved];

    /// Returns the state as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Ack => "ACK",
            Self::Silenced => "SILENCED",
            Self::Resolved => "RESOLVED",
        }
    }

    /// Returns true for states that count towards auto-resolution.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Open | Self::Ack)
    }

    /// Returns true for the terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved)
    }

    /// Returns true if `self -> next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Ack)
                | (Self::Open | Self::Ack, Self::Silenced)
                | (Self::Open | Self::Ack | Self::Silenced, Self::Resolved)
        )
    }
}

impl fmt::Display for IncidentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One persisted version of an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Stable identifier; equals the originating notification id.
    pub incident_id: String,
    /// The notification that opened the incident.
    pub notification_id: String,
    /// The originating rule.
    pub rule_id: String,
    /// Severity copied from the rule.
    pub severity: Severity,
    /// Current lifecycle state.
    pub state: IncidentState,
    /// Message copied from the notification.
    pub message: String,
    /// Scope copied from the rule.
    pub scope: Scope,
    /// First period covered.
    pub window_start: String,
    /// Last period covered.
    pub window_end: String,
    /// When the incident was opened.
    pub created_at: DateTime<Utc>,
    /// When this version was written.
    pub updated_at: DateTime<Utc>,
    /// When the incident was acknowledged.
    pub ack_at: Option<DateTime<Utc>>,
    /// When the incident was resolved. Set once, never cleared.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Non-triggering evaluations since the last reset.
    pub consecutive_green_count: u32,
    /// Audit notes and markers.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Incident {
    /// The OPEN record written when a notification is dispatched.
    #[must_use]
    pub fn open(
        notification: &Notification,
        at: DateTime<Utc>,
        dispatch_results: &BTreeMap<String, String>,
    ) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            DISPATCH_RESULTS_KEY.to_string(),
            Value::Object(
                dispatch_results
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        );

        Self {
            incident_id: notification.notification_id().to_string(),
            notification_id: notification.notification_id().to_string(),
            rule_id: notification.rule_id().to_string(),
            severity: notification.severity(),
            state: IncidentState::Open,
            message: notification.message().to_string(),
            scope: notification.scope().clone(),
            window_start: notification.window_start().to_string(),
            window_end: notification.window_end().to_string(),
            created_at: at,
            updated_at: at,
            ack_at: None,
            resolved_at: None,
            consecutive_green_count: 0,
            metadata,
        }
    }

    fn moved_to(&self, state: IncidentState, at: DateTime<Utc>) -> Option<Self> {
        if !self.state.can_transition_to(state) {
            return None;
        }
        let mut next = self.clone();
        next.state = state;
        next.updated_at = at;
        Some(next)
    }

    /// OPEN -> ACK.
    #[must_use]
    pub fn acknowledged(&self, at: DateTime<Utc>) -> Option<Self> {
        let mut next = self.moved_to(IncidentState::Ack, at)?;
        next.ack_at = Some(at);
        Some(next)
    }

    /// OPEN | ACK -> SILENCED.
    #[must_use]
    pub fn silenced(&self, at: DateTime<Utc>) -> Option<Self> {
        self.moved_to(IncidentState::Silenced, at)
    }

    /// Any non-terminal state -> RESOLVED.
    #[must_use]
    pub fn resolved(&self, at: DateTime<Utc>) -> Option<Self> {
        let mut next = self.moved_to(IncidentState::Resolved, at)?;
        next.resolved_at.get_or_insert(at);
        Some(next)
    }

    /// Counts one green evaluation. Reaching `threshold` resolves the
    /// incident with the auto-resolution markers. Returns `None` for
    /// incidents that are not OPEN or ACK.
    #[must_use]
    pub fn with_green_evaluation(&self, at: DateTime<Utc>, threshold: u32) -> Option<Self> {
        if !self.state.is_active() {
            return None;
        }

        let count = self.consecutive_green_count.saturating_add(1);
        let mut next = if count >= threshold {
            self.resolved(at)?
        } else {
            let mut next = self.clone();
            next.updated_at = at;
            next
        };
        next.consecutive_green_count = count;
        if next.state.is_terminal() {
            next.metadata.insert(AUTO_RESOLVED_KEY.to_string(), Value::Bool(true));
            next.metadata
                .insert(AUTO_RESOLVED_GREEN_COUNT_KEY.to_string(), Value::from(count));
        }
        Some(next)
    }

    /// Returns true if this incident was closed by auto-resolution.
    #[must_use]
    pub fn is_auto_resolved(&self) -> bool {
        self.metadata
            .get(AUTO_RESOLVED_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}
