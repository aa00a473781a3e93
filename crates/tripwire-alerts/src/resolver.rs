//! Incident resolver.
//!
//! Rebuilds incident state from the shared ledger (last record per id
//! wins, by append order) and applies operator actions and green-evaluation
//! auto-resolution. Every public call first catches up with records other
//! writers appended since the previous call.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use tripwire_ledger::{Ledger, LedgerCursor};

use crate::clock::SharedClock;
use crate::error::{AlertError, Result};
use crate::incident::{Incident, IncidentState};
use crate::types::Severity;

/// Number of rules reported in [`IncidentStats::top_rules`].
pub const TOP_RULES_LIMIT: usize = 5;

/// Configuration for the [`IncidentResolver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverConfig {
    /// Consecutive green evaluations that resolve an incident.
    pub auto_resolve_threshold: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            auto_resolve_threshold: 3,
        }
    }
}

impl ResolverConfig {
    /// Sets the auto-resolve threshold.
    #[must_use]
    pub const fn with_auto_resolve_threshold(mut self, threshold: u32) -> Self {
        self.auto_resolve_threshold = threshold;
        self
    }

    /// Checks the threshold is usable.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidConfig` if the threshold is zero.
    pub fn validate(&self) -> Result<()> {
        if self.auto_resolve_threshold == 0 {
            return Err(AlertError::InvalidConfig {
                reason: "auto_resolve_threshold must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Filter for [`IncidentResolver::list_incidents`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncidentFilter {
    /// Only incidents in this state.
    pub state: Option<IncidentState>,
    /// Only incidents for this rule.
    pub rule_id: Option<String>,
    /// At most this many incidents.
    pub limit: Option<usize>,
}

impl IncidentFilter {
    /// Matches every incident.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts to `state`.
    #[must_use]
    pub const fn state(mut self, state: IncidentState) -> Self {
        self.state = Some(state);
        self
    }

    /// Restricts to `rule_id`.
    #[must_use]
    pub fn rule_id(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }

    /// Caps the number of results.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, incident: &Incident) -> bool {
        self.state.is_none_or(|s| incident.state == s)
            && self.rule_id.as_deref().is_none_or(|r| incident.rule_id == r)
    }
}

/// Aggregate counts over the current incident set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IncidentStats {
    /// Count per state.
    pub by_state: BTreeMap<IncidentState, usize>,
    /// Count per severity.
    pub by_severity: BTreeMap<Severity, usize>,
    /// Rules with the most incidents, highest first, ties by rule id.
    pub top_rules: Vec<(String, usize)>,
    /// Number of incidents.
    pub total: usize,
    /// Number of OPEN incidents.
    pub open: usize,
}

#[derive(Debug, Default)]
struct ResolverState {
    incidents: HashMap<String, Incident>,
    cursor: LedgerCursor,
}

impl ResolverState {
    fn sync(&mut self, ledger: &Ledger) -> Result<usize> {
        let batch = self.cursor.poll::<Incident>(ledger)?;
        if batch.skipped > 0 {
            warn!(skipped = batch.skipped, "skipped unreadable ledger lines");
        }
        let applied = batch.records.len();
        for incident in batch.records {
            self.incidents.insert(incident.incident_id.clone(), incident);
        }
        Ok(applied)
    }
}

/// Owns the incident state machine.
#[derive(Debug)]
pub struct IncidentResolver {
    config: ResolverConfig,
    clock: SharedClock,
    ledger: Arc<Ledger>,
    state: Mutex<ResolverState>,
}

impl IncidentResolver {
    /// Creates a resolver and replays the whole ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the ledger
    /// cannot be read.
    pub fn new(config: ResolverConfig, clock: SharedClock, ledger: Arc<Ledger>) -> Result<Self> {
        config.validate()?;
        let mut state = ResolverState::default();
        let replayed = state.sync(&ledger)?;
        info!(
            records = replayed,
            incidents = state.incidents.len(),
            "replayed incident ledger"
        );
        Ok(Self {
            config,
            clock,
            ledger,
            state: Mutex::new(state),
        })
    }

    /// The resolver configuration.
    #[must_use]
    pub const fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Reads records appended since the last call. Returns how many were applied.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Ledger` if the ledger cannot be read.
    pub fn refresh(&self) -> Result<usize> {
        self.state.lock().sync(&self.ledger)
    }

    /// Applies `transition` to the current record of `incident_id`.
    ///
    /// Unknown ids yield `None`; disallowed transitions return the current
    /// record unchanged without writing.
    fn transition<F>(
        &self,
        incident_id: &str,
        action: &str,
        transition: F,
    ) -> Result<Option<Incident>>
    where
        F: FnOnce(&Incident, DateTime<Utc>) -> Option<Incident>,
    {
        let mut state = self.state.lock();
        state.sync(&self.ledger)?;

        let Some(current) = state.incidents.get(incident_id) else {
            debug!(incident_id = %incident_id, action, "incident not found");
            return Ok(None);
        };

        let Some(next) = transition(current, self.clock.now()) else {
            debug!(
                incident_id = %incident_id,
                state = %current.state,
                action,
                "transition not allowed, unchanged"
            );
            return Ok(Some(current.clone()));
        };

        self.ledger.append_sealed(&next.incident_id, &next)?;
        state.sync(&self.ledger)?;
        info!(
            incident_id = %incident_id,
            rule_id = %next.rule_id,
            state = %next.state,
            action,
            "incident updated"
        );
        Ok(Some(next))
    }

    /// OPEN -> ACK. No-op from any other state.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Ledger` if the ledger cannot be read or written.
    pub fn acknowledge(&self, incident_id: &str) -> Result<Option<Incident>> {
        self.transition(incident_id, "acknowledge", Incident::acknowledged)
    }

    /// OPEN | ACK -> SILENCED. No-op from other states.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Ledger` if the ledger cannot be read or written.
    pub fn silence(&self, incident_id: &str) -> Result<Option<Incident>> {
        self.transition(incident_id, "silence", Incident::silenced)
    }

    /// Any state -> RESOLVED. Repeated calls return the resolved record unchanged.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Ledger` if the ledger cannot be read or written.
    pub fn resolve(&self, incident_id: &str) -> Result<Option<Incident>> {
        self.transition(incident_id, "resolve", Incident::resolved)
    }

    /// Counts a non-triggering evaluation of `rule_id` against each of its
    /// OPEN and ACK incidents. Returns the incidents this call resolved.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Ledger` if the ledger cannot be read or written.
    pub fn record_green_evaluation(&self, rule_id: &str) -> Result<Vec<Incident>> {
        let mut state = self.state.lock();
        state.sync(&self.ledger)?;

        let mut active: Vec<&Incident> = state
            .incidents
            .values()
            .filter(|i| i.rule_id == rule_id && i.state.is_active())
            .collect();
        active.sort_by(|a, b| a.incident_id.cmp(&b.incident_id));

        let now = self.clock.now();
        let threshold = self.config.auto_resolve_threshold;
        let updates: Vec<Incident> = active
            .into_iter()
            .filter_map(|i| i.with_green_evaluation(now, threshold))
            .collect();

        let mut resolved = Vec::new();
        for next in updates {
            self.ledger.append_sealed(&next.incident_id, &next)?;
            if next.state.is_terminal() {
                info!(
                    incident_id = %next.incident_id,
                    rule_id = %rule_id,
                    green_count = next.consecutive_green_count,
                    "auto-resolved incident"
                );
                resolved.push(next);
            } else {
                debug!(
                    incident_id = %next.incident_id,
                    green_count = next.consecutive_green_count,
                    "recorded green evaluation"
                );
            }
        }

        state.sync(&self.ledger)?;
        Ok(resolved)
    }

    /// The current record of `incident_id`.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Ledger` if the ledger cannot be read.
    pub fn get_incident(&self, incident_id: &str) -> Result<Option<Incident>> {
        let mut state = self.state.lock();
        state.sync(&self.ledger)?;
        Ok(state.incidents.get(incident_id).cloned())
    }

    /// Incidents matching `filter`, newest first, ties by id.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Ledger` if the ledger cannot be read.
    pub fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<Incident>> {
        let mut state = self.state.lock();
        state.sync(&self.ledger)?;

        let mut incidents: Vec<Incident> = state
            .incidents
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        incidents.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.incident_id.cmp(&b.incident_id))
        });
        if let Some(limit) = filter.limit {
            incidents.truncate(limit);
        }
        Ok(incidents)
    }

    /// Every incident for `rule_id`.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Ledger` if the ledger cannot be read.
    pub fn incidents_for_rule(&self, rule_id: &str) -> Result<Vec<Incident>> {
        self.list_incidents(&IncidentFilter::all().rule_id(rule_id))
    }

    /// Counts by state, severity and rule.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Ledger` if the ledger cannot be read.
    pub fn stats(&self) -> Result<IncidentStats> {
        let mut state = self.state.lock();
        state.sync(&self.ledger)?;

        let mut stats = IncidentStats {
            total: state.incidents.len(),
            ..IncidentStats::default()
        };
        let mut per_rule: HashMap<&str, usize> = HashMap::new();

        for incident in state.incidents.values() {
            *stats.by_state.entry(incident.state).or_default() += 1;
            *stats.by_severity.entry(incident.severity).or_default() += 1;
            *per_rule.entry(incident.rule_id.as_str()).or_default() += 1;
            if incident.state == IncidentState::Open {
                stats.open += 1;
            }
        }

        let mut top: Vec<(String, usize)> = per_rule
            .into_iter()
            .map(|(rule, count)| (rule.to_string(), count))
            .collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top.truncate(TOP_RULES_LIMIT);
        stats.top_rules = top;

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::clock::ManualClock;
    use crate::incident::AUTO_RESOLVED_KEY;
    use crate::notification::Notification;
    use crate::types::{ComparisonOperator, Rule, Trigger};
    use chrono::{Duration, TimeZone};
    use std::io::Write;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        clock: ManualClock,
        ledger: Arc<Ledger>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(Ledger::in_dir(dir.path()).unwrap());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap());
        Fixture { dir, clock, ledger }
    }

    fn resolver(f: &Fixture) -> IncidentResolver {
        IncidentResolver::new(
            ResolverConfig::default(),
            Arc::new(f.clock.clone()),
            Arc::clone(&f.ledger),
        )
        .unwrap()
    }

    /// Writes an OPEN incident the way the dispatcher does.
    fn seed(f: &Fixture, rule_id: &str, period: u32, severity: Severity) -> Incident {
        let rule = Rule::builder(
            rule_id,
            "employment",
            Trigger::threshold(ComparisonOperator::Lt, 1.0),
        )
        .severity(severity)
        .build()
        .unwrap();
        let period = format!("2024-{period:02}");
        let n = Notification::new(&rule, "below", period.clone(), period, f.clock.now());
        let incident = Incident::open(&n, f.clock.now(), &BTreeMap::new());
        f.ledger.append_sealed(&incident.incident_id, &incident).unwrap();
        incident
    }

    mod replay_tests {
        use super::*;

        #[test]
        fn last_record_per_id_wins() {
            let f = fixture();
            let open = seed(&f, "r1", 1, Severity::High);
            let acked = open.acknowledged(f.clock.now()).unwrap();
            f.ledger.append(&acked).unwrap();

            let r = resolver(&f);
            let current = r.get_incident(&open.incident_id).unwrap().unwrap();
            assert_eq!(current.state, IncidentState::Ack);
        }

        #[test]
        fn append_order_beats_timestamps() {
            let f = fixture();
            let open = seed(&f, "r1", 1, Severity::High);
            let mut stale = open.resolved(f.clock.now()).unwrap();
            stale.updated_at = f.clock.now() - Duration::days(30);
            f.ledger.append(&stale).unwrap();

            let r = resolver(&f);
            assert_eq!(
                r.get_incident(&open.incident_id).unwrap().unwrap().state,
                IncidentState::Resolved
            );
        }

        #[test]
        fn sees_writes_from_other_writers() {
            let f = fixture();
            let r = resolver(&f);
            assert!(r.list_incidents(&IncidentFilter::all()).unwrap().is_empty());

            let open = seed(&f, "r1", 1, Severity::Low);
            assert!(r.get_incident(&open.incident_id).unwrap().is_some());
            assert_eq!(r.refresh().unwrap(), 0);
        }

        #[test]
        fn two_resolvers_stay_consistent() {
            let f = fixture();
            let open = seed(&f, "r1", 1, Severity::Low);
            let a = resolver(&f);
            let b = resolver(&f);

            a.acknowledge(&open.incident_id).unwrap();
            assert_eq!(
                b.get_incident(&open.incident_id).unwrap().unwrap().state,
                IncidentState::Ack
            );
        }

        #[test]
        fn partial_trailing_line_is_invisible() {
            let f = fixture();
            let open = seed(&f, "r1", 1, Severity::Low);
            let r = resolver(&f);

            let acked = serde_json::to_string(&open.acknowledged(f.clock.now()).unwrap()).unwrap();
            let (head, tail) = acked.split_at(acked.len() / 2);
            let path = f.dir.path().join("incidents.jsonl");
            let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(head.as_bytes()).unwrap();
            assert_eq!(
                r.get_incident(&open.incident_id).unwrap().unwrap().state,
                IncidentState::Open
            );

            file.write_all(tail.as_bytes()).unwrap();
            file.write_all(b"\n").unwrap();
            assert_eq!(
                r.get_incident(&open.incident_id).unwrap().unwrap().state,
                IncidentState::Ack
            );
        }

        #[test]
        fn zero_threshold_is_rejected() {
            let f = fixture();
            let config = ResolverConfig::default().with_auto_resolve_threshold(0);
            let result =
                IncidentResolver::new(config, Arc::new(f.clock.clone()), Arc::clone(&f.ledger));
            assert!(matches!(result, Err(AlertError::InvalidConfig { .. })));
        }
    }

    mod action_tests {
        use super::*;

        #[test]
        fn acknowledge_then_resolve() {
            let f = fixture();
            let open = seed(&f, "r1", 1, Severity::High);
            let r = resolver(&f);

            f.clock.advance(Duration::minutes(10));
            let acked = r.acknowledge(&open.incident_id).unwrap().unwrap();
            assert_eq!(acked.state, IncidentState::Ack);
            assert_eq!(acked.ack_at, Some(f.clock.now()));

            f.clock.advance(Duration::minutes(10));
            let resolved = r.resolve(&open.incident_id).unwrap().unwrap();
            assert_eq!(resolved.state, IncidentState::Resolved);
            assert_eq!(resolved.resolved_at, Some(f.clock.now()));
            assert_eq!(resolved.ack_at, acked.ack_at);
        }

        #[test]
        fn acknowledge_resolved_is_noop() {
            let f = fixture();
            let open = seed(&f, "r1", 1, Severity::High);
            let r = resolver(&f);
            r.resolve(&open.incident_id).unwrap();
            let lines_before = f.ledger.len_bytes().unwrap();

            let again = r.acknowledge(&open.incident_id).unwrap().unwrap();
            assert_eq!(again.state, IncidentState::Resolved);
            assert!(again.ack_at.is_none());
            assert_eq!(f.ledger.len_bytes().unwrap(), lines_before);
        }

        #[test]
        fn resolve_is_idempotent() {
            let f = fixture();
            let open = seed(&f, "r1", 1, Severity::High);
            let r = resolver(&f);
            let first = r.resolve(&open.incident_id).unwrap().unwrap();

            f.clock.advance(Duration::hours(1));
            let second = r.resolve(&open.incident_id).unwrap().unwrap();
            assert_eq!(first.resolved_at, second.resolved_at);
            assert_eq!(first, second);
        }

        #[test]
        fn silence_rules() {
            let f = fixture();
            let a = seed(&f, "r1", 1, Severity::High);
            let b = seed(&f, "r1", 2, Severity::High);
            let r = resolver(&f);

            r.acknowledge(&a.incident_id).unwrap();
            assert_eq!(r.silence(&a.incident_id).unwrap().unwrap().state, IncidentState::Silenced);

            r.resolve(&b.incident_id).unwrap();
            assert_eq!(r.silence(&b.incident_id).unwrap().unwrap().state, IncidentState::Resolved);
        }

        #[test]
        fn unknown_incident_is_none() {
            let f = fixture();
            let r = resolver(&f);
            assert!(r.acknowledge("missing").unwrap().is_none());
            assert!(r.silence("missing").unwrap().is_none());
            assert!(r.resolve("missing").unwrap().is_none());
            assert!(r.get_incident("missing").unwrap().is_none());
        }

        #[test]
        fn transitions_write_envelopes() {
            let f = fixture();
            let open = seed(&f, "r1", 1, Severity::High);
            let r = resolver(&f);
            r.acknowledge(&open.incident_id).unwrap();
            let envelopes = f.ledger.read_envelopes(&open.incident_id).unwrap();
            assert_eq!(envelopes.len(), 2);
            assert!(envelopes.iter().all(|e| e.verify()));
        }
    }

    mod auto_resolve_tests {
        use super::*;

        #[test]
        fn three_greens_resolve_once() {
            let f = fixture();
            let a = seed(&f, "r1", 1, Severity::High);
            let b = seed(&f, "r1", 2, Severity::High);
            let other = seed(&f, "r2", 1, Severity::High);
            let r = resolver(&f);
            r.acknowledge(&b.incident_id).unwrap();

            assert!(r.record_green_evaluation("r1").unwrap().is_empty());
            assert!(r.record_green_evaluation("r1").unwrap().is_empty());
            let resolved = r.record_green_evaluation("r1").unwrap();
            assert_eq!(resolved.len(), 2);
            assert!(resolved.iter().all(|i| i.metadata[AUTO_RESOLVED_KEY] == true));
            assert!(resolved.iter().all(|i| i.consecutive_green_count == 3));

            assert!(r.record_green_evaluation("r1").unwrap().is_empty());
            assert_eq!(
                r.get_incident(&a.incident_id).unwrap().unwrap().state,
                IncidentState::Resolved
            );
            assert_eq!(
                r.get_incident(&other.incident_id).unwrap().unwrap().state,
                IncidentState::Open
            );
            assert_eq!(
                r.get_incident(&other.incident_id).unwrap().unwrap().consecutive_green_count,
                0
            );
        }

        #[test]
        fn silenced_incidents_are_not_counted() {
            let f = fixture();
            let a = seed(&f, "r1", 1, Severity::High);
            let r = resolver(&f);
            r.silence(&a.incident_id).unwrap();
            for _ in 0..5 {
                assert!(r.record_green_evaluation("r1").unwrap().is_empty());
            }
            assert_eq!(
                r.get_incident(&a.incident_id).unwrap().unwrap().state,
                IncidentState::Silenced
            );
        }

        #[test]
        fn green_count_persists_across_instances() {
            let f = fixture();
            let a = seed(&f, "r1", 1, Severity::High);
            resolver(&f).record_green_evaluation("r1").unwrap();
            resolver(&f).record_green_evaluation("r1").unwrap();
            let resolved = resolver(&f).record_green_evaluation("r1").unwrap();
            assert_eq!(resolved.len(), 1);
            assert_eq!(resolved[0].incident_id, a.incident_id);
        }
    }

    mod query_tests {
        use super::*;

        #[test]
        fn list_filters_and_orders() {
            let f = fixture();
            let first = seed(&f, "r1", 1, Severity::Low);
            f.clock.advance(Duration::hours(1));
            let second = seed(&f, "r1", 2, Severity::High);
            f.clock.advance(Duration::hours(1));
            let third = seed(&f, "r2", 1, Severity::High);
            let r = resolver(&f);
            r.resolve(&first.incident_id).unwrap();

            let all = r.list_incidents(&IncidentFilter::all()).unwrap();
            let ids: Vec<_> = all.iter().map(|i| i.incident_id.clone()).collect();
            assert_eq!(
                ids,
                vec![
                    third.incident_id.clone(),
                    second.incident_id.clone(),
                    first.incident_id.clone(),
                ]
            );

            let open_r1 = r
                .list_incidents(&IncidentFilter::all().rule_id("r1").state(IncidentState::Open))
                .unwrap();
            assert_eq!(open_r1.len(), 1);
            assert_eq!(open_r1[0].incident_id, second.incident_id);

            assert_eq!(r.list_incidents(&IncidentFilter::all().limit(1)).unwrap().len(), 1);
            assert_eq!(r.incidents_for_rule("r1").unwrap().len(), 2);
        }

        #[test]
        fn stats_counts() {
            let f = fixture();
            let a = seed(&f, "r1", 1, Severity::Low);
            seed(&f, "r1", 2, Severity::High);
            seed(&f, "r2", 1, Severity::High);
            for i in 1..=6 {
                seed(&f, &format!("z{i}"), 1, Severity::Critical);
            }
            let r = resolver(&f);
            r.resolve(&a.incident_id).unwrap();

            let stats = r.stats().unwrap();
            assert_eq!(stats.total, 9);
            assert_eq!(stats.open, 8);
            assert_eq!(stats.by_state[&IncidentState::Resolved], 1);
            assert_eq!(stats.by_severity[&Severity::Critical], 6);
            assert_eq!(stats.top_rules.len(), TOP_RULES_LIMIT);
            assert_eq!(stats.top_rules[0], ("r1".to_string(), 2));
            assert_eq!(stats.top_rules[1], ("r2".to_string(), 1));
            assert_eq!(stats.top_rules[2], ("z1".to_string(), 1));
        }
    }
}
