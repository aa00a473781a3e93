//! Notification dispatcher.
//!
//! A dispatch runs five gates in order and stops at the first rejection:
//! deduplication, per-rule rate limiting, per-rule suppression, channel
//! fan-out, and finally the ledger write of the OPEN incident. Rejections
//! are ordinary [`DispatchOutcome`] values; only ledger failures are errors.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use tripwire_ledger::{Ledger, LedgerCursor};

use crate::channels::{ChannelKind, ChannelRegistry};
use crate::clock::SharedClock;
use crate::error::{AlertError, Result};
use crate::incident::Incident;
use crate::notification::Notification;

/// Status reported by every channel in dry-run mode.
pub const DRY_RUN_STATUS: &str = "dry_run";

/// Configuration for the [`Dispatcher`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatcherConfig {
    /// Maximum dispatches per rule within the rolling window.
    pub rate_limit_per_rule: u32,
    /// Length of the rolling rate-limit window.
    pub rate_limit_window_minutes: u32,
    /// Skip channel I/O and report [`DRY_RUN_STATUS`] for every channel.
    pub dry_run: bool,
    /// Channels used when a caller does not choose any.
    pub default_channels: Vec<ChannelKind>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_rule: 10,
            rate_limit_window_minutes: 60,
            dry_run: false,
            default_channels: vec![ChannelKind::Log],
        }
    }
}

impl DispatcherConfig {
    /// Sets the per-rule rate limit.
    #[must_use]
    pub const fn with_rate_limit(mut self, per_rule: u32, window_minutes: u32) -> Self {
        self.rate_limit_per_rule = per_rule;
        self.rate_limit_window_minutes = window_minutes;
        self
    }

    /// Enables or disables dry-run mode.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Sets the default channels.
    #[must_use]
    pub fn with_default_channels(mut self, channels: Vec<ChannelKind>) -> Self {
        self.default_channels = channels;
        self
    }

    /// Checks the limits are usable.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidConfig` if a limit is zero.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit_per_rule == 0 {
            return Err(AlertError::InvalidConfig {
                reason: "rate_limit_per_rule must be at least 1".to_string(),
            });
        }
        if self.rate_limit_window_minutes == 0 {
            return Err(AlertError::InvalidConfig {
                reason: "rate_limit_window_minutes must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    fn window(&self) -> Duration {
        Duration::minutes(i64::from(self.rate_limit_window_minutes))
    }
}

/// What happened to one dispatch attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The idempotency key was already dispatched.
    Deduplicated,
    /// The rule hit its rate limit.
    RateLimited,
    /// The rule is suppressed.
    Suppressed,
    /// Channels were attempted and the OPEN incident was written.
    Dispatched {
        /// Per-channel status strings, keyed by channel tag.
        results: BTreeMap<String, String>,
        /// The incident record appended to the ledger.
        incident: Box<Incident>,
    },
}

impl DispatchOutcome {
    /// Returns the status tag.
    #[must_use]
    pub const fn status(&self) -> &'static str {
        match self {
            Self::Deduplicated => "deduplicated",
            Self::RateLimited => "rate_limited",
            Self::Suppressed => "suppressed",
            Self::Dispatched { .. } => "dispatched",
        }
    }

    /// Returns true if the notification went out.
    #[must_use]
    pub const fn is_dispatched(&self) -> bool {
        matches!(self, Self::Dispatched { .. })
    }

    /// The incident written by a successful dispatch.
    #[must_use]
    pub fn incident(&self) -> Option<&Incident> {
        match self {
            Self::Dispatched { incident, .. } => Some(incident),
            _ => None,
        }
    }

    /// Flat status mapping: `{"status": ..}` plus one entry per channel.
    #[must_use]
    pub fn status_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        if let Self::Dispatched { results, .. } = self {
            map.extend(results.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        map.insert("status".to_string(), self.status().to_string());
        map
    }
}

/// Rolling per-rule attempt timestamps.
#[derive(Debug, Default)]
struct SlidingWindow {
    timestamps: VecDeque<DateTime<Utc>>,
}

impl SlidingWindow {
    fn prune(&mut self, cutoff: DateTime<Utc>) {
        while self.timestamps.front().is_some_and(|t| *t < cutoff) {
            self.timestamps.pop_front();
        }
    }

    fn try_record(&mut self, now: DateTime<Utc>, window: Duration, max: u32) -> bool {
        self.prune(now - window);
        if self.timestamps.len() < max as usize {
            self.timestamps.push_back(now);
            true
        } else {
            false
        }
    }
}

/// Idempotency keys already claimed, in process or in the ledger.
#[derive(Debug, Default)]
struct DedupKeys {
    keys: HashSet<String>,
    cursor: LedgerCursor,
}

impl DedupKeys {
    /// Pulls incident ids appended since the last sync, by any writer.
    fn sync(&mut self, ledger: &Ledger) -> Result<usize> {
        let batch = self.cursor.poll::<Incident>(ledger)?;
        let before = self.keys.len();
        self.keys.extend(batch.records.into_iter().map(|i| i.incident_id));
        Ok(self.keys.len() - before)
    }
}

/// Turns notifications into channel deliveries and OPEN incidents.
///
/// All gate state is owned by the instance; construct one per service and
/// share it by reference. Deduplication also covers every incident already
/// in the ledger, so a restarted dispatcher never reopens an incident.
#[derive(Debug)]
pub struct Dispatcher {
    config: DispatcherConfig,
    clock: SharedClock,
    ledger: Arc<Ledger>,
    registry: ChannelRegistry,
    dedup: Mutex<DedupKeys>,
    rate_windows: Mutex<HashMap<String, SlidingWindow>>,
    suppressions: Mutex<HashMap<String, DateTime<Utc>>>,
    dispatched: AtomicU64,
}

impl Dispatcher {
    /// Creates a dispatcher with the default channel registry.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidConfig` if the configuration is invalid,
    /// or `AlertError::Ledger` if the existing ledger cannot be read.
    pub fn new(config: DispatcherConfig, clock: SharedClock, ledger: Arc<Ledger>) -> Result<Self> {
        Self::with_registry(config, clock, ledger, ChannelRegistry::with_defaults())
    }

    /// Creates a dispatcher with a custom channel registry.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidConfig` if the configuration is invalid,
    /// or `AlertError::Ledger` if the existing ledger cannot be read.
    pub fn with_registry(
        config: DispatcherConfig,
        clock: SharedClock,
        ledger: Arc<Ledger>,
        registry: ChannelRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let mut dedup = DedupKeys::default();
        let known = dedup.sync(&ledger)?;
        debug!(known, "loaded dispatched keys from ledger");
        Ok(Self {
            config,
            clock,
            ledger,
            registry,
            dedup: Mutex::new(dedup),
            rate_windows: Mutex::new(HashMap::new()),
            suppressions: Mutex::new(HashMap::new()),
            dispatched: AtomicU64::new(0),
        })
    }

    /// The dispatcher configuration.
    #[must_use]
    pub const fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// The shared ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Runs the dispatch gates for `notification`.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Ledger` if the ledger cannot be read or the
    /// incident could not be persisted. The key is released only when the
    /// incident line itself was not written, so a retry never duplicates it.
    pub fn dispatch(&self, notification: &Notification) -> Result<DispatchOutcome> {
        let key = notification.notification_id();
        let rule_id = notification.rule_id();

        {
            let mut dedup = self.dedup.lock();
            dedup.sync(&self.ledger)?;
            if !dedup.keys.insert(key.to_string()) {
                debug!(notification_id = %key, rule_id = %rule_id, "deduplicated notification");
                return Ok(DispatchOutcome::Deduplicated);
            }
        }

        let now = self.clock.now();

        let allowed = self
            .rate_windows
            .lock()
            .entry(rule_id.to_string())
            .or_default()
            .try_record(now, self.config.window(), self.config.rate_limit_per_rule);
        if !allowed {
            self.release(key);
            debug!(
                rule_id = %rule_id,
                limit = self.config.rate_limit_per_rule,
                "rate limited notification"
            );
            return Ok(DispatchOutcome::RateLimited);
        }

        if let Some(until) = self.active_suppression(rule_id, now) {
            self.release(key);
            debug!(rule_id = %rule_id, until = %until, "suppressed notification");
            return Ok(DispatchOutcome::Suppressed);
        }

        let results = self.fan_out(notification);
        let incident = Incident::open(notification, now, &results);

        if let Err(e) = self.ledger.append_sealed(&incident.incident_id, &incident) {
            if !e.record_written() {
                self.release(key);
            }
            return Err(e.into());
        }

        self.dispatched.fetch_add(1, Ordering::Relaxed);
        info!(
            notification_id = %key,
            rule_id = %rule_id,
            severity = %notification.severity(),
            channels = results.len(),
            "dispatched notification"
        );

        Ok(DispatchOutcome::Dispatched {
            results,
            incident: Box::new(incident),
        })
    }

    fn fan_out(&self, notification: &Notification) -> BTreeMap<String, String> {
        let mut results = BTreeMap::new();
        for &channel in notification.channels() {
            let status = if self.config.dry_run {
                DRY_RUN_STATUS.to_string()
            } else {
                match self
                    .registry
                    .resolve(channel)
                    .and_then(|sender| sender.send(notification))
                {
                    Ok(status) => status,
                    Err(e) => {
                        warn!(
                            channel = %channel,
                            notification_id = %notification.notification_id(),
                            error = %e,
                            "channel send failed"
                        );
                        format!("error: {e}")
                    }
                }
            };
            results.insert(channel.to_string(), status);
        }
        results
    }

    fn release(&self, key: &str) {
        self.dedup.lock().keys.remove(key);
    }

    fn active_suppression(&self, rule_id: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut suppressions = self.suppressions.lock();
        match suppressions.get(rule_id).copied() {
            Some(until) if now < until => Some(until),
            Some(_) => {
                suppressions.remove(rule_id);
                None
            }
            None => None,
        }
    }

    /// Suppresses `rule_id` for `duration`, overwriting any earlier expiry.
    /// Returns the new expiry.
    pub fn suppress(&self, rule_id: &str, duration: Duration) -> DateTime<Utc> {
        let until = self.clock.now() + duration;
        self.suppressions.lock().insert(rule_id.to_string(), until);
        info!(rule_id = %rule_id, until = %until, "suppression set");
        until
    }

    /// Removes the suppression on `rule_id`. Returns false if none was set.
    pub fn clear_suppression(&self, rule_id: &str) -> bool {
        let removed = self.suppressions.lock().remove(rule_id).is_some();
        if removed {
            info!(rule_id = %rule_id, "suppression cleared");
        } else {
            debug!(rule_id = %rule_id, "no suppression to clear");
        }
        removed
    }

    /// Returns true if dispatches for `rule_id` are currently suppressed.
    #[must_use]
    pub fn is_suppressed(&self, rule_id: &str) -> bool {
        self.suppressed_until(rule_id).is_some()
    }

    /// The active suppression expiry for `rule_id`.
    #[must_use]
    pub fn suppressed_until(&self, rule_id: &str) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        self.suppressions
            .lock()
            .get(rule_id)
            .copied()
            .filter(|until| now < *until)
    }

    /// Attempts recorded for `rule_id` within the current window.
    #[must_use]
    pub fn rate_limit_count(&self, rule_id: &str) -> usize {
        let cutoff = self.clock.now() - self.config.window();
        self.rate_windows.lock().get_mut(rule_id).map_or(0, |w| {
            w.prune(cutoff);
            w.timestamps.len()
        })
    }

    /// Number of successful dispatches by this instance.
    #[must_use]
    pub fn dispatched_count(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Drops every in-process key and rebuilds the set from the ledger.
    /// Returns the number of keys loaded. Incidents already in the ledger
    /// stay deduplicated.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Ledger` if the ledger cannot be read.
    pub fn reset_dedup(&self) -> Result<usize> {
        let mut dedup = self.dedup.lock();
        *dedup = DedupKeys::default();
        let count = dedup.sync(&self.ledger)?;
        info!(count, "rebuilt deduplication keys from ledger");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelSender;
    use crate::clock::ManualClock;
    use crate::incident::{IncidentState, DISPATCH_RESULTS_KEY};
    use crate::resolver::{IncidentResolver, ResolverConfig};
    use crate::types::{ComparisonOperator, Rule, Trigger};
    use chrono::TimeZone;
    use tempfile::TempDir;
    use tripwire_ledger::{LedgerError, ReadBatch};

    struct Fixture {
        dir: TempDir,
        clock: ManualClock,
        ledger: Arc<Ledger>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(Ledger::in_dir(dir.path()).unwrap());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap());
        Fixture {
            dir,
            clock,
            ledger,
        }
    }

    fn dispatcher(f: &Fixture, config: DispatcherConfig) -> Dispatcher {
        Dispatcher::new(config, Arc::new(f.clock.clone()), Arc::clone(&f.ledger)).unwrap()
    }

    fn rule(id: &str) -> Rule {
        Rule::builder(id, "unemployment_rate", Trigger::threshold(ComparisonOperator::Gt, 0.05))
            .build()
            .unwrap()
    }

    fn notification(rule_id: &str, period: u32) -> Notification {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        Notification::new(
            &rule(rule_id),
            "unemployment above 5%",
            format!("2023-{period:02}"),
            format!("2024-{period:02}"),
            ts,
        )
    }

    fn ledger_lines(ledger: &Ledger) -> Vec<Incident> {
        let batch: ReadBatch<Incident> = ledger.read_all().unwrap();
        batch.records
    }

    mod config_tests {
        use super::*;

        #[test]
        fn default_config() {
            let config = DispatcherConfig::default();
            assert_eq!(config.rate_limit_per_rule, 10);
            assert_eq!(config.rate_limit_window_minutes, 60);
            assert!(!config.dry_run);
            assert_eq!(config.default_channels, vec![ChannelKind::Log]);
        }

        #[test]
        fn zero_limit_is_rejected() {
            let f = fixture();
            let config = DispatcherConfig::default().with_rate_limit(0, 60);
            let result = Dispatcher::new(config, Arc::new(f.clock.clone()), Arc::clone(&f.ledger));
            assert!(matches!(result, Err(AlertError::InvalidConfig { .. })));
        }

        #[test]
        fn partial_json_uses_defaults() {
            let config: DispatcherConfig = serde_json::from_str(r#"{"dry_run": true}"#).unwrap();
            assert!(config.dry_run);
            assert_eq!(config.rate_limit_per_rule, 10);
        }
    }

    mod dedup_tests {
        use super::*;

        #[test]
        fn second_dispatch_is_deduplicated() {
            let f = fixture();
            let d = dispatcher(&f, DispatcherConfig::default());
            let n = notification("r1", 1);

            let first = d.dispatch(&n).unwrap();
            assert_eq!(first.status(), "dispatched");
            assert_eq!(first.status_map()["log"], "logged");

            let second = d.dispatch(&n).unwrap();
            assert_eq!(second, DispatchOutcome::Deduplicated);
            assert_eq!(second.status_map().len(), 1);

            assert_eq!(ledger_lines(&f.ledger).len(), 1);
            assert_eq!(d.dispatched_count(), 1);
        }

        #[test]
        fn reset_dedup_keeps_ledger_keys() {
            let f = fixture();
            let d = dispatcher(&f, DispatcherConfig::default());
            let n = notification("r1", 1);
            d.dispatch(&n).unwrap();

            assert_eq!(d.reset_dedup().unwrap(), 1);
            assert_eq!(d.dispatch(&n).unwrap(), DispatchOutcome::Deduplicated);
            assert_eq!(ledger_lines(&f.ledger).len(), 1);
        }

        #[test]
        fn restarted_dispatcher_does_not_reopen_resolved_incident() {
            let f = fixture();
            let n = notification("r1", 1);
            let first = dispatcher(&f, DispatcherConfig::default());
            let incident_id = first.dispatch(&n).unwrap().incident().unwrap().incident_id.clone();

            let resolver = IncidentResolver::new(
                ResolverConfig::default(),
                Arc::new(f.clock.clone()),
                Arc::clone(&f.ledger),
            )
            .unwrap();
            let resolved = resolver.resolve(&incident_id).unwrap().unwrap();
            assert!(resolved.resolved_at.is_some());

            let second = dispatcher(&f, DispatcherConfig::default());
            assert_eq!(second.dispatch(&n).unwrap(), DispatchOutcome::Deduplicated);

            let current = resolver.get_incident(&incident_id).unwrap().unwrap();
            assert_eq!(current.state, IncidentState::Resolved);
            assert_eq!(current.resolved_at, resolved.resolved_at);
            assert_eq!(ledger_lines(&f.ledger).len(), 2);
        }

        #[test]
        fn incident_written_by_another_dispatcher_is_deduplicated() {
            let f = fixture();
            let a = dispatcher(&f, DispatcherConfig::default());
            let b = dispatcher(&f, DispatcherConfig::default());
            let n = notification("r1", 1);

            assert!(a.dispatch(&n).unwrap().is_dispatched());
            assert_eq!(b.dispatch(&n).unwrap(), DispatchOutcome::Deduplicated);
            assert_eq!(ledger_lines(&f.ledger).len(), 1);
        }

        #[test]
        fn envelope_failure_keeps_key() {
            let f = fixture();
            let envelopes = f.dir.path().join("envelopes");
            std::fs::remove_dir(&envelopes).unwrap();
            std::fs::write(&envelopes, b"blocked").unwrap();

            let d = dispatcher(&f, DispatcherConfig::default());
            let n = notification("r1", 1);
            let err = d.dispatch(&n).unwrap_err();
            assert!(matches!(err, AlertError::Ledger(LedgerError::EnvelopeWrite { .. })));

            assert_eq!(d.dispatch(&n).unwrap(), DispatchOutcome::Deduplicated);
            assert_eq!(ledger_lines(&f.ledger).len(), 1);
        }

        #[test]
        fn concurrent_duplicates_write_once() {
            let f = fixture();
            let d = Arc::new(dispatcher(&f, DispatcherConfig::default().with_dry_run(true)));
            let n = notification("r1", 1);

            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let d = Arc::clone(&d);
                    let n = n.clone();
                    std::thread::spawn(move || d.dispatch(&n).unwrap())
                })
                .collect();
            let dispatched = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(DispatchOutcome::is_dispatched)
                .count();

            assert_eq!(dispatched, 1);
            assert_eq!(ledger_lines(&f.ledger).len(), 1);
        }
    }

    mod rate_limit_tests {
        use super::*;

        #[test]
        fn limit_plus_one_is_rejected() {
            let f = fixture();
            let d = dispatcher(&f, DispatcherConfig::default().with_rate_limit(3, 60));

            for period in 1..=3 {
                assert!(d.dispatch(&notification("r1", period)).unwrap().is_dispatched());
            }
            let fourth = d.dispatch(&notification("r1", 4)).unwrap();
            assert_eq!(fourth, DispatchOutcome::RateLimited);
            assert_eq!(d.rate_limit_count("r1"), 3);

            // other rules are independent
            assert!(d.dispatch(&notification("r2", 4)).unwrap().is_dispatched());
        }

        #[test]
        fn window_rolls_forward() {
            let f = fixture();
            let d = dispatcher(&f, DispatcherConfig::default().with_rate_limit(1, 60));
            assert!(d.dispatch(&notification("r1", 1)).unwrap().is_dispatched());
            assert_eq!(d.dispatch(&notification("r1", 2)).unwrap(), DispatchOutcome::RateLimited);

            f.clock.advance(Duration::minutes(61));
            assert_eq!(d.rate_limit_count("r1"), 0);
            assert!(d.dispatch(&notification("r1", 2)).unwrap().is_dispatched());
        }

        #[test]
        fn rate_limited_key_is_not_remembered() {
            let f = fixture();
            let d = dispatcher(&f, DispatcherConfig::default().with_rate_limit(1, 60));
            d.dispatch(&notification("r1", 1)).unwrap();
            let n = notification("r1", 2);
            assert_eq!(d.dispatch(&n).unwrap(), DispatchOutcome::RateLimited);
            f.clock.advance(Duration::hours(2));
            assert!(d.dispatch(&n).unwrap().is_dispatched());
        }
    }

    mod suppression_tests {
        use super::*;

        #[test]
        fn suppressed_rule_is_rejected_until_expiry() {
            let f = fixture();
            let d = dispatcher(&f, DispatcherConfig::default());
            let until = d.suppress("r1", Duration::minutes(30));
            assert!(d.is_suppressed("r1"));
            assert_eq!(d.suppressed_until("r1"), Some(until));

            assert_eq!(d.dispatch(&notification("r1", 1)).unwrap(), DispatchOutcome::Suppressed);
            assert!(ledger_lines(&f.ledger).is_empty());

            f.clock.advance(Duration::minutes(30));
            assert!(!d.is_suppressed("r1"));
            assert!(d.dispatch(&notification("r1", 1)).unwrap().is_dispatched());
        }

        #[test]
        fn suppress_overwrites_expiry() {
            let f = fixture();
            let d = dispatcher(&f, DispatcherConfig::default());
            d.suppress("r1", Duration::hours(5));
            let until = d.suppress("r1", Duration::minutes(1));
            assert_eq!(d.suppressed_until("r1"), Some(until));
        }

        #[test]
        fn clear_suppression_reports_not_found() {
            let f = fixture();
            let d = dispatcher(&f, DispatcherConfig::default());
            assert!(!d.clear_suppression("r1"));
            d.suppress("r1", Duration::hours(1));
            assert!(d.clear_suppression("r1"));
            assert!(!d.is_suppressed("r1"));
            assert!(d.dispatch(&notification("r1", 1)).unwrap().is_dispatched());
        }
    }

    mod fan_out_tests {
        use super::*;
        use crate::clock::Clock;

        #[derive(Debug)]
        struct Broken;

        impl ChannelSender for Broken {
            fn kind(&self) -> ChannelKind {
                ChannelKind::Webhook
            }

            fn send(&self, _: &Notification) -> Result<String> {
                Err(AlertError::NotificationFailed {
                    reason: "connection refused".to_string(),
                })
            }
        }

        #[test]
        fn channel_failure_does_not_block_others() {
            let f = fixture();
            let mut registry = ChannelRegistry::with_defaults();
            registry.register_sender(Arc::new(Broken));
            let d = Dispatcher::with_registry(
                DispatcherConfig::default(),
                Arc::new(f.clock.clone()),
                Arc::clone(&f.ledger),
                registry,
            )
            .unwrap();

            let n = notification("r1", 1).with_channels([
                ChannelKind::Webhook,
                ChannelKind::Slack,
                ChannelKind::Log,
            ]);
            let outcome = d.dispatch(&n).unwrap();
            let map = outcome.status_map();
            assert_eq!(map["status"], "dispatched");
            assert_eq!(map["webhook"], "error: notification failed: connection refused");
            assert!(map["slack"].starts_with("error: no sender registered"));
            assert_eq!(map["log"], "logged");
        }

        #[test]
        fn dry_run_reports_fixed_status() {
            let f = fixture();
            let d = dispatcher(&f, DispatcherConfig::default().with_dry_run(true));
            let n = notification("r1", 1).with_channels([ChannelKind::Email, ChannelKind::Slack]);
            let map = d.dispatch(&n).unwrap().status_map();
            assert_eq!(map["email"], DRY_RUN_STATUS);
            assert_eq!(map["slack"], DRY_RUN_STATUS);
        }

        #[test]
        fn ledger_record_is_open_with_results() {
            let f = fixture();
            let d = dispatcher(&f, DispatcherConfig::default());
            let n = notification("r1", 1);
            let outcome = d.dispatch(&n).unwrap();

            let lines = ledger_lines(&f.ledger);
            assert_eq!(lines.len(), 1);
            let incident = &lines[0];
            assert_eq!(Some(incident), outcome.incident());
            assert_eq!(incident.state, IncidentState::Open);
            assert_eq!(incident.incident_id, n.notification_id());
            assert_eq!(incident.created_at, f.clock.now());
            assert_eq!(incident.metadata[DISPATCH_RESULTS_KEY]["log"], "logged");

            let envelopes = f.ledger.read_envelopes(&incident.incident_id).unwrap();
            assert_eq!(envelopes.len(), 1);
            assert!(envelopes[0].verify());
            assert_eq!(envelopes[0].algorithm, "sha256");
        }
    }
}
