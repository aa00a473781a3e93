//! Deterministic early-warning alerts over economic time series.
//!
//! `tripwire-alerts` turns declarative rules into decisions, decisions into
//! notifications, and notifications into incidents tracked in an
//! append-only ledger.
//!
//! # Components
//!
//! - **Rules**: metric, scope, window and one of five trigger kinds
//!   (threshold, year-over-year delta, slope, structural break, burn rate)
//! - **Evaluation engine**: pure and deterministic given the injected clock
//! - **Dispatcher**: idempotency, suppression and per-rule rate limiting
//!   before fan-out to notification channels
//! - **Resolver**: incident lifecycle replayed from the shared ledger, with
//!   auto-resolution after consecutive green evaluations
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use chrono::{TimeZone, Utc};
//! use tripwire_alerts::{
//!     ComparisonOperator, ManualClock, Pipeline, PipelineOutcome, Rule,
//!     TripwireConfig, Trigger,
//! };
//!
//! # fn main() -> tripwire_alerts::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap());
//! let config = TripwireConfig::default().with_ledger_dir(dir.path());
//! let pipeline = Pipeline::open(&config, Arc::new(clock))?;
//!
//! let rule = Rule::builder(
//!     "unemployment_spike",
//!     "unemployment_rate",
//!     Trigger::threshold(ComparisonOperator::Gt, 0.05),
//! )
//! .window_months(3)
//! .build()?;
//!
//! let periods = ["2024-05", "2024-06", "2024-07"].map(String::from);
//! let outcome = pipeline.process(&rule, &[0.04, 0.05, 0.06], Some(periods.as_slice()))?;
//! assert!(matches!(outcome, PipelineOutcome::Triggered { .. }));
//! assert_eq!(pipeline.resolver().stats()?.open, 1);
//! # Ok(())
//! # }
//! ```
//!
//! The engine can also be used on its own:
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use tripwire_alerts::{EvaluationEngine, Rule, SystemClock, Trigger};
//!
//! let engine = EvaluationEngine::new(Arc::new(SystemClock::new()));
//! let rule = Rule::builder("yoy", "employment", Trigger::yoy_delta_pct(-0.02))
//!     .build()
//!     .unwrap();
//! let decision = engine.evaluate(&rule, &[1.0; 14], None);
//! assert!(!decision.triggered);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod channels;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod evaluators;
pub mod incident;
pub mod notification;
pub mod pipeline;
pub mod resolver;
pub mod types;

// Re-export main types at crate root
pub use channels::{
    ChannelKind, ChannelRegistry, ChannelSender, LogChannel, WebhookChannel, WebhookConfig,
};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{LedgerSettings, TripwireConfig};
pub use dispatcher::{DispatchOutcome, Dispatcher, DispatcherConfig};
pub use engine::{is_inconclusive, BatchOutcome, DataProvider, EvaluationEngine, SeriesData};
pub use error::{AlertError, Result};
pub use evaluators::{Assessment, BurnTier};
pub use incident::{Incident, IncidentState};
pub use notification::{canonical_json, idempotency_key, Notification};
pub use pipeline::{Pipeline, PipelineOutcome};
pub use resolver::{IncidentFilter, IncidentResolver, IncidentStats, ResolverConfig};
pub use types::{
    is_allowed_metric, is_rate_metric, ComparisonOperator, Decision, Evidence, Rule, RuleBuilder,
    Scope, ScopeLevel, Severity, Trigger, Window, ALLOWED_METRICS,
};
