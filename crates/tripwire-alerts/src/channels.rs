//! Channel senders and the registry that resolves them.
//!
//! This module provides the [`ChannelSender`] trait, the [`ChannelKind`] tag
//! used on notifications, and a [`ChannelRegistry`] that maps each tag to a
//! sender. Senders are created lazily on first use and cached afterwards.
//! Transports (mail servers, chat APIs, HTTP clients) live outside this
//! crate; the built-in senders only log or prepare payloads.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AlertError, Result};
use crate::notification::Notification;

/// Channel tags a notification can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Structured log line.
    Log,
    /// Generic JSON webhook.
    Webhook,
    /// Email.
    Email,
    /// Slack message.
    Slack,
}

impl ChannelKind {
    /// All channel kinds.
    pub const ALL: [Self; 4] = [Self::Log, Self::Webhook, Self::Email, Self::Slack];

    /// Returns the tag as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Webhook => "webhook",
            Self::Email => "email",
            Self::Slack => "slack",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Delivers a notification over one channel.
pub trait ChannelSender: Send + Sync + fmt::Debug {
    /// The channel this sender serves.
    fn kind(&self) -> ChannelKind;

    /// Sends the notification and returns a short status string.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::NotificationFailed` if delivery fails.
    fn send(&self, notification: &Notification) -> Result<String>;
}

/// Writes notifications to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogChannel;

impl ChannelSender for LogChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Log
    }

    fn send(&self, notification: &Notification) -> Result<String> {
        info!(
            notification_id = %notification.notification_id(),
            rule_id = %notification.rule_id(),
            severity = %notification.severity(),
            scope = %notification.scope(),
            window_start = %notification.window_start(),
            window_end = %notification.window_end(),
            "{}",
            notification.message()
        );
        Ok("logged".to_string())
    }
}

/// Configuration for a webhook channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// The URL notifications are posted to.
    pub url: String,
    /// HTTP headers to include with requests.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl WebhookConfig {
    /// Creates a new webhook configuration.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidConfig` if the URL is empty or not HTTP(S).
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if url.is_empty() {
            return Err(AlertError::InvalidConfig {
                reason: "webhook URL cannot be empty".to_string(),
            });
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AlertError::InvalidConfig {
                reason: format!("webhook URL must be http(s): {url}"),
            });
        }

        Ok(Self {
            url,
            headers: BTreeMap::new(),
        })
    }

    /// Adds a header to the configuration.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Body posted by [`WebhookChannel`].
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload<'a> {
    /// Payload schema version.
    pub version: &'static str,
    /// Always `"firing"`; only OPEN incidents are announced.
    pub status: &'static str,
    /// The notification itself.
    pub notification: &'a Notification,
}

impl<'a> WebhookPayload<'a> {
    /// Wraps a notification.
    #[must_use]
    pub const fn new(notification: &'a Notification) -> Self {
        Self {
            version: "1",
            status: "firing",
            notification,
        }
    }
}

/// Prepares JSON webhook bodies.
///
/// The HTTP transport is supplied by the embedding service; this sender
/// formats and validates the payload and reports it as queued.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    config: WebhookConfig,
}

impl WebhookChannel {
    /// Creates a new webhook channel with the given configuration.
    #[must_use]
    pub const fn new(config: WebhookConfig) -> Self {
        Self { config }
    }

    /// Returns the webhook URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Formats the notification as JSON.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::SerializationError` if serialization fails.
    pub fn format_payload(&self, notification: &Notification) -> Result<String> {
        serde_json::to_string(&WebhookPayload::new(notification)).map_err(AlertError::from)
    }
}

impl ChannelSender for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    fn send(&self, notification: &Notification) -> Result<String> {
        let payload = self.format_payload(notification)?;
        info!(
            url = %self.config.url,
            notification_id = %notification.notification_id(),
            bytes = payload.len(),
            "queued webhook notification"
        );
        debug!(payload = %payload, "webhook payload");
        Ok(format!("queued: {} bytes", payload.len()))
    }
}

type SenderFactory = Box<dyn Fn() -> Result<Arc<dyn ChannelSender>> + Send + Sync>;

/// Maps channel tags to senders, built on first use.
pub struct ChannelRegistry {
    factories: HashMap<ChannelKind, SenderFactory>,
    resolved: RwLock<HashMap<ChannelKind, Arc<dyn ChannelSender>>>,
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut registered: Vec<_> = self.factories.keys().copied().collect();
        registered.sort();
        f.debug_struct("ChannelRegistry")
            .field("registered", &registered)
            .field("resolved", &self.resolved.read().len())
            .finish()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ChannelRegistry {
    /// A registry with no senders.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
            resolved: RwLock::new(HashMap::new()),
        }
    }

    /// A registry with the log channel registered.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(ChannelKind::Log, || Ok(Arc::new(LogChannel) as Arc<dyn ChannelSender>));
        registry
    }

    /// Registers a factory for `kind`, replacing any previous one.
    pub fn register<F>(&mut self, kind: ChannelKind, factory: F)
    where
        F: Fn() -> Result<Arc<dyn ChannelSender>> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Box::new(factory));
        self.resolved.get_mut().remove(&kind);
    }

    /// Registers a ready-made sender under its own kind.
    pub fn register_sender(&mut self, sender: Arc<dyn ChannelSender>) {
        let kind = sender.kind();
        self.register(kind, move || Ok(Arc::clone(&sender)));
    }

    /// Returns true if a sender can be resolved for `kind`.
    #[must_use]
    pub fn is_registered(&self, kind: ChannelKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Returns the sender for `kind`, building it on first use.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::ChannelUnavailable` if nothing is registered for
    /// `kind`, or the factory's error if construction fails (not cached).
    pub fn resolve(&self, kind: ChannelKind) -> Result<Arc<dyn ChannelSender>> {
        if let Some(sender) = self.resolved.read().get(&kind) {
            return Ok(Arc::clone(sender));
        }

        let factory = self
            .factories
            .get(&kind)
            .ok_or_else(|| AlertError::ChannelUnavailable {
                channel: kind.to_string(),
            })?;

        let mut resolved = self.resolved.write();
        if let Some(sender) = resolved.get(&kind) {
            return Ok(Arc::clone(sender));
        }
        let sender = factory()?;
        debug!(channel = %kind, "resolved channel sender");
        resolved.insert(kind, Arc::clone(&sender));
        Ok(sender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ComparisonOperator, Rule, Trigger};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn notification() -> Notification {
        let rule = Rule::builder(
            "r1",
            "employment",
            Trigger::threshold(ComparisonOperator::Lt, 100.0),
        )
        .build()
        .unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Notification::new(&rule, "employment below 100", "2023-01", "2023-12", ts)
    }

    mod kind_tests {
        use super::*;
        use test_case::test_case;

        #[test_case(ChannelKind::Log, "log")]
        #[test_case(ChannelKind::Webhook, "webhook")]
        #[test_case(ChannelKind::Email, "email")]
        #[test_case(ChannelKind::Slack, "slack")]
        fn kind_tags(kind: ChannelKind, tag: &str) {
            assert_eq!(kind.as_str(), tag);
            assert_eq!(serde_json::to_string(&kind).unwrap(), format!("\"{tag}\""));
        }

        #[test]
        fn unknown_tag_is_rejected() {
            assert!(serde_json::from_str::<ChannelKind>("\"pager\"").is_err());
        }
    }

    mod sender_tests {
        use super::*;

        #[test]
        fn log_channel_reports_logged() {
            assert_eq!(LogChannel.send(&notification()).unwrap(), "logged");
        }

        #[test]
        fn webhook_config_validation() {
            assert!(WebhookConfig::new("").is_err());
            assert!(WebhookConfig::new("ftp://example.com").is_err());
            let config = WebhookConfig::new("https://hooks.example.com/x")
                .unwrap()
                .with_header("Authorization", "Bearer t");
            assert_eq!(config.headers.len(), 1);
        }

        #[test]
        fn webhook_payload_wraps_notification() {
            let channel =
                WebhookChannel::new(WebhookConfig::new("https://hooks.example.com/x").unwrap());
            let n = notification();
            let payload: serde_json::Value =
                serde_json::from_str(&channel.format_payload(&n).unwrap()).unwrap();
            assert_eq!(payload["status"], "firing");
            assert_eq!(payload["notification"]["notification_id"], n.notification_id());
            assert_eq!(payload["notification"]["channels"][0], "log");

            let status = channel.send(&n).unwrap();
            assert!(status.starts_with("queued: "));
        }
    }

    mod registry_tests {
        use super::*;

        #[derive(Debug)]
        struct Failing;

        impl ChannelSender for Failing {
            fn kind(&self) -> ChannelKind {
                ChannelKind::Slack
            }

            fn send(&self, _: &Notification) -> Result<String> {
                Err(AlertError::NotificationFailed {
                    reason: "connection refused".to_string(),
                })
            }
        }

        #[test]
        fn defaults_include_log_only() {
            let registry = ChannelRegistry::default();
            assert!(registry.is_registered(ChannelKind::Log));
            assert!(!registry.is_registered(ChannelKind::Email));
        }

        #[test]
        fn unregistered_kind_is_unavailable() {
            let registry = ChannelRegistry::empty();
            match registry.resolve(ChannelKind::Email) {
                Err(AlertError::ChannelUnavailable { channel }) => assert_eq!(channel, "email"),
                other => panic!("expected ChannelUnavailable, got {other:?}"),
            }
        }

        #[test]
        fn factory_runs_once() {
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&calls);
            let mut registry = ChannelRegistry::empty();
            registry.register(ChannelKind::Log, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(LogChannel) as Arc<dyn ChannelSender>)
            });

            registry.resolve(ChannelKind::Log).unwrap();
            registry.resolve(ChannelKind::Log).unwrap();
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }

        #[test]
        fn failed_factory_is_retried() {
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&calls);
            let mut registry = ChannelRegistry::empty();
            registry.register(ChannelKind::Email, move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(AlertError::InvalidConfig {
                        reason: "smtp host missing".to_string(),
                    })
                } else {
                    Ok(Arc::new(LogChannel) as Arc<dyn ChannelSender>)
                }
            });

            assert!(registry.resolve(ChannelKind::Email).is_err());
            assert!(registry.resolve(ChannelKind::Email).is_ok());
        }

        #[test]
        fn register_sender_uses_its_kind() {
            let mut registry = ChannelRegistry::empty();
            registry.register_sender(Arc::new(Failing));
            let sender = registry.resolve(ChannelKind::Slack).unwrap();
            assert!(sender.send(&notification()).is_err());
        }
    }
}
