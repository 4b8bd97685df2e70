//! Fan-out of alert events to every configured channel

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use super::config::{ChannelConfig, ChannelConfigError};
use super::event::AlertEvent;
use super::notifier::AlertChannel;

/// Number of dispatched events kept in memory
pub const ALERT_HISTORY_LIMIT: usize = 1000;

/// Per-channel outcome of one dispatch
#[derive(Debug, Clone, Serialize)]
pub struct ChannelOutcome {
    pub channel: String,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub outcomes: Vec<ChannelOutcome>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.delivered).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }
}

/// Sends alert events to all channels; a failing channel never affects the others
pub struct AlertDispatcher {
    channels: RwLock<Vec<Arc<dyn AlertChannel>>>,
    history: Mutex<VecDeque<AlertEvent>>,
}

impl AlertDispatcher {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(Vec::new()),
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Register a channel; names must be unique
    pub fn add_channel(&self, channel: Arc<dyn AlertChannel>) -> Result<(), ChannelConfigError> {
        let mut channels = self.channels.write();
        if channels.iter().any(|c| c.name() == channel.name()) {
            return Err(ChannelConfigError::DuplicateChannel(channel.name().to_string()));
        }
        tracing::info!(channel = %channel.name(), "Alert channel added");
        channels.push(channel);
        Ok(())
    }

    /// Build and register a channel from its configuration
    pub fn add_channel_config(&self, config: &ChannelConfig) -> Result<String, ChannelConfigError> {
        let channel = config.build()?;
        let name = channel.name().to_string();
        self.add_channel(channel)?;
        Ok(name)
    }

    pub fn remove_channel(&self, name: &str) -> bool {
        let mut channels = self.channels.write();
        let before = channels.len();
        channels.retain(|c| c.name() != name);
        before != channels.len()
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels
            .read()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Deliver `event` to every channel concurrently
    pub async fn dispatch(&self, event: &AlertEvent) -> DispatchReport {
        {
            let mut history = self.history.lock();
            history.push_back(event.clone());
            while history.len() > ALERT_HISTORY_LIMIT {
                history.pop_front();
            }
        }

        // Snapshot so the lock is not held across sends
        let channels: Vec<Arc<dyn AlertChannel>> = self.channels.read().clone();

        let sends = channels.iter().map(|channel| async move {
            let result = channel.send(event).await;
            if let Err(e) = &result {
                tracing::error!(
                    rule = %event.rule_name,
                    channel = %channel.name(),
                    error = %e,
                    "Failed to send notification"
                );
            }
            ChannelOutcome {
                channel: channel.name().to_string(),
                delivered: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            }
        });

        DispatchReport {
            outcomes: futures::future::join_all(sends).await,
        }
    }

    /// Most recent `limit` events, oldest first
    pub fn history(&self, limit: usize) -> Vec<AlertEvent> {
        let history = self.history.lock();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }
}

impl Default for AlertDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::notifier::{LogChannel, NotifierError};
    use crate::gateway::TableRef;
    use crate::monitor::{MonitorKind, MonitorResult, MonitorRule};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingChannel {
        name: String,
        fail: bool,
        sent: AtomicUsize,
    }

    impl CountingChannel {
        fn new(name: &str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                fail,
                sent: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl AlertChannel for CountingChannel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, _event: &AlertEvent) -> Result<(), NotifierError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NotifierError::Webhook("unreachable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn event() -> AlertEvent {
        let rule = MonitorRule::new("r", MonitorKind::RowCount, TableRef::new("a", "t"));
        AlertEvent::from_result(&rule, &MonitorResult::empty("r"))
    }

    #[tokio::test]
    async fn test_failing_channel_is_isolated() {
        let dispatcher = AlertDispatcher::new();
        let broken = CountingChannel::new("broken", true);
        let healthy = CountingChannel::new("healthy", false);
        dispatcher.add_channel(broken.clone()).unwrap();
        dispatcher.add_channel(healthy.clone()).unwrap();
        dispatcher.add_channel(Arc::new(LogChannel::new())).unwrap();

        let report = dispatcher.dispatch(&event()).await;

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.delivered(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(broken.sent.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.sent.load(Ordering::SeqCst), 1);

        let failed = report.outcomes.iter().find(|o| !o.delivered).unwrap();
        assert_eq!(failed.channel, "broken");
        assert!(failed.error.as_deref().unwrap().contains("unreachable"));
    }

    #[tokio::test]
    async fn test_no_channels_still_records_history() {
        let dispatcher = AlertDispatcher::new();
        let report = dispatcher.dispatch(&event()).await;
        assert!(report.outcomes.is_empty());
        assert_eq!(dispatcher.history(10).len(), 1);
    }

    #[test]
    fn test_duplicate_and_remove_channel() {
        let dispatcher = AlertDispatcher::new();
        dispatcher.add_channel(Arc::new(LogChannel::new())).unwrap();
        assert!(matches!(
            dispatcher.add_channel(Arc::new(LogChannel::new())),
            Err(ChannelConfigError::DuplicateChannel(_))
        ));
        assert_eq!(dispatcher.channel_names(), vec!["log".to_string()]);
        assert!(dispatcher.remove_channel("log"));
        assert!(!dispatcher.remove_channel("log"));
    }
}
