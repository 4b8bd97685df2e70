//! Alert channel configuration

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::notifier::{
    AlertChannel, ChatFormat, ChatHookChannel, EmailChannel, LogChannel, WebhookChannel,
};
use super::smtp::SmtpSettings;

/// Channel kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Log,
    Email,
    Webhook,
    Slack,
    #[serde(alias = "ding_talk")]
    Dingtalk,
}

/// A channel as described by a caller: kind tag plus option map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub kind: ChannelKind,
    /// Overrides the default channel name (the kind tag)
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub options: HashMap<String, Value>,
}

impl ChannelConfig {
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            name: None,
            options: HashMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Build the channel described by this config
    pub fn build(&self) -> Result<Arc<dyn AlertChannel>, ChannelConfigError> {
        let options = Options(&self.options);

        let channel: Arc<dyn AlertChannel> = match self.kind {
            ChannelKind::Log => Arc::new(LogChannel::new()),
            ChannelKind::Webhook => {
                let url = options.required_str(&["url"])?;
                let headers = options.string_map(&["headers"])?;
                let timeout = options.u64(&["timeout_secs", "timeout"])?.unwrap_or(10);
                let mut channel =
                    WebhookChannel::new(url, headers, Duration::from_secs(timeout));
                if let Some(name) = &self.name {
                    channel = channel.with_name(name.clone());
                }
                Arc::new(channel)
            }
            ChannelKind::Slack | ChannelKind::Dingtalk => {
                let url = options.required_str(&["webhook_url", "webhookUrl", "url"])?;
                let format = if self.kind == ChannelKind::Slack {
                    ChatFormat::Slack
                } else {
                    ChatFormat::DingTalk
                };
                let mut channel = ChatHookChannel::new(url, format);
                if let Some(name) = &self.name {
                    channel = channel.with_name(name.clone());
                }
                Arc::new(channel)
            }
            ChannelKind::Email => {
                let host = options
                    .str(&["smtp_host", "smtpHost"])?
                    .unwrap_or_else(|| "localhost".to_string());
                let port = options.u64(&["smtp_port", "smtpPort"])?.unwrap_or(25);
                let port = u16::try_from(port).map_err(|_| {
                    ChannelConfigError::InvalidOption {
                        key: "smtp_port".to_string(),
                        reason: format!("{} is not a valid port", port),
                    }
                })?;
                let from = options
                    .str(&["from_email", "fromEmail"])?
                    .unwrap_or_else(|| "data-monitor@example.com".to_string());
                let to = options.string_list(&["to_emails", "toEmails"])?;
                if to.is_empty() {
                    return Err(ChannelConfigError::MissingOption("to_emails".to_string()));
                }

                let settings = SmtpSettings {
                    host,
                    port,
                    username: options.str(&["smtp_user", "smtpUser"])?,
                    password: options.str(&["smtp_password", "smtpPassword"])?,
                    timeout: Duration::from_secs(
                        options.u64(&["timeout_secs", "timeout"])?.unwrap_or(30),
                    ),
                };
                let mut channel = EmailChannel::new(settings, from, to);
                if let Some(name) = &self.name {
                    channel = channel.with_name(name.clone());
                }
                Arc::new(channel)
            }
        };

        Ok(channel)
    }
}

/// Typed lookups over the option map, accepting several spellings per key
struct Options<'a>(&'a HashMap<String, Value>);

impl<'a> Options<'a> {
    fn lookup(&self, keys: &[&str]) -> Option<(&'a str, &'a Value)> {
        keys.iter()
            .find_map(|k| self.0.get_key_value(*k))
            .map(|(k, v)| (k.as_str(), v))
    }

    fn str(&self, keys: &[&str]) -> Result<Option<String>, ChannelConfigError> {
        match self.lookup(keys) {
            None | Some((_, Value::Null)) => Ok(None),
            Some((_, Value::String(s))) => Ok(Some(s.clone())),
            Some((key, _)) => Err(invalid(key, "expected a string")),
        }
    }

    fn required_str(&self, keys: &[&str]) -> Result<String, ChannelConfigError> {
        self.str(keys)?
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ChannelConfigError::MissingOption(keys[0].to_string()))
    }

    fn u64(&self, keys: &[&str]) -> Result<Option<u64>, ChannelConfigError> {
        match self.lookup(keys) {
            None | Some((_, Value::Null)) => Ok(None),
            Some((key, Value::Number(n))) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| invalid(key, "expected a non-negative integer")),
            Some((key, Value::String(s))) => s
                .parse()
                .map(Some)
                .map_err(|_| invalid(key, "expected a non-negative integer")),
            Some((key, _)) => Err(invalid(key, "expected a non-negative integer")),
        }
    }

    fn string_list(&self, keys: &[&str]) -> Result<Vec<String>, ChannelConfigError> {
        match self.lookup(keys) {
            None | Some((_, Value::Null)) => Ok(Vec::new()),
            // "a@x.com, b@x.com"
            Some((_, Value::String(s))) => Ok(s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()),
            Some((key, Value::Array(items))) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(String::from)
                        .ok_or_else(|| invalid(key, "expected a list of strings"))
                })
                .collect(),
            Some((key, _)) => Err(invalid(key, "expected a list of strings")),
        }
    }

    fn string_map(&self, keys: &[&str]) -> Result<HashMap<String, String>, ChannelConfigError> {
        match self.lookup(keys) {
            None | Some((_, Value::Null)) => Ok(HashMap::new()),
            Some((key, Value::Object(map))) => map
                .iter()
                .map(|(k, v)| {
                    v.as_str()
                        .map(|s| (k.clone(), s.to_string()))
                        .ok_or_else(|| invalid(key, "header values must be strings"))
                })
                .collect(),
            Some((key, _)) => Err(invalid(key, "expected an object")),
        }
    }
}

fn invalid(key: &str, reason: &str) -> ChannelConfigError {
    ChannelConfigError::InvalidOption {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

/// Channel configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChannelConfigError {
    #[error("Missing channel option: {0}")]
    MissingOption(String),

    #[error("Invalid channel option {key}: {reason}")]
    InvalidOption { key: String, reason: String },

    #[error("Channel already configured: {0}")]
    DuplicateChannel(String),
}
