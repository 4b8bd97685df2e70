//! Alert channels

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use super::event::AlertEvent;
use super::smtp::{send_mail, Mail, SmtpSettings};

/// Something an alert can be delivered to
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Unique name within a dispatcher
    fn name(&self) -> &str;

    async fn send(&self, event: &AlertEvent) -> Result<(), NotifierError>;
}

/// Writes alerts to the tracing log
pub struct LogChannel {
    name: String,
}

impl LogChannel {
    pub fn new() -> Self {
        Self {
            name: "log".to_string(),
        }
    }
}

impl Default for LogChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertChannel for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, event: &AlertEvent) -> Result<(), NotifierError> {
        tracing::warn!(
            rule = %event.rule_name,
            severity = %event.severity,
            diff_count = event.diff_count,
            diff_percent = event.diff_percent,
            row_count_table1 = event.row_count_table1,
            row_count_table2 = event.row_count_table2,
            "Monitor alert triggered"
        );
        Ok(())
    }
}

/// POSTs the JSON-serialized event
pub struct WebhookChannel {
    name: String,
    client: reqwest::Client,
    url: String,
    headers: HashMap<String, String>,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>, headers: HashMap<String, String>, timeout: Duration) -> Self {
        Self {
            name: "webhook".to_string(),
            client: http_client(timeout),
            url: url.into(),
            headers,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, event: &AlertEvent) -> Result<(), NotifierError> {
        let mut request = self.client.post(&self.url).json(event);

        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotifierError::Webhook(format!("Failed to send webhook: {}", e)))?;

        if !response.status().is_success() {
            return Err(NotifierError::Webhook(format!(
                "Webhook returned status {}",
                response.status()
            )));
        }

        tracing::debug!(rule = %event.rule_name, url = %self.url, "Webhook notification sent");
        Ok(())
    }
}

/// Payload shape of a chat hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatFormat {
    /// `{"text": ...}`
    Slack,
    /// `{"msgtype": "text", "text": {"content": ...}}`
    DingTalk,
}

impl ChatFormat {
    pub fn payload(&self, event: &AlertEvent) -> serde_json::Value {
        match self {
            ChatFormat::Slack => {
                let text = format!(
                    "*Data monitor alert*\n*Rule:* {}\n*Severity:* {}\n*Diff count:* {}\n*Diff percent:* {:.2}%\n*Table 1 rows:* {}\n*Table 2 rows:* {}\n*Time:* {}",
                    event.rule_name,
                    event.severity,
                    event.diff_count,
                    event.diff_percent,
                    event.row_count_table1,
                    event.row_count_table2,
                    event.timestamp.to_rfc3339()
                );
                serde_json::json!({ "text": text })
            }
            ChatFormat::DingTalk => {
                let text = format!("Data monitor alert\n\n{}", event.summary());
                serde_json::json!({
                    "msgtype": "text",
                    "text": { "content": text }
                })
            }
        }
    }
}

/// Slack / DingTalk style incoming-webhook channel
pub struct ChatHookChannel {
    name: String,
    client: reqwest::Client,
    webhook_url: String,
    format: ChatFormat,
}

impl ChatHookChannel {
    pub fn new(webhook_url: impl Into<String>, format: ChatFormat) -> Self {
        let name = match format {
            ChatFormat::Slack => "slack",
            ChatFormat::DingTalk => "dingtalk",
        };
        Self {
            name: name.to_string(),
            client: http_client(Duration::from_secs(10)),
            webhook_url: webhook_url.into(),
            format,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl AlertChannel for ChatHookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, event: &AlertEvent) -> Result<(), NotifierError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&self.format.payload(event))
            .send()
            .await
            .map_err(|e| NotifierError::ChatHook(format!("Failed to post message: {}", e)))?;

        if !response.status().is_success() {
            return Err(NotifierError::ChatHook(format!(
                "Chat hook returned status {}",
                response.status()
            )));
        }

        tracing::debug!(rule = %event.rule_name, channel = %self.name, "Chat notification sent");
        Ok(())
    }
}

/// Sends alerts by SMTP
pub struct EmailChannel {
    name: String,
    settings: SmtpSettings,
    from: String,
    to: Vec<String>,
}

impl EmailChannel {
    pub fn new(settings: SmtpSettings, from: impl Into<String>, to: Vec<String>) -> Self {
        Self {
            name: "email".to_string(),
            settings,
            from: from.into(),
            to,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl AlertChannel for EmailChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, event: &AlertEvent) -> Result<(), NotifierError> {
        let mail = Mail {
            from: self.from.clone(),
            to: self.to.clone(),
            subject: event.subject(),
            body: event.summary(),
        };
        send_mail(&self.settings, &mail).await?;

        tracing::info!(rule = %event.rule_name, recipients = ?self.to, "Email notification sent");
        Ok(())
    }
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .expect("Failed to create HTTP client")
}

/// Notifier errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum NotifierError {
    #[error("Webhook error: {0}")]
    Webhook(String),

    #[error("Chat hook error: {0}")]
    ChatHook(String),

    #[error("Email error: {0}")]
    Email(String),
}
