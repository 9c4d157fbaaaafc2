//! Notification sinks
//!
//! New records leave the process through a [`NotificationSink`]. Delivery is
//! best-effort: a failed delivery is logged by the caller and the record is
//! not retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{ButtonConfig, Config, TelegramConfig};
use crate::error::{Error, Result};
use crate::types::CanonicalRecord;

/// Destination for new records and status messages
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one newly seen record
    async fn deliver(&self, record: &CanonicalRecord) -> Result<()>;

    /// Send a free-form status message (heartbeats)
    async fn announce(&self, text: &str) -> Result<()>;
}

/// Render a record as a chat message
pub fn format_record(record: &CanonicalRecord) -> String {
    format!(
        "📱 New CDR Record\n\
         ━━━━━━━━━━━━━━━━\n\
         👤 Account: {}\n\
         📞 CLI: {}\n\
         ➡️ To: {}\n\
         ⏱️ Time: {}\n\
         ⏳ Duration: {}\n\
         📌 Type: {}",
        record.account_identifier,
        record.caller_number,
        record.callee_number,
        record.time_label,
        record.duration_label,
        record.type_label,
    )
}

/// Build the sink described by the configuration.
///
/// Uses Telegram when `[telegram]` is present, otherwise logs records.
pub fn from_config(config: &Config) -> Result<Arc<dyn NotificationSink>> {
    match &config.telegram {
        Some(telegram) => Ok(Arc::new(TelegramSink::new(telegram)?)),
        None => Ok(Arc::new(LogSink)),
    }
}

/// Writes records to the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, record: &CanonicalRecord) -> Result<()> {
        tracing::info!(
            id = %record.id,
            account = %record.account_identifier,
            caller = %record.caller_number,
            callee = %record.callee_number,
            time = %record.time_label,
            duration = %record.duration_label,
            kind = %record.type_label,
            "New record"
        );
        Ok(())
    }

    async fn announce(&self, text: &str) -> Result<()> {
        tracing::info!(message = %text, "Status");
        Ok(())
    }
}

/// Sends messages through the Telegram Bot API
pub struct TelegramSink {
    http_client: reqwest::Client,
    endpoint: String,
    chat_id: String,
    keyboard: Option<InlineKeyboardMarkup>,
}

impl TelegramSink {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let token = config.resolve_token()?;
        if config.chat_id.trim().is_empty() {
            return Err(Error::Config("telegram.chat_id is required".to_string()));
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint: format!(
                "{}/bot{}/sendMessage",
                config.api_base.trim_end_matches('/'),
                token
            ),
            chat_id: config.chat_id.clone(),
            keyboard: InlineKeyboardMarkup::from_buttons(&config.buttons),
        })
    }

    async fn send_message(&self, text: &str) -> Result<()> {
        let request = SendMessageRequest {
            chat_id: &self.chat_id,
            text,
            reply_markup: self.keyboard.as_ref(),
        };

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("HTTP request failed: {}", e.without_url())))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Delivery(format!(
                "API error ({}): {}",
                status, error_text
            )))
        }
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn deliver(&self, record: &CanonicalRecord) -> Result<()> {
        self.send_message(&format_record(record)).await?;
        tracing::debug!(id = %record.id, "Sent record to Telegram");
        Ok(())
    }

    async fn announce(&self, text: &str) -> Result<()> {
        self.send_message(text).await
    }
}

/// Request body for POST /bot{token}/sendMessage
#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboardMarkup>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct InlineKeyboardMarkup {
    inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct InlineKeyboardButton {
    text: String,
    url: String,
}

impl InlineKeyboardMarkup {
    /// One button per row; `None` when there are no buttons
    fn from_buttons(buttons: &[ButtonConfig]) -> Option<Self> {
        if buttons.is_empty() {
            return None;
        }
        Some(Self {
            inline_keyboard: buttons
                .iter()
                .map(|b| {
                    vec![InlineKeyboardButton {
                        text: b.label.clone(),
                        url: b.url.clone(),
                    }]
                })
                .collect(),
        })
    }
}

/// Collects everything it is given; optionally refuses deliveries
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub(crate) records: std::sync::Mutex<Vec<CanonicalRecord>>,
    pub(crate) announcements: std::sync::Mutex<Vec<String>>,
    pub(crate) failing: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl RecordingSink {
    pub(crate) fn delivered_ids(&self) -> Vec<String> {
        self.records.lock().unwrap().iter().map(|r| r.id.clone()).collect()
    }
}

#[cfg(test)]
#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, record: &CanonicalRecord) -> Result<()> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::Delivery("sink offline".to_string()));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn announce(&self, text: &str) -> Result<()> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::Delivery("sink offline".to_string()));
        }
        self.announcements.lock().unwrap().push(text.to_string());
        Ok(())
    }
}
