//! Telegram Bot API notifier with a background sender.

use super::{BoxFuture, Notifier};
use crate::config::TelegramConfig;
use crate::error::{snippet, AppError};
use crate::services::retry::RetryPolicy;
use crate::sources::http_client;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
struct Outgoing {
    text: String,
    urgent: bool,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
    disable_notification: bool,
}

struct TelegramSender {
    client: Client,
    url: String,
    chat_id: String,
    retry: RetryPolicy,
}

impl TelegramSender {
    async fn deliver(&self, message: &Outgoing) -> bool {
        let text = sanitize_text(&message.text);
        let result = self
            .retry
            .run(
                "Telegram send",
                || self.post(&text, Some("Markdown"), !message.urgent),
                AppError::is_transient,
            )
            .await;

        match result {
            Ok(()) => {
                let preview: String = text.chars().take(50).collect();
                info!("Sent Telegram message: {}...", preview);
                true
            }
            Err(e) => {
                error!("Failed to send Telegram message: {}", e);
                false
            }
        }
    }

    async fn post(&self, text: &str, parse_mode: Option<&str>, silent: bool) -> Result<(), AppError> {
        let request = SendMessageRequest {
            chat_id: &self.chat_id,
            text,
            parse_mode,
            disable_notification: silent,
        };
        let response = self.client.post(&self.url).json(&request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if parse_mode.is_some() && is_markdown_rejection(status, &body) {
            warn!("Telegram rejected Markdown, resending as plain text");
            let plain = SendMessageRequest {
                parse_mode: None,
                ..request
            };
            let retry = self.client.post(&self.url).json(&plain).send().await?;
            if retry.status().is_success() {
                return Ok(());
            }
            return Err(AppError::Notification(format!(
                "Telegram plain text retry failed: {}",
                retry.status()
            )));
        }

        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            // bad token or chat id; retrying will not help
            error!("Telegram API returned {}: {}", status, snippet(&body));
            return Ok(());
        }
        Err(AppError::Notification(format!("Telegram API returned {}", status)))
    }
}

/// Queues messages and sends them from a background task so callers never wait on HTTP.
pub struct TelegramNotifier {
    tx: mpsc::UnboundedSender<Outgoing>,
    pending: Arc<AtomicUsize>,
}

impl TelegramNotifier {
    /// Start the sender task. None when the bot token or chat id is missing.
    pub fn spawn(config: &TelegramConfig) -> Option<Self> {
        let token = config.bot_token.as_deref()?;
        let chat_id = config.chat_id.as_deref()?;

        let sender = TelegramSender {
            client: http_client(Duration::from_secs(10)),
            url: format!("{}/bot{}/sendMessage", config.api_url.trim_end_matches('/'), token),
            chat_id: chat_id.to_string(),
            retry: RetryPolicy::new(3, Duration::from_secs(1), 2.0),
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();
        let pending = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::clone(&pending);

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                sender.deliver(&message).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            debug!("Telegram sender stopped");
        });

        info!("Telegram notifications enabled");
        Some(Self { tx, pending })
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

impl Notifier for TelegramNotifier {
    fn send(&self, text: &str, urgent: bool) -> bool {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let queued = self
            .tx
            .send(Outgoing {
                text: text.to_string(),
                urgent,
            })
            .is_ok();
        if !queued {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("Telegram sender is gone, dropping message");
        }
        queued
    }

    fn flush(&self, timeout: Duration) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let deadline = Instant::now() + timeout;
            while self.pending() > 0 && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            if self.pending() > 0 {
                warn!("{} Telegram messages still queued at shutdown", self.pending());
            }
        })
    }
}

/// Stand-in used when Telegram is not configured: messages go to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, text: &str, urgent: bool) -> bool {
        if urgent {
            warn!("Notification: {}", text);
        } else {
            info!("Notification: {}", text);
        }
        true
    }

    fn flush(&self, _timeout: Duration) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

fn is_markdown_rejection(status: StatusCode, body: &str) -> bool {
    status == StatusCode::BAD_REQUEST && body.to_lowercase().contains("can't parse entities")
}

/// Replace Turkish letters with their ASCII counterparts.
pub fn sanitize_text(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'ı' => 'i',
            'ğ' => 'g',
            'ü' => 'u',
            'ş' => 's',
            'ç' => 'c',
            'ö' => 'o',
            'İ' => 'I',
            'Ğ' => 'G',
            'Ü' => 'U',
            'Ş' => 'S',
            'Ç' => 'C',
            'Ö' => 'O',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_text() {
        assert_eq!(sanitize_text("Şişli ağaç ÇÖĞÜİ"), "Sisli agac COGUI");
        assert_eq!(sanitize_text("BTC 📈 *bold*"), "BTC 📈 *bold*");
    }

    #[test]
    fn test_markdown_rejection_detection() {
        let body = r#"{"ok":false,"error_code":400,"description":"Bad Request: can't parse entities: Can't find end of the entity"}"#;
        assert!(is_markdown_rejection(StatusCode::BAD_REQUEST, body));
        assert!(!is_markdown_rejection(StatusCode::BAD_REQUEST, r#"{"description":"chat not found"}"#));
        assert!(!is_markdown_rejection(StatusCode::INTERNAL_SERVER_ERROR, body));
    }

    #[test]
    fn test_request_serialization() {
        let request = SendMessageRequest {
            chat_id: "42",
            text: "hi",
            parse_mode: None,
            disable_notification: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["chat_id"], "42");
        assert!(json.get("parse_mode").is_none());
        assert_eq!(json["disable_notification"], true);
    }

    #[tokio::test]
    async fn test_spawn_requires_credentials() {
        assert!(TelegramNotifier::spawn(&TelegramConfig::default()).is_none());
    }

    #[tokio::test]
    async fn test_log_notifier_accepts_everything() {
        let notifier = LogNotifier;
        assert!(notifier.send("hello", false));
        assert!(notifier.send("down", true));
        notifier.flush(Duration::from_millis(10)).await;
    }
}
