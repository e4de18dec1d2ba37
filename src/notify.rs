//! Telegram notifications
//!
//! Pings are fire-and-forget: a delivery failure is logged and never fails
//! the loop tick that produced it. Identical messages within a short window
//! are sent once.

use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::TelegramConfig;

const DEDUP_WINDOW_MS: i64 = 2 * 60 * 1000;
const SEND_TIMEOUT_SECS: u64 = 10;

struct LastSend {
    text: String,
    at_ms: i64,
}

/// Sends operational pings to a Telegram chat
pub struct TelegramNotifier {
    client: Client,
    token: String,
    chat_id: String,
    enabled: bool,
    last: Mutex<Option<LastSend>>,
}

impl TelegramNotifier {
    /// Build from config; the bot token comes from the environment variable
    /// named by `token_env`. Missing token or chat id disables sending.
    pub fn from_config(config: &TelegramConfig) -> Self {
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.is_empty());
        let chat_id = config.chat_id.clone().filter(|c| !c.is_empty());
        let enabled = config.enabled && token.is_some() && chat_id.is_some();
        if config.enabled && !enabled {
            warn!(
                token_env = %config.token_env,
                "Telegram enabled in config but token or chat_id missing; pings disabled"
            );
        }
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
                .build()
                .expect("Failed to create HTTP client"),
            token: token.unwrap_or_default(),
            chat_id: chat_id.unwrap_or_default(),
            enabled,
            last: Mutex::new(None),
        }
    }

    /// A notifier that drops everything
    pub fn disabled() -> Self {
        Self::from_config(&TelegramConfig::default())
    }

    pub async fn send(&self, text: &str) {
        if !self.enabled {
            return;
        }
        let now = Utc::now().timestamp_millis();
        {
            let mut last = self.last.lock().await;
            if !should_send(last.as_ref(), text, now) {
                debug!("Suppressing duplicate Telegram message");
                return;
            }
            *last = Some(LastSend {
                text: text.to_string(),
                at_ms: now,
            });
        }
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let body = json!({
            "chat_id": self.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        match self.client.post(&url).json(&body).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!(status = %response.status(), "Telegram send rejected");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Telegram send failed"),
        }
    }
}

fn should_send(last: Option<&LastSend>, text: &str, now_ms: i64) -> bool {
    match last {
        Some(prev) => prev.text != text || now_ms - prev.at_ms >= DEDUP_WINDOW_MS,
        None => true,
    }
}
