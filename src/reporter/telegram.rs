//! Telegram Bot API channel.
//!
//! Delivers status text to the chat that issued `/start`: the first
//! snapshot is sent as a new message, later ones edit it in place (a
//! failed edit falls back to a new message). A long-poll listener accepts
//! `/start`, `/stop` and `/status` from allow-listed user ids.
//!
//! API docs: https://core.telegram.org/bots/api

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::{EngineStatus, StatsReporter, StatusChannel};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const API_BASE: &str = "https://api.telegram.org";

/// Long-poll timeout passed to `getUpdates` (seconds).
const POLL_TIMEOUT_SECS: u64 = 25;

/// Back-off after a failed poll.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

const UNAUTHORIZED_REPLY: &str = "Unauthorized access. This incident will be reported.";

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct TgResponse<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgMessageRef {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct TgUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    chat: TgChat,
    #[serde(default)]
    from: Option<TgUser>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    id: i64,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Status,
    Unknown,
}

impl Command {
    /// Parse a chat message; tolerates case and a `@botname` suffix.
    pub fn parse(text: &str) -> Self {
        let word = text.split_whitespace().next().unwrap_or_default().to_lowercase();
        let word = word.split('@').next().unwrap_or_default();
        match word {
            "/start" => Command::Start,
            "/stop" => Command::Stop,
            "/status" => Command::Status,
            _ => Command::Unknown,
        }
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Chat the status message is bound to.
#[derive(Debug, Default)]
struct ChatBinding {
    chat_id: Option<i64>,
    message_id: Option<i64>,
}

pub struct TelegramChannel {
    http: Client,
    base_url: String,
    token: Secret<String>,
    authorized_users: Vec<i64>,
    binding: Mutex<ChatBinding>,
}

impl TelegramChannel {
    pub fn new(token: Secret<String>, authorized_users: Vec<i64>) -> Result<Self> {
        Self::with_base_url(API_BASE, token, authorized_users)
    }

    /// Channel against a Bot API server other than the public one.
    pub fn with_base_url(
        base_url: &str,
        token: Secret<String>,
        authorized_users: Vec<i64>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .build()
            .context("Failed to build HTTP client for Telegram")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            authorized_users,
            binding: Mutex::new(ChatBinding::default()),
        })
    }

    pub fn is_authorized(&self, user_id: i64) -> bool {
        self.authorized_users.contains(&user_id)
    }

    pub async fn bound_chat(&self) -> Option<i64> {
        self.binding.lock().await.chat_id
    }

    async fn bind(&self, chat_id: i64) {
        let mut binding = self.binding.lock().await;
        if binding.chat_id != Some(chat_id) {
            binding.message_id = None;
        }
        binding.chat_id = Some(chat_id);
    }

    async fn unbind(&self) {
        *self.binding.lock().await = ChatBinding::default();
    }

    // -- Internal helpers ------------------------------------------------

    async fn call<T: DeserializeOwned>(&self, method: &str, payload: serde_json::Value) -> Result<T> {
        let url = format!("{}/bot{}/{method}", self.base_url, self.token.expose_secret());

        let resp = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Telegram {method} request failed: {}", e.without_url()))?;

        let body: TgResponse<T> = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse Telegram {method} response"))?;

        if !body.ok {
            anyhow::bail!(
                "Telegram {method} rejected: {}",
                body.description.unwrap_or_default()
            );
        }
        body.result
            .with_context(|| format!("Telegram {method} returned no result"))
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64> {
        let sent: TgMessageRef = self
            .call(
                "sendMessage",
                json!({ "chat_id": chat_id, "text": text, "disable_notification": true }),
            )
            .await?;
        Ok(sent.message_id)
    }

    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()> {
        let _: serde_json::Value = self
            .call(
                "editMessageText",
                json!({ "chat_id": chat_id, "message_id": message_id, "text": text }),
            )
            .await?;
        Ok(())
    }

    /// Fire-and-log reply to a command.
    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.send_message(chat_id, text).await {
            warn!(chat_id, error = %e, "Failed to reply to command");
        }
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<TgUpdate>> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_SECS,
                "allowed_updates": ["message"],
            }),
        )
        .await
    }

    // -- Command listener ------------------------------------------------

    /// Long-poll for operator commands until shutdown.
    pub async fn listen(
        self: Arc<Self>,
        status: Arc<EngineStatus>,
        reporter: Arc<StatsReporter>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(operators = self.authorized_users.len(), "Telegram command listener started");
        let mut offset = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let polled = tokio::select! {
                polled = self.get_updates(offset) => polled,
                _ = shutdown.changed() => break,
            };

            match polled {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        if let Some(message) = update.message {
                            self.handle_message(message, &status, &reporter).await;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Telegram poll failed");
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                }
            }
        }

        info!("Telegram command listener stopped");
    }

    async fn handle_message(
        &self,
        message: TgMessage,
        status: &EngineStatus,
        reporter: &StatsReporter,
    ) {
        let Some(text) = message.text.as_deref() else {
            return;
        };
        let chat_id = message.chat.id;
        let user_id = message.from.map(|u| u.id);

        if !user_id.is_some_and(|id| self.is_authorized(id)) {
            warn!(user_id = ?user_id, chat_id, "Unauthorized access attempt");
            self.reply(chat_id, UNAUTHORIZED_REPLY).await;
            return;
        }

        match Command::parse(text) {
            Command::Start => {
                self.bind(chat_id).await;
                status.start();
                info!(chat_id, "Engine started by operator");
                reporter.publish().await;
                self.reply(chat_id, "Racer engine started. You will receive updates here.")
                    .await;
            }
            Command::Stop => {
                status.stop();
                info!(chat_id, "Engine stopped by operator");
                reporter.publish().await;
                self.reply(chat_id, "Racer engine stopped. You will no longer receive updates.")
                    .await;
                self.unbind().await;
            }
            Command::Status => reporter.publish().await,
            Command::Unknown => debug!(chat_id, text, "Ignoring unknown command"),
        }
    }
}

#[async_trait]
impl StatusChannel for TelegramChannel {
    /// Edit the bound status message, or send a fresh one.
    async fn deliver(&self, text: &str) -> Result<()> {
        let (chat_id, message_id) = {
            let binding = self.binding.lock().await;
            (binding.chat_id, binding.message_id)
        };
        let Some(chat_id) = chat_id else {
            return Ok(());
        };

        if let Some(message_id) = message_id {
            match self.edit_message(chat_id, message_id, text).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!(error = %e, "Failed to edit status message, sending a new one"),
            }
        }

        let message_id = self.send_message(chat_id, text).await?;
        let mut binding = self.binding.lock().await;
        if binding.chat_id == Some(chat_id) {
            binding.message_id = Some(message_id);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
