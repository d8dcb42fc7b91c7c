//! Telegram bot source using `getUpdates` long polling.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{Inbound, MessageSource};
use crate::collect::Collect;
use crate::publish::render_html;

/// Seconds the server may hold a `getUpdates` call open.
const LONG_POLL_SECS: u64 = 20;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    chat: Chat,
    from: Option<User>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    entities: Vec<Entity>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct Entity {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    offset: usize,
    url: Option<String>,
}

impl Message {
    fn is_command(&self) -> bool {
        self.entities
            .iter()
            .any(|e| e.kind == "bot_command" && e.offset == 0)
    }
}

/// Minimal Bot API client shared by the source and the channel sink.
#[derive(Clone)]
pub struct TelegramBot {
    http: reqwest::Client,
    base: String,
}

impl TelegramBot {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_base: &str, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(LONG_POLL_SECS + 30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base: format!("{}/bot{token}", api_base.trim_end_matches('/')),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &serde_json::Value) -> Result<T> {
        let response = self
            .http
            .post(format!("{}/{method}", self.base))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Telegram {method} request failed"))?;

        let envelope: Envelope<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse Telegram {method} response"))?;

        match (envelope.ok, envelope.result) {
            (true, Some(result)) => Ok(result),
            _ => bail!(
                "Telegram {method} failed: {}",
                envelope.description.unwrap_or_default()
            ),
        }
    }

    /// Send an HTML message, optionally as a reply.
    ///
    /// # Errors
    ///
    /// Returns an error if Telegram rejects the message.
    pub async fn send_message(&self, chat_id: &str, text: &str, reply_to: Option<&str>) -> Result<()> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        if let Some(reply_to) = reply_to.and_then(|id| id.parse::<i64>().ok()) {
            body["reply_to_message_id"] = json!(reply_to);
        }
        let _: serde_json::Value = self.call("sendMessage", &body).await?;
        Ok(())
    }
}

/// Telegram bot chats as a [`MessageSource`].
///
/// Every message is its own conversation (`<chat>:<message>`), so two links
/// sent in a row are both archived while a redelivered update is not.
pub struct TelegramSource {
    bot: TelegramBot,
    offset: AtomicI64,
    long_poll: u64,
}

impl TelegramSource {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_base: &str, token: &str) -> Result<Self> {
        Ok(Self {
            bot: TelegramBot::new(api_base, token)?,
            offset: AtomicI64::new(0),
            long_poll: LONG_POLL_SECS,
        })
    }

    /// Return immediately from `getUpdates` instead of long polling.
    #[must_use]
    pub fn without_long_poll(mut self) -> Self {
        self.long_poll = 0;
        self
    }

    #[must_use]
    pub fn bot(&self) -> &TelegramBot {
        &self.bot
    }
}

#[async_trait]
impl MessageSource for TelegramSource {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn poll(&self) -> Result<Vec<Inbound>> {
        let body = json!({
            "offset": self.offset.load(Ordering::SeqCst),
            "timeout": self.long_poll,
            "allowed_updates": ["message"],
        });
        let updates: Vec<Update> = self.bot.call("getUpdates", &body).await?;

        if let Some(last) = updates.iter().map(|u| u.update_id).max() {
            self.offset.fetch_max(last + 1, Ordering::SeqCst);
        }

        let inbound = updates
            .into_iter()
            .filter_map(|u| u.message)
            .filter(|m| !m.is_command())
            .map(|m| Inbound {
                conversation_id: format!("{}:{}", m.chat.id, m.message_id),
                message_id: m.message_id.to_string(),
                sender_id: m.from.map(|u| u.id.to_string()).unwrap_or_default(),
                links: m
                    .entities
                    .iter()
                    .filter(|e| e.kind == "text_link")
                    .filter_map(|e| e.url.clone())
                    .collect(),
                text: m.text,
            })
            .collect::<Vec<_>>();

        debug!(messages = inbound.len(), "Telegram poll");
        Ok(inbound)
    }

    async fn reply(&self, inbound: &Inbound, text: &str) -> Result<()> {
        let chat_id = inbound
            .conversation_id
            .split_once(':')
            .map_or(inbound.conversation_id.as_str(), |(chat, _)| chat);
        self.bot
            .send_message(chat_id, text, Some(&inbound.message_id))
            .await
    }

    fn render(&self, collects: &[Collect]) -> String {
        render_html(collects)
    }
}
