//! Posts finished batches to a Telegram channel.

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::{render_html, Publisher};
use crate::collect::Collect;
use crate::ingest::telegram::TelegramBot;

pub struct TelegramChannel {
    bot: TelegramBot,
    channel: String,
}

impl TelegramChannel {
    #[must_use]
    pub fn new(bot: TelegramBot, channel: impl Into<String>) -> Self {
        Self {
            bot,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl Publisher for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram-channel"
    }

    fn render(&self, collects: &[Collect]) -> String {
        render_html(collects)
    }

    async fn deliver(&self, text: &str) -> Result<()> {
        debug!(channel = %self.channel, "Publishing to Telegram channel");
        self.bot.send_message(&self.channel, text, None).await
    }
}
