//! Mastodon direct conversations as a message source.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::link_extractor::extract_html_links;
use super::{Inbound, MessageSource};
use crate::bundle::extract::{html_to_text, truncate_chars};

/// Status length limit of a stock Mastodon instance.
const MAX_STATUS_CHARS: usize = 500;

#[derive(Debug, Deserialize)]
struct Conversation {
    id: String,
    #[serde(default)]
    unread: bool,
    last_status: Option<Status>,
}

#[derive(Debug, Deserialize)]
struct Status {
    id: String,
    content: String,
    account: Account,
}

#[derive(Debug, Deserialize)]
struct Account {
    acct: String,
}

pub struct MastodonSource {
    http: reqwest::Client,
    server: String,
    token: String,
}

impl MastodonSource {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(server: &str, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            server: server.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.server)
    }
}

#[async_trait]
impl MessageSource for MastodonSource {
    fn name(&self) -> &'static str {
        "mastodon"
    }

    async fn poll(&self) -> Result<Vec<Inbound>> {
        let conversations: Vec<Conversation> = self
            .http
            .get(self.url("/api/v1/conversations"))
            .bearer_auth(&self.token)
            .send()
            .await
            .context("Failed to fetch conversations")?
            .error_for_status()
            .context("Mastodon rejected conversations request")?
            .json()
            .await
            .context("Failed to parse conversations")?;

        let inbound: Vec<Inbound> = conversations
            .into_iter()
            .filter(|c| c.unread)
            .filter_map(|c| {
                let status = c.last_status?;
                Some(Inbound {
                    conversation_id: c.id,
                    message_id: status.id,
                    sender_id: status.account.acct,
                    text: html_to_text(&status.content),
                    links: extract_html_links(&status.content),
                })
            })
            .collect();

        debug!(messages = inbound.len(), "Mastodon poll");
        Ok(inbound)
    }

    async fn reply(&self, inbound: &Inbound, text: &str) -> Result<()> {
        let status = truncate_chars(&format!("@{} {text}", inbound.sender_id), MAX_STATUS_CHARS);
        self.http
            .post(self.url("/api/v1/statuses"))
            .bearer_auth(&self.token)
            .form(&[
                ("status", status.as_str()),
                ("in_reply_to_id", inbound.message_id.as_str()),
                ("visibility", "direct"),
            ])
            .send()
            .await
            .context("Failed to post status")?
            .error_for_status()
            .context("Mastodon rejected status")?;
        Ok(())
    }

    /// Remove the conversation so it is not polled again.
    async fn acknowledge(&self, inbound: &Inbound) -> Result<()> {
        self.http
            .delete(self.url(&format!("/api/v1/conversations/{}", inbound.conversation_id)))
            .bearer_auth(&self.token)
            .send()
            .await
            .context("Failed to delete conversation")?
            .error_for_status()
            .context("Mastodon rejected conversation delete")?;
        Ok(())
    }
}
