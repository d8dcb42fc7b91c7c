//! Telegraph slot: republishes a page's readable text on telegra.ph.
//!
//! Every page is created with `author_url` set to the source URL, so a
//! lookup scans the account's page list for a matching author URL.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

use crate::backends::{Archiver, Lookup};
use crate::bundle::extract::{extract_text, extract_title, truncate_chars};
use crate::bundle::Bundle;
use crate::collect::{BackendError, Slot};
use crate::config::Config;
use crate::constants::ARCHIVAL_USER_AGENT;

const AUTHOR_NAME: &str = "wayback-relay";
/// Telegraph rejects content over 64 KiB; stay well below it.
const MAX_CONTENT_CHARS: usize = 30_000;
const MAX_TITLE_CHARS: usize = 256;
/// Page list batch size (API maximum).
const PAGE_LIST_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Account {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Page {
    url: String,
    #[serde(default)]
    author_url: String,
}

#[derive(Debug, Deserialize)]
struct PageList {
    total_count: usize,
    pages: Vec<Page>,
}

pub struct TelegraphClient {
    http: Client,
    base: String,
    configured_token: Option<String>,
    token: OnceCell<String>,
}

impl TelegraphClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(ARCHIVAL_USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base: config.endpoints.telegraph_api.trim_end_matches('/').to_string(),
            configured_token: config.telegraph_access_token.clone(),
            token: OnceCell::new(),
        })
    }

    /// Access token, creating an account on first use when none is configured.
    async fn token(&self) -> Result<&str, BackendError> {
        let token = self
            .token
            .get_or_try_init(|| async {
                if let Some(token) = &self.configured_token {
                    return Ok(token.clone());
                }
                let account: Account = self
                    .call(
                        "createAccount",
                        &[("short_name", AUTHOR_NAME), ("author_name", AUTHOR_NAME)],
                    )
                    .await?;
                info!("Created Telegraph account");
                Ok::<_, BackendError>(account.access_token)
            })
            .await?;
        Ok(token.as_str())
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        form: &[(&str, &str)],
    ) -> Result<T, BackendError> {
        let response = self
            .http
            .post(format!("{}/{method}", self.base))
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(BackendError::RateLimited);
        }
        if !status.is_success() {
            return Err(BackendError::Status(status.as_u16()));
        }

        let envelope: Envelope<T> = response.json().await?;
        match (envelope.ok, envelope.result) {
            (true, Some(result)) => Ok(result),
            _ => {
                let error = envelope.error.unwrap_or_else(|| "unknown error".to_string());
                if error.starts_with("FLOOD_WAIT") {
                    return Err(BackendError::RateLimited);
                }
                Err(BackendError::Failed(format!("telegraph {method}: {error}")))
            }
        }
    }

    async fn fetch_page(&self, url: &Url) -> Result<String, BackendError> {
        let response = self.http.get(url.as_str()).send().await?;
        if !response.status().is_success() {
            return Err(BackendError::Status(response.status().as_u16()));
        }
        Ok(response.text().await?)
    }

    /// Publish a page for `src` and return its telegra.ph URL.
    pub async fn publish(&self, src: &str, title: &str, text: &str) -> Result<String, BackendError> {
        let token = self.token().await?;
        let title = match title.trim() {
            "" => src,
            t => t,
        };
        let title = truncate_chars(title, MAX_TITLE_CHARS);
        let content = content_nodes(src, text).to_string();

        debug!(src = %src, "Creating Telegraph page");
        let page: Page = self
            .call(
                "createPage",
                &[
                    ("access_token", token),
                    ("title", title.as_str()),
                    ("author_name", AUTHOR_NAME),
                    ("author_url", src),
                    ("content", content.as_str()),
                    ("return_content", "false"),
                ],
            )
            .await?;

        info!(src = %src, page = %page.url, "Telegraph page created");
        Ok(page.url)
    }

    /// Most recent page whose author URL is `src`.
    pub async fn find(&self, src: &str) -> Result<Option<String>, BackendError> {
        let token = self.token().await?;
        let limit = PAGE_LIST_LIMIT.to_string();
        let mut offset = 0;

        loop {
            let offset_param = offset.to_string();
            let list: PageList = self
                .call(
                    "getPageList",
                    &[
                        ("access_token", token),
                        ("offset", offset_param.as_str()),
                        ("limit", limit.as_str()),
                    ],
                )
                .await?;

            if let Some(page) = list.pages.iter().find(|p| p.author_url == src) {
                return Ok(Some(page.url.clone()));
            }

            offset += list.pages.len();
            if list.pages.is_empty() || offset >= list.total_count {
                return Ok(None);
            }
        }
    }
}

#[async_trait]
impl Archiver for TelegraphClient {
    fn slot(&self) -> Slot {
        Slot::Ph
    }

    async fn archive(&self, url: &Url, bundle: Option<&Bundle>) -> Result<String, BackendError> {
        match bundle.filter(|b| !b.text.is_empty()) {
            Some(bundle) => self.publish(url.as_str(), &bundle.title, &bundle.text).await,
            None => {
                let html = self.fetch_page(url).await?;
                let title = extract_title(&html).unwrap_or_default();
                let text = extract_text(&html).unwrap_or_default();
                self.publish(url.as_str(), &title, &text).await
            }
        }
    }
}

#[async_trait]
impl Lookup for TelegraphClient {
    fn slot(&self) -> Slot {
        Slot::Ph
    }

    async fn lookup(&self, url: &Url) -> Result<String, BackendError> {
        self.find(url.as_str()).await?.ok_or(BackendError::NotFound)
    }
}

/// Telegraph node list: a source link followed by one paragraph per line.
fn content_nodes(src: &str, text: &str) -> Value {
    let text = truncate_chars(text, MAX_CONTENT_CHARS);
    let mut nodes = vec![json!({
        "tag": "p",
        "children": [{ "tag": "a", "attrs": { "href": src }, "children": [src] }]
    })];
    nodes.extend(
        text.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|line| json!({ "tag": "p", "children": [line] })),
    );
    Value::Array(nodes)
}
