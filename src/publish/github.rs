//! Files finished batches as GitHub issues.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::{render_markdown, Publisher};
use crate::collect::Collect;
use crate::constants::ARCHIVAL_USER_AGENT;

const ISSUE_TITLE: &str = "Published at";

pub struct GitHubIssues {
    http: reqwest::Client,
    issues_url: String,
    token: String,
}

impl GitHubIssues {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_base: &str, owner: &str, repo: &str, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(ARCHIVAL_USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            issues_url: format!("{}/repos/{owner}/{repo}/issues", api_base.trim_end_matches('/')),
            token: token.to_string(),
        })
    }
}

#[async_trait]
impl Publisher for GitHubIssues {
    fn name(&self) -> &'static str {
        "github-issues"
    }

    fn render(&self, collects: &[Collect]) -> String {
        render_markdown(collects)
    }

    async fn deliver(&self, text: &str) -> Result<()> {
        let title = format!("{ISSUE_TITLE} {}", chrono::Utc::now().to_rfc3339());
        debug!(url = %self.issues_url, "Opening GitHub issue");

        self.http
            .post(&self.issues_url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&json!({ "title": title, "body": text }))
            .send()
            .await
            .context("Failed to create GitHub issue")?
            .error_for_status()
            .context("GitHub rejected issue")?;
        Ok(())
    }
}
