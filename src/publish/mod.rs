//! Rendering batch results and delivering them to secondary sinks.

use anyhow::Result;
use async_trait::async_trait;
use maud::{html, Markup, Render};

use crate::collect::{Collect, Outcome};

pub mod github;
pub mod telegram_channel;

pub use github::GitHubIssues;
pub use telegram_channel::TelegramChannel;

/// A destination for finished batches beyond the originating conversation.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn name(&self) -> &'static str;

    fn render(&self, collects: &[Collect]) -> String;

    async fn deliver(&self, text: &str) -> Result<()>;

    async fn publish(&self, collects: &[Collect]) -> Result<()> {
        let text = self.render(collects);
        self.deliver(&text).await
    }
}

/// Group records by source URL in order of first appearance, slots sorted.
#[must_use]
pub fn group_by_source(collects: &[Collect]) -> Vec<(&str, Vec<&Collect>)> {
    let mut groups: Vec<(&str, Vec<&Collect>)> = Vec::new();
    for collect in collects {
        match groups.iter_mut().find(|(src, _)| *src == collect.src) {
            Some((_, group)) => group.push(collect),
            None => groups.push((collect.src.as_str(), vec![collect])),
        }
    }
    for (_, group) in &mut groups {
        group.sort_by_key(|c| c.slot);
    }
    groups
}

/// Plain text report, one block per source URL.
#[must_use]
pub fn render_plain(collects: &[Collect]) -> String {
    let mut out = String::new();
    for (src, group) in group_by_source(collects) {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(src);
        out.push('\n');
        for collect in group {
            out.push_str(&format!("• {}: {}\n", collect.slot.name(), collect.destination()));
        }
    }
    out
}

/// Markdown report, used for issue bodies.
#[must_use]
pub fn render_markdown(collects: &[Collect]) -> String {
    let mut out = String::new();
    for (src, group) in group_by_source(collects) {
        out.push_str(&format!("**[{src}]({src})**\n\n"));
        for collect in group {
            match &collect.outcome {
                Outcome::Archived(dst) => {
                    out.push_str(&format!("- {}: <{dst}>\n", collect.slot.name()));
                }
                Outcome::Failed(e) => {
                    out.push_str(&format!("- {}: _{e}_\n", collect.slot.name()));
                }
            }
        }
        out.push('\n');
    }
    out
}

/// HTML report limited to the tags Telegram's HTML parse mode accepts.
pub struct Report<'a>(pub &'a [Collect]);

impl Render for Report<'_> {
    fn render(&self) -> Markup {
        html! {
            @for (n, (src, group)) in group_by_source(self.0).into_iter().enumerate() {
                @if n > 0 { "\n" }
                b { (src) } "\n"
                @for collect in group {
                    "• " (collect.slot.name()) ": "
                    @match &collect.outcome {
                        Outcome::Archived(dst) => { a href=(dst) { (dst) } }
                        Outcome::Failed(e) => { i { (e.to_string()) } }
                    }
                    "\n"
                }
            }
        }
    }
}

#[must_use]
pub fn render_html(collects: &[Collect]) -> String {
    Report(collects).render().into_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::{BackendError, Slot};

    fn collects() -> Vec<Collect> {
        vec![
            Collect::new(
                "https://example.com/",
                Slot::Is,
                Outcome::Failed(BackendError::RateLimited),
            ),
            Collect::new(
                "https://example.com/",
                Slot::Ia,
                Outcome::Archived("https://web.archive.org/web/1/https://example.com/".into()),
            ),
            Collect::new(
                "https://example.org/?a=1&b=2",
                Slot::Ia,
                Outcome::Archived("https://web.archive.org/web/2/https://example.org/".into()),
            ),
        ]
    }

    #[test]
    fn test_group_by_source() {
        let collects = collects();
        let groups = group_by_source(&collects);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "https://example.com/");
        assert_eq!(groups[0].1[0].slot, Slot::Ia);
        assert_eq!(groups[0].1[1].slot, Slot::Is);
    }

    #[test]
    fn test_render_plain() {
        let text = render_plain(&collects());
        assert!(text.starts_with("https://example.com/\n• Internet Archive: https://web.archive.org/web/1/"));
        assert!(text.contains("rate limited by upstream"));
        assert!(text.contains("\n\nhttps://example.org/?a=1&b=2\n"));
    }

    #[test]
    fn test_render_html_escapes() {
        let html = render_html(&collects());
        assert!(html.contains("<b>https://example.org/?a=1&amp;b=2</b>"));
        assert!(html.contains(
            r#"<a href="https://web.archive.org/web/1/https://example.com/">"#
        ));
        assert!(html.contains("<i>rate limited by upstream</i>"));
    }

    #[test]
    fn test_render_markdown() {
        let md = render_markdown(&collects());
        assert!(md.contains("**[https://example.com/](https://example.com/)**"));
        assert!(md.contains("- archive.today: _rate limited by upstream_"));
    }
}
