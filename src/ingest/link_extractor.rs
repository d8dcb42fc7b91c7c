//! URL extraction from inbound message text.

use std::collections::HashSet;

use regex::Regex;
use scraper::{Html, Selector};

static URL_PATTERN: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    Regex::new(r#"(?i)\bhttps?://[^\s<>"'`]+"#).unwrap()
});

/// Punctuation that usually ends a sentence rather than a URL.
const TRAILING: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '>', '\'', '"'];

/// Extract every http(s) URL from plain text, in order of first appearance.
#[must_use]
pub fn extract_urls(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    URL_PATTERN
        .find_iter(text)
        .map(|m| trim_trailing(m.as_str()))
        .filter(|url| url.len() > "https://".len())
        .filter(|url| seen.insert(url.to_string()))
        .map(String::from)
        .collect()
}

/// Strip trailing punctuation, keeping a closing paren that has a match.
fn trim_trailing(url: &str) -> &str {
    let mut end = url.len();
    while let Some(c) = url[..end].chars().last() {
        if !TRAILING.contains(&c) {
            break;
        }
        if c == ')' && url[..end].matches('(').count() >= url[..end].matches(')').count() {
            break;
        }
        end -= c.len_utf8();
    }
    &url[..end]
}

/// Extract link targets from an HTML status body.
///
/// Mentions and hashtags are skipped; so are anchors and non-http schemes.
#[must_use]
pub fn extract_html_links(html: &str) -> Vec<String> {
    let document = Html::parse_fragment(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if !(href.starts_with("http://") || href.starts_with("https://")) {
            continue;
        }

        let classes = element.value().attr("class").unwrap_or("");
        let rel = element.value().attr("rel").unwrap_or("");
        if classes.contains("mention") || classes.contains("hashtag") || rel.contains("tag") {
            continue;
        }

        if seen.insert(href.to_string()) {
            links.push(href.to_string());
        }
    }

    links
}
