//! Title and readable text extraction from captured HTML.

use scraper::{Html, Selector};

/// Maximum characters of readable text kept per page.
const MAX_TEXT_CHARS: usize = 20_000;

/// Extract a page title, preferring Open Graph metadata.
#[must_use]
pub fn extract_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    for (selector, attr) in [
        ("meta[property='og:title']", Some("content")),
        ("meta[name='twitter:title']", Some("content")),
        ("title", None),
        ("h1", None),
    ] {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        if let Some(element) = document.select(&selector).next() {
            let value = match attr {
                Some(attr) => element.value().attr(attr).unwrap_or_default().to_string(),
                None => element.text().collect(),
            };
            let trimmed = clean_text(&value);
            if !trimmed.is_empty() {
                return Some(trimmed);
            }
        }
    }

    None
}

/// Extract readable body text, one paragraph per line.
#[must_use]
pub fn extract_text(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    for tag in ["article", "main", "body"] {
        let Ok(root) = Selector::parse(tag) else {
            continue;
        };
        let Some(element) = document.select(&root).next() else {
            continue;
        };

        let blocks = Selector::parse("p, h1, h2, h3, li, pre, blockquote").ok();
        let mut paragraphs: Vec<String> = blocks
            .map(|sel| {
                element
                    .select(&sel)
                    .map(|p| clean_text(&p.text().collect::<Vec<_>>().join(" ")))
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        if paragraphs.is_empty() {
            let all = clean_text(&element.text().collect::<Vec<_>>().join(" "));
            if !all.is_empty() {
                paragraphs.push(all);
            }
        }

        if !paragraphs.is_empty() {
            return Some(truncate_chars(&paragraphs.join("\n"), MAX_TEXT_CHARS));
        }
    }

    None
}

/// Reduce an HTML fragment to plain text, turning `<br>` and block ends into newlines.
#[must_use]
pub fn html_to_text(fragment: &str) -> String {
    let with_breaks = fragment
        .replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("<br />", "\n")
        .replace("</p>", "</p>\n");
    let document = Html::parse_fragment(&with_breaks);
    let text: String = document.root_element().text().collect();
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate on a char boundary.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
