//! Locating the embedded document on a mirror's landing page.

use regex::Regex;
use reqwest::Url;
use scraper::{Html, Selector};
use std::sync::OnceLock;

fn navigation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"location\.href\s*=\s*['"]([^'"]+)['"]"#).expect("static regex is valid")
    })
}

/// Find the document reference on a landing page: an `iframe`/`embed`
/// source first, then a script-driven `location.href = '...'` target.
pub fn find_document_link(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    for css in ["iframe[src]", "embed[src]"] {
        let Ok(selector) = Selector::parse(css) else { continue };
        let found = document
            .select(&selector)
            .filter_map(|el| el.value().attr("src"))
            .map(str::trim)
            .find(|src| !src.is_empty());
        if let Some(src) = found {
            return Some(src.to_string());
        }
    }

    navigation_pattern()
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Resolve protocol-relative (`//host/x`) and root-relative (`/x`) links
/// against the mirror's own origin. Absolute links pass through.
pub fn absolutize(link: &str, mirror: &Url) -> Option<Url> {
    mirror.join(link).ok()
}
