pub mod arxiv;
pub mod paging;
pub mod semantic_scholar;
pub mod unpaywall;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest free-text query sent to any provider.
pub const MAX_QUERY_LEN: usize = 200;

/// Provider a [`PaperRecord`] was normalized from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    SemanticScholar,
    ArXiv,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::SemanticScholar => "semantic_scholar",
            Provider::ArXiv => "arxiv",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized paper metadata. Built once by an adapter and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperRecord {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub year: Option<u32>,
    pub published_date: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub citation_count: Option<u32>,
    pub url: String,
    pub pdf_url: Option<String>,
    pub doi: Option<String>,
    pub source: Provider,
    pub fields: Vec<String>,
}

/// One adapter call: a single query with its result budget and filters.
#[derive(Debug, Clone, Default)]
pub struct SourceQuery {
    pub query: String,
    pub max_results: u32,
    pub year_min: Option<u32>,
    pub year_max: Option<u32>,
    pub prefer_open_access: bool,
}

impl SourceQuery {
    pub fn new(query: impl Into<String>, max_results: u32) -> Self {
        Self {
            query: query.into(),
            max_results,
            ..Default::default()
        }
    }

    /// True when `year` lies inside the requested range. Records without a
    /// year are always kept.
    pub fn accepts_year(&self, year: Option<u32>) -> bool {
        let Some(year) = year else { return true };
        self.year_min.map_or(true, |min| year >= min) && self.year_max.map_or(true, |max| year <= max)
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP status {0}")]
    Status(reqwest::StatusCode),
    #[error("rate limited by provider")]
    Throttled,
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("API error: {0}")]
    Api(String),
}

#[async_trait]
pub trait PaperSource: Send + Sync {
    fn name(&self) -> &str;
    fn provider(&self) -> Provider;

    /// Paginate through the provider for one query. Throttling and transport
    /// failures end pagination early and yield what was gathered so far.
    async fn search(&self, query: &SourceQuery) -> Result<Vec<PaperRecord>, SourceError>;
}

/// Cut a query down to [`MAX_QUERY_LEN`] characters, backing up to the last
/// space when that space sits past the midpoint.
pub fn truncate_query(query: &str) -> String {
    if query.chars().count() <= MAX_QUERY_LEN {
        return query.to_string();
    }
    let truncated: String = query.chars().take(MAX_QUERY_LEN).collect();
    match truncated.rfind(' ') {
        Some(space) if truncated[..space].chars().count() > MAX_QUERY_LEN / 2 => {
            truncated[..space].to_string()
        }
        _ => truncated,
    }
}

/// `base` with the DOI appended as path segments. Each segment is
/// percent-encoded, so `#`, `?` and `%` inside a DOI stay part of the path.
/// `None` when `base` cannot carry a path.
pub fn doi_url(base: &Url, doi: &str) -> Option<Url> {
    let mut url = base.clone();
    url.path_segments_mut().ok()?.pop_if_empty().extend(doi.split('/'));
    Some(url)
}

/// Map a response status onto the adapter error taxonomy.
pub(crate) fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, SourceError> {
    let status = resp.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Err(SourceError::Throttled)
    } else if !status.is_success() {
        Err(SourceError::Status(status))
    } else {
        Ok(resp)
    }
}
