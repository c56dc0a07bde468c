use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;

use crate::acquire::{DocumentPipeline, DEFAULT_ATTEMPT_TIMEOUT};
use crate::apis::{self, PaperSource};
use crate::search::DEFAULT_DEADLINE;

const DEFAULT_USER_AGENT: &str = "paper-acquire/0.1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub semantic_scholar_api_key: Option<String>,
    pub unpaywall_email: Option<String>,
    pub enabled_source_names: Vec<String>,
    pub mirrors: Vec<Url>,
    pub search_deadline: Duration,
    pub attempt_timeout: Duration,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            semantic_scholar_api_key: None,
            unpaywall_email: None,
            enabled_source_names: Vec::new(),
            mirrors: Vec::new(),
            search_deadline: DEFAULT_DEADLINE,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] but reading through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let enabled_source_names = non_empty("PAPER_ACQUIRE_SOURCES")
            .map(|s| s.split(',').map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        let mirrors = non_empty("PAPER_ACQUIRE_MIRRORS")
            .map(|s| parse_mirrors(&s))
            .unwrap_or_default();

        Self {
            semantic_scholar_api_key: non_empty("SEMANTIC_SCHOLAR_API_KEY"),
            unpaywall_email: non_empty("UNPAYWALL_EMAIL"),
            enabled_source_names,
            mirrors,
            search_deadline: seconds(non_empty("PAPER_ACQUIRE_SEARCH_DEADLINE_SECS"), defaults.search_deadline),
            attempt_timeout: seconds(non_empty("PAPER_ACQUIRE_ATTEMPT_TIMEOUT_SECS"), defaults.attempt_timeout),
            user_agent: non_empty("PAPER_ACQUIRE_USER_AGENT").unwrap_or(defaults.user_agent),
        }
    }

    /// The one HTTP client shared by every adapter and the document pipeline.
    pub fn build_client(&self) -> Result<reqwest::Client, ConfigError> {
        Ok(reqwest::Client::builder()
            .user_agent(self.user_agent.as_str())
            .build()?)
    }

    fn should_enable(&self, name: &str) -> bool {
        self.enabled_source_names.is_empty() || self.enabled_source_names.iter().any(|n| n == name)
    }

    /// Build the list of enabled paper sources based on configuration.
    pub fn build_sources(&self, client: &reqwest::Client) -> Vec<Arc<dyn PaperSource>> {
        let mut sources: Vec<Arc<dyn PaperSource>> = Vec::new();

        if self.should_enable("semantic_scholar") {
            sources.push(Arc::new(apis::semantic_scholar::SemanticScholarClient::new(
                client.clone(),
                self.semantic_scholar_api_key.clone(),
            )));
        }
        if self.should_enable("arxiv") {
            sources.push(Arc::new(apis::arxiv::ArxivClient::new(client.clone())));
        }

        sources
    }

    /// Build the document pipeline with whichever stages are configured.
    pub fn build_pipeline(&self, client: &reqwest::Client) -> DocumentPipeline {
        let mut pipeline = DocumentPipeline::new(client.clone())
            .with_mirrors(self.mirrors.clone())
            .with_attempt_timeout(self.attempt_timeout);
        if let Some(ref email) = self.unpaywall_email {
            pipeline = pipeline.with_resolver(
                apis::unpaywall::UnpaywallClient::new(client.clone(), email.clone()).with_timeout(self.attempt_timeout),
            );
        } else {
            tracing::warn!("Open-access resolver disabled: UNPAYWALL_EMAIL not set");
        }
        pipeline
    }

    /// Return a list of source status descriptions.
    pub fn source_status(&self) -> Vec<SourceStatus> {
        let mut statuses = vec![
            SourceStatus {
                name: "semantic_scholar".into(),
                enabled: self.should_enable("semantic_scholar"),
                note: if self.semantic_scholar_api_key.is_some() {
                    "API key set".into()
                } else {
                    "No API key (rate limited)".into()
                },
            },
            SourceStatus {
                name: "arxiv".into(),
                enabled: self.should_enable("arxiv"),
                note: "No API key required".into(),
            },
            SourceStatus {
                name: "mirror".into(),
                enabled: !self.mirrors.is_empty(),
                note: if self.mirrors.is_empty() {
                    "Disabled: PAPER_ACQUIRE_MIRRORS not set".into()
                } else {
                    format!("{} mirror host(s)", self.mirrors.len())
                },
            },
            SourceStatus {
                name: "unpaywall".into(),
                enabled: self.unpaywall_email.is_some(),
                note: if self.unpaywall_email.is_some() {
                    "Email set".into()
                } else {
                    "Disabled: UNPAYWALL_EMAIL not set".into()
                },
            },
        ];

        for s in statuses.iter_mut().take(2) {
            if !s.enabled {
                s.note = "Disabled by PAPER_ACQUIRE_SOURCES filter".into();
            }
        }

        statuses
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub enabled: bool,
    pub note: String,
}

fn parse_mirrors(raw: &str) -> Vec<Url> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match Url::parse(s) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!(mirror = s, "ignoring invalid mirror URL: {}", e);
                None
            }
        })
        .collect()
}

fn seconds(raw: Option<String>, default: Duration) -> Duration {
    match raw {
        None => default,
        Some(raw) => match raw.parse::<u64>() {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => {
                tracing::warn!(value = %raw, default_secs = default.as_secs(), "invalid duration, using default");
                default
            }
        },
    }
}
