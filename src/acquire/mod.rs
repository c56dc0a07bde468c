//! Document acquisition: an ordered fallback chain of sources, each fetch
//! gated on the `%PDF` signature.
//!
//! Order is fixed: the direct link (when given), then every configured
//! mirror keyed by DOI, then the open-access resolver keyed by DOI. The
//! first validated body wins and nothing after it is attempted.

pub mod mirror;

use std::fmt;
use std::time::Duration;

use reqwest::Url;
use serde::Serialize;
use thiserror::Error;

use crate::apis::unpaywall::UnpaywallClient;
use crate::apis::{doi_url, SourceError};
use crate::extract::{self, ExtractionError};

/// Leading bytes every accepted document must start with.
pub const PDF_SIGNATURE: &[u8] = b"%PDF";

pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CandidateKind {
    Direct,
    Mirror,
    Resolver,
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CandidateKind::Direct => "direct URL",
            CandidateKind::Mirror => "mirror",
            CandidateKind::Resolver => "resolver",
        })
    }
}

/// One planned attempt: where to go and how to treat the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentCandidate {
    pub kind: CandidateKind,
    /// Document URL for `Direct`, landing page URL for `Mirror`, DOI for `Resolver`.
    pub location: String,
}

/// Every configured document source failed.
#[derive(Debug)]
pub struct AcquisitionError {
    pub attempted: Vec<CandidateKind>,
    pub pdf_url: Option<String>,
    pub doi: Option<String>,
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to download document. Tried: ")?;
        if self.attempted.is_empty() {
            write!(f, "no sources")?;
        } else {
            let tried: Vec<String> = self.attempted.iter().map(|k| k.to_string()).collect();
            write!(f, "{}", tried.join(", "))?;
        }
        let mut inputs = Vec::new();
        if let Some(ref url) = self.pdf_url {
            inputs.push(format!("pdf_url={}", url));
        }
        if let Some(ref doi) = self.doi {
            inputs.push(format!("doi={}", doi));
        }
        if !inputs.is_empty() {
            write!(f, " ({})", inputs.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for AcquisitionError {}

/// Why a single attempt was rejected.
#[derive(Debug, Error)]
enum AttemptError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP status {0}")]
    Status(reqwest::StatusCode),
    #[error("response is not a PDF")]
    NotPdf,
    #[error("no document link on landing page")]
    NoLink,
    #[error("invalid URL {0}")]
    BadUrl(String),
    #[error("no open-access location")]
    NoLocation,
    #[error("resolver lookup failed: {0}")]
    Resolver(#[from] SourceError),
}

#[derive(Debug, Error)]
pub enum ContentError {
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error("extraction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// True when `bytes` carries the PDF signature.
pub fn is_valid_document(bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_SIGNATURE)
}

pub struct DocumentPipeline {
    client: reqwest::Client,
    mirrors: Vec<Url>,
    resolver: Option<UnpaywallClient>,
    attempt_timeout: Duration,
}

impl DocumentPipeline {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            mirrors: Vec::new(),
            resolver: None,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    pub fn with_mirrors(mut self, mirrors: Vec<Url>) -> Self {
        self.mirrors = mirrors;
        self
    }

    pub fn with_resolver(mut self, resolver: UnpaywallClient) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn resolver(&self) -> Option<&UnpaywallClient> {
        self.resolver.as_ref()
    }

    /// The ordered attempts for these inputs. Stages whose key is missing,
    /// or which are not configured, are left out.
    pub fn candidates(&self, pdf_url: Option<&str>, doi: Option<&str>) -> Vec<DocumentCandidate> {
        let mut plan = Vec::new();
        if let Some(url) = pdf_url {
            plan.push(DocumentCandidate { kind: CandidateKind::Direct, location: url.to_string() });
        }
        if let Some(doi) = doi {
            for mirror in &self.mirrors {
                match doi_url(mirror, doi) {
                    Some(landing) => plan.push(DocumentCandidate {
                        kind: CandidateKind::Mirror,
                        location: landing.to_string(),
                    }),
                    None => tracing::warn!(mirror = %mirror, "mirror URL cannot take a DOI path, skipping"),
                }
            }
            if self.resolver.is_some() {
                plan.push(DocumentCandidate { kind: CandidateKind::Resolver, location: doi.to_string() });
            }
        }
        plan
    }

    /// Return the first validated document among the candidates.
    pub async fn download(&self, pdf_url: Option<&str>, doi: Option<&str>) -> Result<Vec<u8>, AcquisitionError> {
        let mut attempted: Vec<CandidateKind> = Vec::new();
        for candidate in self.candidates(pdf_url, doi) {
            if !attempted.contains(&candidate.kind) {
                attempted.push(candidate.kind);
            }
            match self.attempt(&candidate).await {
                Ok(bytes) => {
                    tracing::info!(kind = %candidate.kind, location = %candidate.location, size = bytes.len(), "document acquired");
                    return Ok(bytes);
                }
                Err(e) => {
                    tracing::warn!(kind = %candidate.kind, location = %candidate.location, "document attempt failed: {}", e);
                }
            }
        }

        Err(AcquisitionError {
            attempted,
            pdf_url: pdf_url.map(str::to_string),
            doi: doi.map(str::to_string),
        })
    }

    /// Download, then split into per-page text on the blocking pool.
    pub async fn acquire_and_extract(
        &self,
        pdf_url: Option<&str>,
        doi: Option<&str>,
        max_pages: usize,
    ) -> Result<String, ContentError> {
        let bytes = self.download(pdf_url, doi).await?;
        let text = tokio::task::spawn_blocking(move || extract::extract_text(&bytes, max_pages)).await??;
        Ok(text)
    }

    async fn attempt(&self, candidate: &DocumentCandidate) -> Result<Vec<u8>, AttemptError> {
        match candidate.kind {
            CandidateKind::Direct => self.fetch_document(&candidate.location).await,
            CandidateKind::Mirror => self.try_mirror(&candidate.location).await,
            CandidateKind::Resolver => self.try_resolver(&candidate.location).await,
        }
    }

    async fn fetch_document(&self, url: &str) -> Result<Vec<u8>, AttemptError> {
        let resp = self.client.get(url).timeout(self.attempt_timeout).send().await?;
        if !resp.status().is_success() {
            return Err(AttemptError::Status(resp.status()));
        }
        let bytes = resp.bytes().await?;
        if !is_valid_document(&bytes) {
            return Err(AttemptError::NotPdf);
        }
        Ok(bytes.to_vec())
    }

    async fn try_mirror(&self, landing: &str) -> Result<Vec<u8>, AttemptError> {
        let landing_url = Url::parse(landing).map_err(|_| AttemptError::BadUrl(landing.to_string()))?;
        let resp = self.client.get(landing_url.clone()).timeout(self.attempt_timeout).send().await?;
        if !resp.status().is_success() {
            return Err(AttemptError::Status(resp.status()));
        }
        let html = resp.text().await?;
        let link = mirror::find_document_link(&html).ok_or(AttemptError::NoLink)?;
        let target = mirror::absolutize(&link, &landing_url).ok_or(AttemptError::BadUrl(link))?;
        tracing::debug!(landing, target = %target, "mirror document link found");
        self.fetch_document(target.as_str()).await
    }

    async fn try_resolver(&self, doi: &str) -> Result<Vec<u8>, AttemptError> {
        let resolver = self.resolver.as_ref().ok_or(AttemptError::NoLocation)?;
        let url = resolver.get_pdf_url(doi).await?.ok_or(AttemptError::NoLocation)?;
        tracing::debug!(doi, url = %url, "resolver offered location");
        self.fetch_document(&url).await
    }
}
