use std::sync::Arc;

use paper_acquire::acquire::{ContentError, DocumentPipeline};
use paper_acquire::apis::PaperSource;
use paper_acquire::config::Config;
use paper_acquire::extract::DEFAULT_MAX_PAGES;
use paper_acquire::search::{self, SearchSpec, DEFAULT_MAX_RESULTS};
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters,
    model::*, tool, tool_handler, tool_router,
    transport::stdio, ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

const MAX_SEARCH_RESULTS: u32 = 500;
const MAX_PAGES_LIMIT: usize = 200;

// ── Parameter structs ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchPapersParams {
    #[schemars(description = "Free-text search queries; each is sent to every enabled source")]
    queries: Vec<String>,
    #[schemars(description = "Maximum results to return (default 200, max 500)")]
    max_results: Option<u32>,
    #[schemars(description = "Earliest publication year to include")]
    year_min: Option<u32>,
    #[schemars(description = "Latest publication year to include")]
    year_max: Option<u32>,
    #[schemars(description = "Ask sources for open-access papers only where supported (default true)")]
    prefer_open_access: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct FetchContentParams {
    #[schemars(description = "Direct URL of the paper's PDF")]
    pdf_url: Option<String>,
    #[schemars(description = "DOI of the paper, used for mirror and open-access lookups")]
    doi: Option<String>,
    #[schemars(description = "Maximum pages of text to extract (default 30, max 200)")]
    max_pages: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ResolvePdfUrlParams {
    #[schemars(description = "DOI of the paper")]
    doi: String,
}

// ── Server ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PaperAcquireServer {
    tool_router: ToolRouter<Self>,
    config: Arc<Config>,
    sources: Arc<Vec<Arc<dyn PaperSource>>>,
    pipeline: Arc<DocumentPipeline>,
}

#[tool_router]
impl PaperAcquireServer {
    pub fn create() -> anyhow::Result<Self> {
        let config = Config::from_env();
        let client = config.build_client()?;
        let sources = config.build_sources(&client);
        let pipeline = config.build_pipeline(&client);

        tracing::info!(
            "Initialized {} paper sources, {} mirror(s), deadline={}s",
            sources.len(),
            config.mirrors.len(),
            config.search_deadline.as_secs()
        );

        Ok(Self {
            tool_router: Self::tool_router(),
            config: Arc::new(config),
            sources: Arc::new(sources),
            pipeline: Arc::new(pipeline),
        })
    }

    #[tool(description = "List paper sources and document acquisition stages with their status")]
    async fn list_sources(&self) -> Result<CallToolResult, McpError> {
        let statuses = self.config.source_status();
        let json = serde_json::to_string_pretty(&statuses)
            .map_err(|e| McpError::internal_error(format!("Serialization error: {}", e), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(description = "Search papers across all enabled sources. Returns deduplicated results ranked by citations, then year.")]
    async fn search_papers(
        &self,
        Parameters(params): Parameters<SearchPapersParams>,
    ) -> Result<CallToolResult, McpError> {
        let mut spec = SearchSpec::new(params.queries);
        spec.max_results = params.max_results.unwrap_or(DEFAULT_MAX_RESULTS).min(MAX_SEARCH_RESULTS);
        spec.year_min = params.year_min;
        spec.year_max = params.year_max;
        if let Some(prefer) = params.prefer_open_access {
            spec.prefer_open_access = prefer;
        }
        let results = search::federated_search(&self.sources, &spec, self.config.search_deadline).await;

        let json = serde_json::to_string_pretty(&results)
            .map_err(|e| McpError::internal_error(format!("{}", e), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(description = "Download a paper's PDF (direct URL, then mirrors and open-access lookup by DOI) and return its text page by page")]
    async fn fetch_paper_content(
        &self,
        Parameters(params): Parameters<FetchContentParams>,
    ) -> Result<CallToolResult, McpError> {
        if params.pdf_url.is_none() && params.doi.is_none() {
            return Err(McpError::invalid_params(
                "Either pdf_url or doi must be provided".to_string(),
                None,
            ));
        }
        let max_pages = params.max_pages.unwrap_or(DEFAULT_MAX_PAGES).clamp(1, MAX_PAGES_LIMIT);

        match self
            .pipeline
            .acquire_and_extract(params.pdf_url.as_deref(), params.doi.as_deref(), max_pages)
            .await
        {
            Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
            Err(ContentError::Acquisition(e)) => {
                tracing::warn!("{}", e);
                Err(McpError::internal_error(e.to_string(), None))
            }
            Err(e) => {
                tracing::error!("Content extraction failed: {}", e);
                Err(McpError::internal_error(e.to_string(), None))
            }
        }
    }

    #[tool(description = "Find the best open-access PDF URL for a paper via Unpaywall (requires DOI)")]
    async fn resolve_pdf_url(
        &self,
        Parameters(params): Parameters<ResolvePdfUrlParams>,
    ) -> Result<CallToolResult, McpError> {
        let client = self.pipeline.resolver().ok_or_else(|| {
            McpError::invalid_params(
                "Unpaywall not configured. Set UNPAYWALL_EMAIL environment variable.".to_string(),
                None,
            )
        })?;

        match client.get_pdf_url(&params.doi).await {
            Ok(Some(url)) => Ok(CallToolResult::success(vec![Content::text(
                format!("PDF URL: {}", url),
            )])),
            Ok(None) => Ok(CallToolResult::success(vec![Content::text(
                format!("No open-access PDF found for DOI: {}", params.doi),
            )])),
            Err(e) => Err(McpError::internal_error(format!("Unpaywall error: {}", e), None)),
        }
    }
}

#[tool_handler]
impl ServerHandler for PaperAcquireServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Search Semantic Scholar and arXiv in parallel for papers, then fetch \
                 a paper's full text from its PDF link, configured mirrors, or an \
                 open-access copy found through Unpaywall."
                    .into(),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("Starting paper-acquire MCP server");

    let server = PaperAcquireServer::create()?;
    let service = server.serve(stdio()).await?;
    service.waiting().await?;

    Ok(())
}
