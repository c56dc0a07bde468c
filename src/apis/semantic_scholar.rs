use super::paging::{self, Page, PagePolicy, ThrottlePolicy};
use super::{check_status, truncate_query, PaperRecord, PaperSource, Provider, SourceError, SourceQuery};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const BASE_URL: &str = "https://api.semanticscholar.org/graph/v1";

const FIELDS: &str = "title,url,year,citationCount,openAccessPdf,abstract,authors,fieldsOfStudy,externalIds";

pub struct SemanticScholarClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    policy: PagePolicy,
}

impl SemanticScholarClient {
    pub fn new(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self {
            client,
            api_key,
            base_url: BASE_URL.to_string(),
            policy: PagePolicy {
                max_page_size: 100,
                page_delay: Duration::from_millis(1100),
                throttle: ThrottlePolicy::default(),
            },
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_policy(mut self, policy: PagePolicy) -> Self {
        self.policy = policy;
        self
    }

    fn add_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("x-api-key", key),
            None => req,
        }
    }

    async fn fetch_page(&self, query: &SourceQuery, text: &str, offset: u32, limit: u32) -> Result<Page, SourceError> {
        let url = format!("{}/paper/search", self.base_url);
        let mut params = vec![
            ("query", text.to_string()),
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
            ("fields", FIELDS.to_string()),
        ];
        if let Some(years) = year_filter(query) {
            params.push(("year", years));
        }
        if query.prefer_open_access {
            params.push(("openAccessPdf", String::new()));
        }

        let resp = self.add_auth(self.client.get(&url).query(&params)).send().await?;
        let resp: S2SearchResponse = check_status(resp)?
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("Semantic Scholar response: {}", e)))?;

        let records = resp.data.unwrap_or_default().into_iter().map(s2_to_record).collect();
        Ok(Page {
            records,
            has_more: offset + limit < resp.total.unwrap_or(0),
        })
    }
}

/// Server-side year range, `"<min>-<max>"` with either side possibly empty.
fn year_filter(query: &SourceQuery) -> Option<String> {
    if query.year_min.is_none() && query.year_max.is_none() {
        return None;
    }
    let side = |y: Option<u32>| y.map(|y| y.to_string()).unwrap_or_default();
    Some(format!("{}-{}", side(query.year_min), side(query.year_max)))
}

#[derive(Deserialize)]
struct S2SearchResponse {
    total: Option<u32>,
    data: Option<Vec<S2Paper>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2Paper {
    paper_id: Option<String>,
    title: Option<String>,
    authors: Option<Vec<S2Author>>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    year: Option<u32>,
    external_ids: Option<S2ExternalIds>,
    citation_count: Option<u32>,
    url: Option<String>,
    open_access_pdf: Option<S2Pdf>,
    fields_of_study: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct S2Author {
    name: Option<String>,
}

#[derive(Deserialize)]
struct S2ExternalIds {
    #[serde(rename = "DOI")]
    doi: Option<String>,
}

#[derive(Deserialize)]
struct S2Pdf {
    url: Option<String>,
}

fn s2_to_record(p: S2Paper) -> PaperRecord {
    PaperRecord {
        id: format!("s2:{}", p.paper_id.unwrap_or_default()),
        title: p.title.unwrap_or_default(),
        authors: p
            .authors
            .unwrap_or_default()
            .into_iter()
            .map(|a| a.name.unwrap_or_default())
            .collect(),
        year: p.year,
        published_date: None,
        abstract_text: p.abstract_text.unwrap_or_default(),
        citation_count: p.citation_count,
        url: p.url.unwrap_or_default(),
        pdf_url: p.open_access_pdf.and_then(|pdf| pdf.url).filter(|u| !u.is_empty()),
        doi: p.external_ids.and_then(|e| e.doi),
        source: Provider::SemanticScholar,
        fields: p.fields_of_study.unwrap_or_default(),
    }
}

#[async_trait]
impl PaperSource for SemanticScholarClient {
    fn name(&self) -> &str {
        "semantic_scholar"
    }

    fn provider(&self) -> Provider {
        Provider::SemanticScholar
    }

    async fn search(&self, query: &SourceQuery) -> Result<Vec<PaperRecord>, SourceError> {
        let text = truncate_query(&query.query);
        let records = paging::paginate(self.name(), &self.policy, query.max_results, |offset, limit| {
            self.fetch_page(query, &text, offset, limit)
        })
        .await;
        tracing::debug!(query = %text, count = records.len(), "semantic scholar search finished");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy() -> PagePolicy {
        PagePolicy {
            max_page_size: 100,
            page_delay: Duration::from_millis(1),
            throttle: ThrottlePolicy {
                max_retries: 3,
                backoff_step: Duration::from_millis(1),
                backoff_cap: Duration::from_millis(5),
            },
        }
    }

    fn client(server: &MockServer, api_key: Option<&str>) -> SemanticScholarClient {
        SemanticScholarClient::new(reqwest::Client::new(), api_key.map(String::from))
            .with_base_url(server.uri())
            .with_policy(fast_policy())
    }

    fn papers(range: std::ops::Range<u32>) -> serde_json::Value {
        let data: Vec<_> = range
            .map(|i| {
                json!({
                    "paperId": format!("p{}", i),
                    "title": format!("Paper {}", i),
                    "authors": [{"name": "Ada Lovelace"}],
                    "abstract": null,
                    "year": 2021,
                    "citationCount": i,
                    "url": format!("https://www.semanticscholar.org/paper/p{}", i),
                    "openAccessPdf": {"url": format!("https://example.org/p{}.pdf", i)},
                    "fieldsOfStudy": ["Computer Science"],
                    "externalIds": {"DOI": format!("10.1/p{}", i)}
                })
            })
            .collect();
        json!(data)
    }

    #[tokio::test]
    async fn normalizes_records() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paper/search"))
            .and(header("x-api-key", "secret"))
            .and(query_param("year", "2019-"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 1,
                "data": papers(0..1)
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut q = SourceQuery::new("graph neural networks", 10);
        q.year_min = Some(2019);
        let records = client(&server, Some("secret")).search(&q).await.unwrap();

        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.id, "s2:p0");
        assert_eq!(r.authors, vec!["Ada Lovelace".to_string()]);
        assert_eq!(r.abstract_text, "");
        assert_eq!(r.doi.as_deref(), Some("10.1/p0"));
        assert_eq!(r.pdf_url.as_deref(), Some("https://example.org/p0.pdf"));
        assert_eq!(r.fields, vec!["Computer Science".to_string()]);
        assert_eq!(r.source, Provider::SemanticScholar);
    }

    #[tokio::test]
    async fn open_access_flag_is_sent_when_preferred() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paper/search"))
            .and(query_param("openAccessPdf", ""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 1,
                "data": papers(0..1)
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut q = SourceQuery::new("x", 10);
        q.prefer_open_access = true;
        let records = client(&server, None).search(&q).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn open_access_flag_is_omitted_otherwise() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paper/search"))
            .and(query_param_is_missing("openAccessPdf"))
            .and(query_param_is_missing("year"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 1,
                "data": papers(0..1)
            })))
            .expect(1)
            .mount(&server)
            .await;

        let records = client(&server, None).search(&SourceQuery::new("x", 10)).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn paginates_by_offset_until_total() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paper/search"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 150,
                "data": papers(0..100)
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/paper/search"))
            .and(query_param("offset", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 150,
                "data": papers(100..150)
            })))
            .expect(1)
            .mount(&server)
            .await;

        let records = client(&server, None)
            .search(&SourceQuery::new("x", 300))
            .await
            .unwrap();
        assert_eq!(records.len(), 150);
    }

    #[tokio::test]
    async fn gives_up_after_repeated_throttling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paper/search"))
            .respond_with(ResponseTemplate::new(429))
            .expect(4)
            .mount(&server)
            .await;

        let records = client(&server, None)
            .search(&SourceQuery::new("x", 20))
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn server_error_returns_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paper/search"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let records = client(&server, None)
            .search(&SourceQuery::new("x", 20))
            .await
            .unwrap();
        assert!(records.is_empty());
    }
}
