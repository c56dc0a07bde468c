use super::paging::{with_throttle_retry, ThrottlePolicy};
use super::{check_status, doi_url, SourceError};
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;

const BASE_URL: &str = "https://api.unpaywall.org/v2";

/// Open-access location lookup keyed by DOI.
pub struct UnpaywallClient {
    client: reqwest::Client,
    email: String,
    base_url: String,
    timeout: Duration,
    throttle: ThrottlePolicy,
}

impl UnpaywallClient {
    pub fn new(client: reqwest::Client, email: String) -> Self {
        Self {
            client,
            email,
            base_url: BASE_URL.to_string(),
            timeout: Duration::from_secs(45),
            throttle: ThrottlePolicy::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_throttle(mut self, throttle: ThrottlePolicy) -> Self {
        self.throttle = throttle;
        self
    }

    /// Best known open-access location for `doi`: the direct PDF link when
    /// one is offered, otherwise the landing page. `None` when the DOI is
    /// unknown or has no open-access copy.
    pub async fn get_pdf_url(&self, doi: &str) -> Result<Option<String>, SourceError> {
        with_throttle_retry("unpaywall", &self.throttle, || self.lookup(doi)).await
    }

    async fn lookup(&self, doi: &str) -> Result<Option<String>, SourceError> {
        let base = Url::parse(&self.base_url)
            .map_err(|e| SourceError::Api(format!("invalid Unpaywall base URL {}: {}", self.base_url, e)))?;
        let url = doi_url(&base, doi)
            .ok_or_else(|| SourceError::Api(format!("cannot append DOI to {}", self.base_url)))?;
        let resp = self
            .client
            .get(url)
            .query(&[("email", self.email.as_str())])
            .timeout(self.timeout)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let data: UnpaywallResponse = check_status(resp)?
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("Unpaywall response: {}", e)))?;
        Ok(data.best_oa_location.and_then(|loc| loc.url_for_pdf.or(loc.url)))
    }
}

#[derive(Deserialize)]
struct UnpaywallResponse {
    best_oa_location: Option<UnpaywallLocation>,
}

#[derive(Deserialize)]
struct UnpaywallLocation {
    url_for_pdf: Option<String>,
    url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> UnpaywallClient {
        UnpaywallClient::new(reqwest::Client::new(), "me@example.org".into())
            .with_base_url(server.uri())
            .with_throttle(ThrottlePolicy {
                max_retries: 3,
                backoff_step: Duration::from_millis(1),
                backoff_cap: Duration::from_millis(5),
            })
    }

    #[tokio::test]
    async fn prefers_pdf_link() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/10.1/abc"))
            .and(query_param("email", "me@example.org"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "best_oa_location": {
                    "url_for_pdf": "https://repo.example/abc.pdf",
                    "url": "https://repo.example/abc"
                }
            })))
            .mount(&server)
            .await;

        let url = client(&server).get_pdf_url("10.1/abc").await.unwrap();
        assert_eq!(url.as_deref(), Some("https://repo.example/abc.pdf"));
    }

    #[tokio::test]
    async fn falls_back_to_landing_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/10.1/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "best_oa_location": { "url_for_pdf": null, "url": "https://repo.example/abc" }
            })))
            .mount(&server)
            .await;

        let url = client(&server).get_pdf_url("10.1/abc").await.unwrap();
        assert_eq!(url.as_deref(), Some("https://repo.example/abc"));
    }

    #[tokio::test]
    async fn doi_is_sent_as_encoded_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/10.1002/x;2-%23"))
            .and(query_param("email", "me@example.org"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "best_oa_location": { "url_for_pdf": "https://repo.example/x.pdf" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let url = client(&server).get_pdf_url("10.1002/x;2-#").await.unwrap();
        assert_eq!(url.as_deref(), Some("https://repo.example/x.pdf"));
    }

    #[tokio::test]
    async fn unknown_doi_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(client(&server).get_pdf_url("10.1/none").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retries_throttled_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "best_oa_location": { "url_for_pdf": "https://repo.example/x.pdf" }
            })))
            .mount(&server)
            .await;

        let url = client(&server).get_pdf_url("10.1/x").await.unwrap();
        assert_eq!(url.as_deref(), Some("https://repo.example/x.pdf"));
    }
}
