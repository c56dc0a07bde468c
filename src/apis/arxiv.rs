use super::paging::{self, Page, PagePolicy, ThrottlePolicy};
use super::{check_status, truncate_query, PaperRecord, PaperSource, Provider, SourceError, SourceQuery};
use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::time::Duration;

const BASE_URL: &str = "https://export.arxiv.org/api/query";

pub struct ArxivClient {
    client: reqwest::Client,
    base_url: String,
    policy: PagePolicy,
}

impl ArxivClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: BASE_URL.to_string(),
            policy: PagePolicy {
                max_page_size: 200,
                page_delay: Duration::from_millis(1500),
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

    async fn fetch_page(&self, query: &SourceQuery, text: &str, offset: u32, limit: u32) -> Result<Page, SourceError> {
        let search_query = format!("all:{}", text);
        let start = offset.to_string();
        let max_results = limit.to_string();
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("search_query", search_query.as_str()),
                ("start", start.as_str()),
                ("max_results", max_results.as_str()),
                ("sortBy", "relevance"),
                ("sortOrder", "descending"),
            ])
            .send()
            .await?;
        let body = check_status(resp)?.text().await?;
        let entries = parse_atom_feed(&body)?;

        // The feed returning fewer entries than asked for means it is exhausted;
        // count before the year filter drops anything.
        let has_more = entries.len() as u32 >= limit;
        let records = entries
            .into_iter()
            .filter(|r| query.accepts_year(r.year))
            .collect();
        Ok(Page { records, has_more })
    }
}

#[async_trait]
impl PaperSource for ArxivClient {
    fn name(&self) -> &str {
        "arxiv"
    }

    fn provider(&self) -> Provider {
        Provider::ArXiv
    }

    async fn search(&self, query: &SourceQuery) -> Result<Vec<PaperRecord>, SourceError> {
        let text = truncate_query(&query.query);
        let records = paging::paginate(self.name(), &self.policy, query.max_results, |offset, limit| {
            self.fetch_page(query, &text, offset, limit)
        })
        .await;
        tracing::debug!(query = %text, count = records.len(), "arxiv search finished");
        Ok(records)
    }
}

#[derive(Default)]
struct EntryBuilder {
    id: String,
    title: String,
    summary: String,
    published: String,
    authors: Vec<String>,
    categories: Vec<String>,
    pdf_link: Option<String>,
    /// From a `doi.org` link; takes precedence over `<arxiv:doi>`.
    link_doi: Option<String>,
    doi: Option<String>,
}

impl EntryBuilder {
    fn link(&mut self, e: &BytesStart<'_>) {
        let mut href = String::new();
        let mut kind = String::new();
        for attr in e.attributes().flatten() {
            let val = String::from_utf8_lossy(&attr.value).to_string();
            match attr.key.as_ref() {
                b"href" => href = val,
                b"type" => kind = val,
                _ => {}
            }
        }
        if kind == "application/pdf" && self.pdf_link.is_none() {
            self.pdf_link = Some(href);
        } else if self.link_doi.is_none() {
            if let Some((_, doi)) = href.split_once("doi.org/") {
                self.link_doi = Some(doi.to_string());
            }
        }
    }

    fn category(&mut self, e: &BytesStart<'_>) {
        for attr in e.attributes().flatten() {
            if attr.key.as_ref() == b"term" {
                self.categories.push(String::from_utf8_lossy(&attr.value).to_string());
            }
        }
    }

    fn build(self) -> Option<PaperRecord> {
        let arxiv_id = self.id.rsplit("/abs/").next().unwrap_or(&self.id).trim().to_string();
        if arxiv_id.is_empty() || self.title.trim().is_empty() {
            return None;
        }
        let published = self.published.trim();
        let year = published.get(..4).and_then(|y| y.parse::<u32>().ok());
        let pdf_url = self
            .pdf_link
            .unwrap_or_else(|| format!("https://arxiv.org/pdf/{}", arxiv_id));
        Some(PaperRecord {
            id: format!("arxiv:{}", arxiv_id),
            title: self.title.replace('\n', " ").trim().to_string(),
            authors: self.authors,
            year,
            published_date: published.get(..10).map(str::to_string),
            abstract_text: self.summary.replace('\n', " ").trim().to_string(),
            citation_count: None,
            url: self.id.trim().to_string(),
            pdf_url: Some(pdf_url),
            doi: self.link_doi.or(self.doi).map(|d| d.trim().to_string()),
            source: Provider::ArXiv,
            fields: self.categories,
        })
    }
}

fn parse_atom_feed(xml: &str) -> Result<Vec<PaperRecord>, SourceError> {
    let mut reader = Reader::from_str(xml);
    let mut papers = Vec::new();
    let mut entry: Option<EntryBuilder> = None;
    let mut current_tag = String::new();
    let mut author_name = String::new();
    let mut in_author = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "entry" {
                    entry = Some(EntryBuilder::default());
                } else if let Some(ref mut current) = entry {
                    match tag.as_str() {
                        "author" => {
                            in_author = true;
                            author_name.clear();
                        }
                        "link" => current.link(&e),
                        "category" => current.category(&e),
                        _ => {}
                    }
                    current_tag = tag;
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(ref mut current) = entry {
                    match e.name().as_ref() {
                        b"link" => current.link(&e),
                        b"category" => current.category(&e),
                        _ => {}
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(ref mut current) = entry {
                    let text = e.unescape().unwrap_or_default().to_string();
                    match current_tag.as_str() {
                        "title" => current.title.push_str(&text),
                        "summary" => current.summary.push_str(&text),
                        "id" if current.id.is_empty() => current.id = text,
                        "published" => current.published.push_str(&text),
                        "name" if in_author => author_name.push_str(&text),
                        "arxiv:doi" if current.doi.is_none() => current.doi = Some(text),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "entry" {
                    if let Some(record) = entry.take().and_then(EntryBuilder::build) {
                        papers.push(record);
                    }
                } else if tag == "author" && in_author {
                    in_author = false;
                    if let Some(ref mut current) = entry {
                        if !author_name.trim().is_empty() {
                            current.authors.push(author_name.trim().to_string());
                        }
                    }
                }
                if tag == current_tag {
                    current_tag.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SourceError::Parse(format!("XML parse error: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(papers)
}
