//! Pagination and throttle handling shared by the search adapters.
//!
//! Every adapter describes its provider's limits with a [`PagePolicy`] and
//! supplies a closure that fetches one page. [`paginate`] owns the loop:
//! page-size capping, the post-page delay, retrying throttled requests with
//! a capped linear backoff, and returning the partial accumulation when the
//! provider gives up on us.

use std::future::Future;
use std::time::Duration;

use super::{PaperRecord, SourceError};

#[derive(Debug, Clone)]
pub struct ThrottlePolicy {
    /// Retries of the same request after a "too many requests" response.
    pub max_retries: u32,
    pub backoff_step: Duration,
    pub backoff_cap: Duration,
}

impl ThrottlePolicy {
    /// Wait before retry number `attempt` (1-based): `min(step * attempt, cap)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        (self.backoff_step * attempt).min(self.backoff_cap)
    }
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_step: Duration::from_secs(3),
            backoff_cap: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PagePolicy {
    /// Provider's per-request maximum.
    pub max_page_size: u32,
    /// Minimum gap between a successful page and the next request.
    pub page_delay: Duration,
    pub throttle: ThrottlePolicy,
}

/// One fetched page, already normalized and filtered.
#[derive(Debug, Default)]
pub struct Page {
    pub records: Vec<PaperRecord>,
    pub has_more: bool,
}

/// Run `call` until it stops returning [`SourceError::Throttled`] or the
/// retry budget is spent. The last outcome is returned as-is.
pub async fn with_throttle_retry<T, F, Fut>(
    source: &str,
    policy: &ThrottlePolicy,
    mut call: F,
) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Err(SourceError::Throttled) if attempt < policy.max_retries => {
                attempt += 1;
                let wait = policy.backoff(attempt);
                tracing::warn!(
                    source,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    "rate limited, backing off"
                );
                tokio::time::sleep(wait).await;
            }
            other => return other,
        }
    }
}

/// Request pages of `min(max_results, policy.max_page_size)` records until
/// `max_results` is reached or the provider has nothing more. Never fails:
/// a persistent throttle or any other error ends pagination and the records
/// gathered so far are returned.
pub async fn paginate<F, Fut>(
    source: &str,
    policy: &PagePolicy,
    max_results: u32,
    mut fetch_page: F,
) -> Vec<PaperRecord>
where
    F: FnMut(u32, u32) -> Fut,
    Fut: Future<Output = Result<Page, SourceError>>,
{
    let mut records = Vec::new();
    let limit = max_results.min(policy.max_page_size);
    if limit == 0 {
        return records;
    }

    let mut offset = 0;
    while offset < max_results {
        let page = match with_throttle_retry(source, &policy.throttle, || fetch_page(offset, limit)).await {
            Ok(page) => page,
            Err(SourceError::Throttled) => {
                tracing::warn!(source, offset, kept = records.len(), "rate limit exceeded, giving up");
                break;
            }
            Err(e) => {
                tracing::error!(source, offset, kept = records.len(), "search error: {}", e);
                break;
            }
        };

        records.extend(page.records);
        offset += limit;
        if !page.has_more || offset >= max_results {
            break;
        }
        tokio::time::sleep(policy.page_delay).await;
    }

    records.truncate(max_results as usize);
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::Provider;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn fast_policy(page_size: u32) -> PagePolicy {
        PagePolicy {
            max_page_size: page_size,
            page_delay: Duration::from_millis(1),
            throttle: ThrottlePolicy {
                max_retries: 3,
                backoff_step: Duration::from_millis(1),
                backoff_cap: Duration::from_millis(5),
            },
        }
    }

    fn record(n: u32) -> PaperRecord {
        PaperRecord {
            id: format!("test:{}", n),
            title: format!("Paper {}", n),
            authors: vec![],
            year: None,
            published_date: None,
            abstract_text: String::new(),
            citation_count: None,
            url: String::new(),
            pdf_url: None,
            doi: None,
            source: Provider::SemanticScholar,
            fields: vec![],
        }
    }

    fn page(offset: u32, limit: u32, has_more: bool) -> Page {
        Page {
            records: (offset..offset + limit).map(record).collect(),
            has_more,
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = ThrottlePolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(3));
        assert_eq!(policy.backoff(3), Duration::from_secs(9));
        assert_eq!(policy.backoff(4), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn stops_at_max_results() {
        let calls = AtomicU32::new(0);
        let records = paginate("test", &fast_policy(10), 25, |offset, limit| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(page(offset, limit, true)) }
        })
        .await;
        assert_eq!(records.len(), 25);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_when_provider_runs_dry() {
        let records = paginate("test", &fast_policy(10), 100, |offset, limit| async move {
            Ok(page(offset, limit, offset < 10))
        })
        .await;
        assert_eq!(records.len(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_between_pages_but_not_after_last() {
        let policy = PagePolicy {
            page_delay: Duration::from_millis(1100),
            ..fast_policy(10)
        };
        let calls: Mutex<Vec<Instant>> = Mutex::new(Vec::new());
        let records = paginate("test", &policy, 100, |offset, limit| {
            calls.lock().unwrap().push(Instant::now());
            async move { Ok(page(offset, limit, offset < 20)) }
        })
        .await;
        let finished = Instant::now();

        assert_eq!(records.len(), 30);
        let calls = calls.into_inner().unwrap();
        assert_eq!(calls.len(), 3);
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] >= policy.page_delay);
        }
        assert!(finished - calls[2] < policy.page_delay);
    }

    #[tokio::test]
    async fn retries_same_page_after_throttle() {
        let calls = AtomicU32::new(0);
        let records = paginate("test", &fast_policy(5), 5, |offset, limit| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(SourceError::Throttled)
                } else {
                    Ok(page(offset, limit, false))
                }
            }
        })
        .await;
        assert_eq!(records.len(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn persistent_throttle_keeps_partial() {
        let calls = AtomicU32::new(0);
        let records = paginate("test", &fast_policy(5), 20, |offset, limit| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok(page(offset, limit, true))
                } else {
                    Err(SourceError::Throttled)
                }
            }
        })
        .await;
        assert_eq!(records.len(), 5);
        // first page, then the original throttled request plus three retries
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn other_errors_abort_without_retry() {
        let calls = AtomicU32::new(0);
        let records = paginate("test", &fast_policy(5), 20, |offset, limit| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok(page(offset, limit, true))
                } else {
                    Err(SourceError::Parse("bad page".into()))
                }
            }
        })
        .await;
        assert_eq!(records.len(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
