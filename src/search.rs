//! Fan-out search across every enabled provider, then dedup and rank.
//!
//! One tokio task is spawned per (query, provider) pair. All of them race a
//! single deadline measured from dispatch; whatever has not finished by then
//! is aborted and contributes nothing. Failed tasks are logged and skipped so
//! the aggregate call never fails.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::apis::{PaperRecord, PaperSource, SourceError, SourceQuery};

/// Smallest per-query budget handed to each provider.
pub const MIN_PER_QUERY: u32 = 20;

/// Result cap when the caller does not give one.
pub const DEFAULT_MAX_RESULTS: u32 = 200;

/// Default wall-clock budget for one [`federated_search`] call.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(45);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSpec {
    pub queries: Vec<String>,
    pub max_results: u32,
    pub year_min: Option<u32>,
    pub year_max: Option<u32>,
    pub prefer_open_access: bool,
}

impl SearchSpec {
    /// `queries` with the default cap, no year bounds, and open access preferred.
    pub fn new(queries: Vec<String>) -> Self {
        Self {
            queries,
            max_results: DEFAULT_MAX_RESULTS,
            year_min: None,
            year_max: None,
            prefer_open_access: true,
        }
    }

    /// `max(max_results / |queries|, 20)`, identical for every provider.
    pub fn per_query_limit(&self) -> u32 {
        let n = self.queries.len().max(1) as u32;
        (self.max_results / n).max(MIN_PER_QUERY)
    }

    fn source_query(&self, query: &str) -> SourceQuery {
        SourceQuery {
            query: query.to_string(),
            max_results: self.per_query_limit(),
            year_min: self.year_min,
            year_max: self.year_max,
            prefer_open_access: self.prefer_open_access,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Cancelled)
    }

    fn can_advance_to(self, next: TaskState) -> bool {
        match self {
            TaskState::Pending => next == TaskState::Running,
            TaskState::Running => next.is_terminal(),
            _ => false,
        }
    }
}

/// How a spawned task ended.
#[derive(Debug)]
pub enum TaskOutcome {
    Completed(Vec<PaperRecord>),
    Failed(String),
    Cancelled,
}

/// One (query, provider) unit of work.
pub struct FetchTask {
    pub query: String,
    pub source: String,
    state: TaskState,
    handle: Option<JoinHandle<Result<Vec<PaperRecord>, SourceError>>>,
}

impl FetchTask {
    pub fn new(query: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            source: source.into(),
            state: TaskState::Pending,
            handle: None,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Move to `next` if the transition is legal. Terminal states are final.
    pub fn advance(&mut self, next: TaskState) -> bool {
        if !self.state.can_advance_to(next) {
            tracing::debug!(query = %self.query, source = %self.source, from = ?self.state, to = ?next, "ignored task transition");
            return false;
        }
        self.state = next;
        true
    }

    fn spawn(&mut self, source: Arc<dyn PaperSource>, query: SourceQuery) {
        self.handle = Some(tokio::spawn(async move { source.search(&query).await }));
        self.advance(TaskState::Running);
    }

    /// Wait for the task until `deadline`, aborting it if time runs out.
    async fn settle(&mut self, deadline: Instant) -> TaskOutcome {
        let Some(handle) = self.handle.as_mut() else {
            self.advance(TaskState::Failed);
            return TaskOutcome::Failed("task was never started".into());
        };

        let outcome = match tokio::time::timeout_at(deadline, &mut *handle).await {
            Ok(Ok(Ok(records))) => TaskOutcome::Completed(records),
            Ok(Ok(Err(e))) => TaskOutcome::Failed(e.to_string()),
            Ok(Err(join_err)) => TaskOutcome::Failed(format!("task panicked: {}", join_err)),
            Err(_) => {
                handle.abort();
                TaskOutcome::Cancelled
            }
        };
        self.advance(match outcome {
            TaskOutcome::Completed(_) => TaskState::Completed,
            TaskOutcome::Failed(_) => TaskState::Failed,
            TaskOutcome::Cancelled => TaskState::Cancelled,
        });
        self.handle = None;
        outcome
    }
}

impl Drop for FetchTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Search every query against every source concurrently under one deadline,
/// then merge. Never fails; an empty query list short-circuits without any
/// network traffic. Dropping the returned future aborts every task still
/// in flight.
pub async fn federated_search(
    sources: &[Arc<dyn PaperSource>],
    spec: &SearchSpec,
    deadline: Duration,
) -> Vec<PaperRecord> {
    if spec.queries.is_empty() || sources.is_empty() {
        return Vec::new();
    }

    let deadline = Instant::now() + deadline;
    let mut tasks = Vec::with_capacity(spec.queries.len() * sources.len());
    for query in &spec.queries {
        for source in sources {
            let mut task = FetchTask::new(query.as_str(), source.name());
            task.spawn(Arc::clone(source), spec.source_query(query));
            tasks.push(task);
        }
    }

    let mut all_results = Vec::new();
    for task in &mut tasks {
        match task.settle(deadline).await {
            TaskOutcome::Completed(records) => {
                tracing::debug!(query = %task.query, source = %task.source, count = records.len(), "search task completed");
                all_results.extend(records);
            }
            TaskOutcome::Failed(e) => {
                tracing::warn!(query = %task.query, source = %task.source, "search task failed: {}", e);
            }
            TaskOutcome::Cancelled => {
                tracing::warn!(query = %task.query, source = %task.source, "search task timed out and was cancelled");
            }
        }
    }

    merge_results(all_results, spec.max_results as usize)
}

/// Lowercased, trimmed title.
pub fn dedup_key(record: &PaperRecord) -> String {
    record.title.trim().to_lowercase()
}

/// `(citation_count, year)` with missing values as zero; sorted descending.
pub fn rank_key(record: &PaperRecord) -> (u32, u32) {
    (record.citation_count.unwrap_or(0), record.year.unwrap_or(0))
}

/// Keep the first record seen per title, sort by rank descending and
/// truncate to `limit`.
pub fn merge_results(results: Vec<PaperRecord>, limit: usize) -> Vec<PaperRecord> {
    let mut seen_titles: HashSet<String> = HashSet::new();
    let mut merged: Vec<PaperRecord> = results
        .into_iter()
        .filter(|paper| seen_titles.insert(dedup_key(paper)))
        .collect();

    merged.sort_by(|a, b| rank_key(b).cmp(&rank_key(a)));
    merged.truncate(limit);
    merged
}
