//! In-memory fakes for the transport, stage-client and resolver traits
//! (testing only).
//!
//! `FakeTransport` answers by URL substring, `FakePipeline` serves canned
//! runs, and `FakeRepo` implements all three VCS resolver traits. Each one
//! counts its calls so tests can assert on fan-out behaviour.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{LookupError, PipelineFetchError, TransportError};
use crate::pipeline::{PipelineRun, PipelineStageClient};
use crate::repository::{
    Author, AuthorResolver, PullRequest, PullRequestResolver, RepoRef, Tag, TagResolver,
};
use crate::transport::{HttpResponse, Transport};

// ---------------------------------------------------------------------------
// FakeTransport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Canned {
    Data(Value),
    Empty,
    NotFound,
    Fail(String),
}

/// Transport that answers from canned routes.
///
/// The first route whose pattern is a substring of the requested URL wins.
/// Unrouted URLs resolve as "no data".
#[derive(Debug, Default)]
pub struct FakeTransport {
    routes: Mutex<Vec<(String, Canned)>>,
    calls: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn route(self, pattern: &str, canned: Canned) -> Self {
        self.routes
            .lock()
            .unwrap()
            .push((pattern.to_string(), canned));
        self
    }

    /// Answer URLs containing `pattern` with `data`.
    pub fn with_json(self, pattern: &str, data: Value) -> Self {
        self.route(pattern, Canned::Data(data))
    }

    /// Answer URLs containing `pattern` with the JSON text `body`.
    ///
    /// Panics if `body` is not JSON; fixtures are expected to be valid.
    pub fn with_body(self, pattern: &str, body: &str) -> Self {
        let data = serde_json::from_str(body).expect("fixture is not JSON");
        self.with_json(pattern, data)
    }

    /// Answer URLs containing `pattern` with an empty body.
    pub fn with_empty(self, pattern: &str) -> Self {
        self.route(pattern, Canned::Empty)
    }

    /// Answer URLs containing `pattern` with a 404.
    pub fn with_not_found(self, pattern: &str) -> Self {
        self.route(pattern, Canned::NotFound)
    }

    /// Reject calls to URLs containing `pattern`.
    pub fn with_failure(self, pattern: &str, message: &str) -> Self {
        self.route(pattern, Canned::Fail(message.to_string()))
    }

    /// Every URL requested so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of requests whose URL contains `pattern`.
    pub fn call_count(&self, pattern: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|url| url.contains(pattern))
            .count()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(
        &self,
        url: &str,
        _access_token: Option<&str>,
    ) -> Result<HttpResponse, TransportError> {
        self.calls.lock().unwrap().push(url.to_string());

        let canned = self
            .routes
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| url.contains(pattern.as_str()))
            .map(|(_, canned)| canned.clone());

        match canned {
            Some(Canned::Data(data)) => Ok(HttpResponse::ok(data)),
            Some(Canned::Empty) | None => Ok(HttpResponse::empty()),
            Some(Canned::NotFound) => Ok(HttpResponse::not_found()),
            Some(Canned::Fail(message)) => Err(TransportError::Request {
                url: url.to_string(),
                message,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// FakePipeline
// ---------------------------------------------------------------------------

/// Stage client serving runs from a map keyed by run id.
#[derive(Debug, Default)]
pub struct FakePipeline {
    runs: Mutex<HashMap<String, PipelineRun>>,
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl FakePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_run(self, run: PipelineRun) -> Self {
        self.runs.lock().unwrap().insert(run.id.clone(), run);
        self
    }

    /// Fail any fetch of `run_id` with a transport error.
    pub fn failing_on(self, run_id: &str) -> Self {
        self.failing.lock().unwrap().insert(run_id.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PipelineStageClient for FakePipeline {
    async fn get_run(&self, run_id: &str) -> Result<Option<PipelineRun>, PipelineFetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(run_id) {
            return Err(PipelineFetchError::Transport {
                run_id: run_id.to_string(),
                source: TransportError::Status {
                    url: format!("fake://runs/{run_id}"),
                    status: 500,
                },
            });
        }
        Ok(self.runs.lock().unwrap().get(run_id).cloned())
    }

    async fn get_runs(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PipelineRun>, PipelineFetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut runs: Vec<PipelineRun> = self
            .runs
            .lock()
            .unwrap()
            .values()
            .filter(|r| match (since, r.queue_time) {
                (Some(since), Some(queued)) => queued >= since,
                _ => true,
            })
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at().cmp(&a.started_at()).then(a.id.cmp(&b.id)));
        Ok(runs)
    }
}

// ---------------------------------------------------------------------------
// FakeRepo
// ---------------------------------------------------------------------------

/// VCS host fake keyed by commit id and pull request id.
#[derive(Debug, Default)]
pub struct FakeRepo {
    authors: Mutex<HashMap<String, Author>>,
    panicking: Mutex<HashSet<String>>,
    tags: Mutex<Vec<Tag>>,
    pull_requests: Mutex<HashMap<String, PullRequest>>,
    failing_pull_requests: Mutex<HashSet<String>>,
    author_calls: AtomicUsize,
    tag_calls: AtomicUsize,
    pull_request_calls: AtomicUsize,
}

impl FakeRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_author(self, commit_id: &str, author: Author) -> Self {
        self.authors
            .lock()
            .unwrap()
            .insert(commit_id.to_string(), author);
        self
    }

    /// Panic inside any author lookup for `commit_id`.
    pub fn panicking_on(self, commit_id: &str) -> Self {
        self.panicking
            .lock()
            .unwrap()
            .insert(commit_id.to_string());
        self
    }

    pub fn with_tag(self, tag: Tag) -> Self {
        self.tags.lock().unwrap().push(tag);
        self
    }

    pub fn with_pull_request(self, pr: PullRequest) -> Self {
        self.pull_requests
            .lock()
            .unwrap()
            .insert(pr.id.to_string(), pr);
        self
    }

    /// Fail any lookup of pull request `pr_id` with a transport error.
    pub fn failing_pull_request(self, pr_id: &str) -> Self {
        self.failing_pull_requests
            .lock()
            .unwrap()
            .insert(pr_id.to_string());
        self
    }

    pub fn author_calls(&self) -> usize {
        self.author_calls.load(Ordering::SeqCst)
    }

    pub fn tag_calls(&self) -> usize {
        self.tag_calls.load(Ordering::SeqCst)
    }

    pub fn pull_request_calls(&self) -> usize {
        self.pull_request_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthorResolver for FakeRepo {
    async fn resolve_author(&self, _repo: &RepoRef, commit_id: &str) -> Option<Author> {
        self.author_calls.fetch_add(1, Ordering::SeqCst);
        if self.panicking.lock().unwrap().contains(commit_id) {
            panic!("author lookup for {commit_id} blew up");
        }
        self.authors.lock().unwrap().get(commit_id).cloned()
    }
}

#[async_trait]
impl TagResolver for FakeRepo {
    async fn resolve_sync_tags(&self, _repo: &RepoRef) -> Vec<Tag> {
        self.tag_calls.fetch_add(1, Ordering::SeqCst);
        self.tags.lock().unwrap().clone()
    }
}

#[async_trait]
impl PullRequestResolver for FakeRepo {
    async fn resolve_pull_request(
        &self,
        _repo: &RepoRef,
        pr_id: &str,
    ) -> Result<PullRequest, LookupError> {
        self.pull_request_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_pull_requests.lock().unwrap().contains(pr_id) {
            return Err(LookupError::Transport(TransportError::Request {
                url: format!("fake://pullrequests/{pr_id}"),
                message: "connection reset".to_string(),
            }));
        }
        self.pull_requests
            .lock()
            .unwrap()
            .get(pr_id)
            .cloned()
            .ok_or_else(|| LookupError::NotFound {
                what: "pull request",
                id: pr_id.to_string(),
            })
    }
}
