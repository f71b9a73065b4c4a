//! In-memory collaborators for orchestrator flow tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use shepherd::checkpoint::RepoFingerprint;
use shepherd::errors::{PhaseError, PlatformError, RunnerError};
use shepherd::platform::{FeedbackItem, Platform, PrInfo, PrRequest};
use shepherd::review::{ReviewReport, ReviewService};
use shepherd::runner::{AgentInvoker, AgentOutcome};
use shepherd::tracker::Workspace;

#[derive(Default)]
pub struct Tree {
    revision: AtomicU64,
}

#[async_trait]
impl Workspace for Tree {
    fn fingerprint(&self) -> Result<RepoFingerprint, PhaseError> {
        Ok(RepoFingerprint {
            status: format!("M src/lib.rs {}", self.revision.load(Ordering::SeqCst)),
            head: None,
        })
    }

    async fn push_branch(&self, _branch: &str) -> Result<(), PlatformError> {
        Ok(())
    }
}

/// Scripted `(exit_code, stdout)` replies; every successful call edits the tree.
pub struct Agent<'a> {
    pub tree: &'a Tree,
    pub replies: Mutex<VecDeque<(i32, String)>>,
    pub calls: AtomicUsize,
}

impl<'a> Agent<'a> {
    pub fn new(tree: &'a Tree, replies: &[(i32, &str)]) -> Self {
        Self {
            tree,
            replies: Mutex::new(replies.iter().map(|(c, s)| (*c, s.to_string())).collect()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AgentInvoker for Agent<'_> {
    async fn invoke(&self, _agent: &str, _prompt: &str) -> Result<AgentOutcome, RunnerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (exit_code, stdout) = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((0, String::new()));
        if exit_code == 0 {
            self.tree.revision.fetch_add(1, Ordering::SeqCst);
        }
        Ok(AgentOutcome {
            exit_code: Some(exit_code),
            stdout,
            duration: Duration::from_millis(1),
            ..Default::default()
        })
    }
}

pub struct CleanReview;

#[async_trait]
impl ReviewService for CleanReview {
    async fn review(&self, _base_branch: &str) -> Result<ReviewReport, RunnerError> {
        Ok(ReviewReport::clean())
    }
}

/// Platform with one open PR and a fixed set of review threads that never
/// disappear on their own.
pub struct Hub {
    pub pr: Option<u64>,
    pub threads: Vec<FeedbackItem>,
    pub comments: Mutex<Vec<String>>,
    pub acks: AtomicUsize,
}

impl Hub {
    pub fn new(pr: Option<u64>, threads: Vec<FeedbackItem>) -> Self {
        Self {
            pr,
            threads,
            comments: Mutex::new(Vec::new()),
            acks: AtomicUsize::new(0),
        }
    }
}

pub fn thread(id: &str) -> FeedbackItem {
    FeedbackItem {
        id: id.to_string(),
        author: "coderabbitai[bot]".to_string(),
        body: format!("Please fix {}", id),
        path: Some("src/lib.rs".to_string()),
        line: Some(3),
    }
}

#[async_trait]
impl Platform for Hub {
    async fn find_open_pr(&self, _branch: &str) -> Result<Option<PrInfo>, PlatformError> {
        Ok(self.pr.map(|number| PrInfo { number, url: None }))
    }

    async fn create_pr(&self, request: &PrRequest) -> Result<PrInfo, PlatformError> {
        Err(PlatformError::NoCommits {
            base: request.base.clone(),
            head: request.head.clone(),
        })
    }

    async fn comment(&self, _pr: u64, body: &str) -> Result<(), PlatformError> {
        self.comments.lock().unwrap().push(body.to_string());
        Ok(())
    }

    async fn has_comment_with_marker(&self, _pr: u64, marker: &str) -> Result<bool, PlatformError> {
        Ok(self.comments.lock().unwrap().iter().any(|c| c.contains(marker)))
    }

    async fn unresolved_feedback(
        &self,
        _pr: u64,
        _authors: &[String],
    ) -> Result<Vec<FeedbackItem>, PlatformError> {
        Ok(self.threads.clone())
    }

    async fn reply(&self, _item: &FeedbackItem, _body: &str) -> Result<(), PlatformError> {
        self.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn resolve(&self, _item: &FeedbackItem) -> Result<(), PlatformError> {
        self.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn head_commit_time(&self, _pr: u64) -> Result<Option<DateTime<Utc>>, PlatformError> {
        Ok(None)
    }

    async fn has_all_clear_since(
        &self,
        _pr: u64,
        _reviewer: &str,
        _after: DateTime<Utc>,
    ) -> Result<bool, PlatformError> {
        Ok(false)
    }
}
