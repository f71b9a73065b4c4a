//! Code-hosting platform boundary: pull requests, comments and review threads.

pub mod gh;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::PlatformError;

pub use gh::GhCli;

/// An open pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrInfo {
    pub number: u64,
    pub url: Option<String>,
}

/// Arguments for opening a pull request.
#[derive(Debug, Clone)]
pub struct PrRequest {
    pub base: String,
    pub head: String,
    pub title: String,
    pub body: String,
    pub draft: bool,
}

/// One unresolved review thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackItem {
    /// Thread node id; unique per pull request.
    pub id: String,
    pub author: String,
    pub body: String,
    pub path: Option<String>,
    pub line: Option<u64>,
}

impl FeedbackItem {
    pub fn location(&self) -> Option<String> {
        match (&self.path, self.line) {
            (Some(path), Some(line)) => Some(format!("{}:{}", path, line)),
            (Some(path), None) => Some(path.clone()),
            _ => None,
        }
    }
}

/// Everything the publish step, the review/fix loop and the summary need
/// from the hosting platform.
#[async_trait]
pub trait Platform: Send + Sync {
    async fn find_open_pr(&self, branch: &str) -> Result<Option<PrInfo>, PlatformError>;

    /// Fails with [`PlatformError::NoCommits`] when head has nothing over base.
    async fn create_pr(&self, request: &PrRequest) -> Result<PrInfo, PlatformError>;

    async fn comment(&self, pr: u64, body: &str) -> Result<(), PlatformError>;

    async fn has_comment_with_marker(&self, pr: u64, marker: &str) -> Result<bool, PlatformError>;

    /// Unresolved, non-outdated threads started by one of `authors`.
    async fn unresolved_feedback(
        &self,
        pr: u64,
        authors: &[String],
    ) -> Result<Vec<FeedbackItem>, PlatformError>;

    async fn reply(&self, item: &FeedbackItem, body: &str) -> Result<(), PlatformError>;

    async fn resolve(&self, item: &FeedbackItem) -> Result<(), PlatformError>;

    /// Commit time of the pull request head.
    async fn head_commit_time(&self, pr: u64) -> Result<Option<DateTime<Utc>>, PlatformError>;

    /// Whether `reviewer` posted an all-clear comment or review after `after`.
    async fn has_all_clear_since(
        &self,
        pr: u64,
        reviewer: &str,
        after: DateTime<Utc>,
    ) -> Result<bool, PlatformError>;
}
