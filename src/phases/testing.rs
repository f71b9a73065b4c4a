//! In-memory collaborators for phase loop tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use super::PhaseContext;
use crate::checkpoint::{CheckpointStore, NewSession, RepoFingerprint, Session, hash_task_spec};
use crate::errors::{PhaseError, PlatformError, RunnerError};
use crate::phase::PhaseKind;
use crate::platform::{FeedbackItem, Platform, PrInfo, PrRequest};
use crate::policy::ResolvedPolicy;
use crate::review::{Finding, ReviewReport, ReviewService};
use crate::runner::{AgentInvoker, AgentOutcome};
use crate::shepherd_config::builtin_policies;
use crate::tracker::Workspace;

/// Working tree whose fingerprint changes only when told to.
#[derive(Default)]
pub struct FakeWorkspace {
    revision: AtomicU64,
    pub pushes: Mutex<Vec<String>>,
    pub fail_push: AtomicBool,
}

impl FakeWorkspace {
    pub fn bump(&self) {
        self.revision.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Workspace for FakeWorkspace {
    fn fingerprint(&self) -> Result<RepoFingerprint, PhaseError> {
        Ok(RepoFingerprint {
            status: format!("rev {}", self.revision.load(Ordering::SeqCst)),
            head: Some("0000000".to_string()),
        })
    }

    async fn push_branch(&self, branch: &str) -> Result<(), PlatformError> {
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(PlatformError::CommandFailed {
                command: "git push".to_string(),
                stderr: "rejected".to_string(),
            });
        }
        self.pushes.lock().unwrap().push(branch.to_string());
        Ok(())
    }
}

/// One scripted agent response.
#[derive(Debug, Clone)]
pub struct Step {
    exit_code: i32,
    output: String,
    change: bool,
    spec: Option<String>,
}

impl Step {
    pub fn output(output: &str) -> Self {
        Self {
            exit_code: 0,
            output: output.to_string(),
            change: false,
            spec: None,
        }
    }

    pub fn failure(exit_code: i32, output: &str) -> Self {
        Self {
            exit_code,
            ..Self::output(output)
        }
    }

    /// The invocation modifies the working tree.
    pub fn changing(mut self) -> Self {
        self.change = true;
        self
    }

    /// The invocation rewrites the task spec (e.g. ticks checklist items).
    pub fn writes_spec(mut self, content: &str) -> Self {
        self.spec = Some(content.to_string());
        self
    }
}

/// Replays steps in order; an empty script yields a silent no-op success.
pub struct FakeInvoker {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<(String, String)>>,
    workspace: Arc<FakeWorkspace>,
    spec_path: PathBuf,
}

impl FakeInvoker {
    pub fn push(&self, step: Step) {
        self.steps.lock().unwrap().push_back(step);
    }

    /// `(agent, prompt)` per invocation.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentInvoker for FakeInvoker {
    async fn invoke(&self, agent: &str, prompt: &str) -> Result<AgentOutcome, RunnerError> {
        self.calls
            .lock()
            .unwrap()
            .push((agent.to_string(), prompt.to_string()));
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Step::output(""));
        if step.change {
            self.workspace.bump();
        }
        if let Some(ref content) = step.spec {
            std::fs::write(&self.spec_path, content).unwrap();
        }
        Ok(AgentOutcome {
            exit_code: Some(step.exit_code),
            timed_out: false,
            stdout: step.output,
            stderr: String::new(),
            duration: Duration::from_millis(5),
        })
    }
}

/// Returns queued finding sets, then clean reports.
#[derive(Default)]
pub struct FakeReview {
    queue: Mutex<VecDeque<Vec<Finding>>>,
    calls: AtomicUsize,
}

impl FakeReview {
    pub fn push(&self, findings: Vec<Finding>) {
        self.queue.lock().unwrap().push_back(findings);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReviewService for FakeReview {
    async fn review(&self, _base_branch: &str) -> Result<ReviewReport, RunnerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let findings = self.queue.lock().unwrap().pop_front().unwrap_or_default();
        Ok(ReviewReport::with_findings(findings))
    }
}

/// Hosting platform kept in memory. Resolved threads stay listed so that
/// de-duplication has to come from the acknowledged set.
#[derive(Default)]
pub struct FakePlatform {
    pub open_pr: Mutex<Option<PrInfo>>,
    pub created: Mutex<Vec<PrRequest>>,
    pub no_commits: AtomicBool,
    pub comments: Mutex<Vec<(u64, String)>>,
    pub feedback: Mutex<Vec<FeedbackItem>>,
    pub feedback_calls: AtomicUsize,
    /// Number of upcoming feedback polls that fail.
    pub failing_polls: AtomicUsize,
    pub replies: Mutex<Vec<String>>,
    pub resolved: Mutex<Vec<String>>,
    pub fail_acks: AtomicBool,
    pub all_clear: AtomicBool,
    pub head_time: Mutex<Option<DateTime<Utc>>>,
}

impl FakePlatform {
    pub fn with_open_pr(number: u64) -> Self {
        let platform = Self::default();
        *platform.open_pr.lock().unwrap() = Some(PrInfo {
            number,
            url: Some(format!("https://github.com/o/r/pull/{}", number)),
        });
        platform
    }

    pub fn set_feedback(&self, items: Vec<FeedbackItem>) {
        *self.feedback.lock().unwrap() = items;
    }

    pub fn ack_count(&self) -> usize {
        self.replies.lock().unwrap().len() + self.resolved.lock().unwrap().len()
    }
}

pub fn item(id: &str, body: &str) -> FeedbackItem {
    FeedbackItem {
        id: id.to_string(),
        author: "coderabbitai".to_string(),
        body: body.to_string(),
        path: Some("src/lib.rs".to_string()),
        line: Some(1),
    }
}

fn ack_failure() -> PlatformError {
    PlatformError::CommandFailed {
        command: "gh api graphql".to_string(),
        stderr: "HTTP 502".to_string(),
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn find_open_pr(&self, _branch: &str) -> Result<Option<PrInfo>, PlatformError> {
        Ok(self.open_pr.lock().unwrap().clone())
    }

    async fn create_pr(&self, request: &PrRequest) -> Result<PrInfo, PlatformError> {
        if self.no_commits.load(Ordering::SeqCst) {
            return Err(PlatformError::NoCommits {
                base: request.base.clone(),
                head: request.head.clone(),
            });
        }
        let mut created = self.created.lock().unwrap();
        created.push(request.clone());
        let number = 100 + created.len() as u64;
        let info = PrInfo {
            number,
            url: Some(format!("https://github.com/o/r/pull/{}", number)),
        };
        *self.open_pr.lock().unwrap() = Some(info.clone());
        Ok(info)
    }

    async fn comment(&self, pr: u64, body: &str) -> Result<(), PlatformError> {
        self.comments.lock().unwrap().push((pr, body.to_string()));
        Ok(())
    }

    async fn has_comment_with_marker(&self, pr: u64, marker: &str) -> Result<bool, PlatformError> {
        Ok(self
            .comments
            .lock()
            .unwrap()
            .iter()
            .any(|(n, body)| *n == pr && body.contains(marker)))
    }

    async fn unresolved_feedback(
        &self,
        _pr: u64,
        _authors: &[String],
    ) -> Result<Vec<FeedbackItem>, PlatformError> {
        self.feedback_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PlatformError::CommandFailed {
                command: "gh api graphql".to_string(),
                stderr: "HTTP 503".to_string(),
            });
        }
        Ok(self.feedback.lock().unwrap().clone())
    }

    async fn reply(&self, item: &FeedbackItem, _body: &str) -> Result<(), PlatformError> {
        if self.fail_acks.load(Ordering::SeqCst) {
            return Err(ack_failure());
        }
        self.replies.lock().unwrap().push(item.id.clone());
        Ok(())
    }

    async fn resolve(&self, item: &FeedbackItem) -> Result<(), PlatformError> {
        if self.fail_acks.load(Ordering::SeqCst) {
            return Err(ack_failure());
        }
        self.resolved.lock().unwrap().push(item.id.clone());
        Ok(())
    }

    async fn head_commit_time(&self, _pr: u64) -> Result<Option<DateTime<Utc>>, PlatformError> {
        Ok(*self.head_time.lock().unwrap())
    }

    async fn has_all_clear_since(
        &self,
        _pr: u64,
        _reviewer: &str,
        _after: DateTime<Utc>,
    ) -> Result<bool, PlatformError> {
        Ok(self.all_clear.load(Ordering::SeqCst))
    }
}

/// A temp directory with a task spec, a store and one of each fake.
pub struct Harness {
    pub dir: TempDir,
    pub spec_path: PathBuf,
    pub store: CheckpointStore,
    pub workspace: Arc<FakeWorkspace>,
    pub invoker: FakeInvoker,
    pub review: FakeReview,
    pub platform: FakePlatform,
    pub policy: ResolvedPolicy,
    pub overrides: BTreeMap<PhaseKind, String>,
}

impl Harness {
    pub fn new(spec: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let spec_path = dir.path().join("prd.md");
        std::fs::write(&spec_path, spec).unwrap();
        let workspace = Arc::new(FakeWorkspace::default());
        let invoker = FakeInvoker {
            steps: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            workspace: workspace.clone(),
            spec_path: spec_path.clone(),
        };
        let policies = builtin_policies();
        Self {
            store: CheckpointStore::new(dir.path().join("sessions")),
            spec_path,
            workspace,
            invoker,
            review: FakeReview::default(),
            platform: FakePlatform::default(),
            policy: ResolvedPolicy::unverified("claude", policies["claude"].clone()),
            overrides: BTreeMap::new(),
            dir,
        }
    }

    pub fn with_platform(mut self, platform: FakePlatform) -> Self {
        self.platform = platform;
        self
    }

    pub fn session(&self, phases: &[PhaseKind]) -> Session {
        self.store
            .create(NewSession {
                session_id: "test-session".to_string(),
                task_spec_path: self.spec_path.clone(),
                task_spec_hash: hash_task_spec(b"spec"),
                repo_root: self.dir.path().to_path_buf(),
                base_branch: "main".to_string(),
                feature_branch: "shepherd/prd".to_string(),
                selected_phases: phases.to_vec(),
            })
            .unwrap()
    }

    pub fn ctx(&self) -> PhaseContext<'_> {
        PhaseContext {
            invoker: &self.invoker,
            workspace: self.workspace.as_ref(),
            review: &self.review,
            platform: &self.platform,
            store: &self.store,
            policy: &self.policy,
            overrides: &self.overrides,
            ui: None,
        }
    }
}
