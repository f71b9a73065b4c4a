//! Local review service used by the implementation loop.
//!
//! The loop only needs "what did the reviewer flag in the working tree", so the
//! seam is a single async call returning a [`ReviewReport`]. The default
//! implementation shells out to the configured review tool.

pub mod findings;

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::RunnerError;
use crate::runner::{CommandSpec, run_command};
use crate::shepherd_config::{ReviewSection, ToolConfig};

pub use findings::{Finding, parse_findings, reports_clean};

/// Result of one local review pass.
#[derive(Debug, Clone, Default)]
pub struct ReviewReport {
    pub findings: Vec<Finding>,
    /// Unparsed tool output, kept for transcripts.
    pub raw: String,
}

impl ReviewReport {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn with_findings(findings: Vec<Finding>) -> Self {
        Self {
            findings,
            raw: String::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Findings rendered as a numbered list for a fix prompt.
    pub fn render(&self) -> String {
        self.findings
            .iter()
            .enumerate()
            .map(|(i, f)| format!("{}. {}", i + 1, f))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Reviews the uncommitted work against a base branch.
#[async_trait]
pub trait ReviewService: Send + Sync {
    async fn review(&self, base_branch: &str) -> Result<ReviewReport, RunnerError>;
}

/// Runs the review CLI (`coderabbit review --plain` by default) in the repo.
pub struct CliReviewService {
    program: String,
    args: Vec<String>,
    base_flag: String,
    cwd: PathBuf,
    timeout: Duration,
}

impl CliReviewService {
    pub fn new(tool: &ToolConfig, section: &ReviewSection, cwd: PathBuf) -> Self {
        Self {
            program: tool.program.clone(),
            args: section.args.clone(),
            base_flag: section.base_flag.clone(),
            cwd,
            timeout: Duration::from_secs(section.timeout_secs),
        }
    }

    fn command(&self, base_branch: &str) -> CommandSpec {
        let mut args = self.args.clone();
        if !self.base_flag.is_empty() {
            args.push(self.base_flag.clone());
            args.push(base_branch.to_string());
        }
        CommandSpec::new(&self.program, &args)
            .cwd(&self.cwd)
            .timeout(self.timeout)
    }
}

#[async_trait]
impl ReviewService for CliReviewService {
    async fn review(&self, base_branch: &str) -> Result<ReviewReport, RunnerError> {
        let spec = self.command(base_branch);
        info!(command = %spec.display(), "Running local review");
        let outcome = run_command(&spec).await?;
        if !outcome.success() {
            return Err(RunnerError::Failed {
                program: self.program.clone(),
                exit_code: outcome.exit_code,
                detail: outcome.failure_detail(),
            });
        }

        let findings = parse_findings(&outcome.stdout);
        if findings.is_empty() && !reports_clean(&outcome.stdout) {
            debug!(
                bytes = outcome.stdout.len(),
                "Review output had no finding blocks"
            );
        }
        Ok(ReviewReport {
            findings,
            raw: outcome.stdout,
        })
    }
}
