//! Typed error hierarchy for shepherd.
//!
//! Each subsystem owns one enum so callers can match on the failure kind:
//! - `CheckpointError`: session persistence, locking and migration
//! - `PolicyError`: executor policy resolution
//! - `RunnerError`: spawning and talking to subprocesses
//! - `PlatformError`: code-hosting platform calls
//! - `PhaseError`: failures that end a phase
//! - `OrchestratorError`: session-level failures surfaced to the CLI

use crate::phase::PhaseKind;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the checkpoint store.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Failed to read checkpoint at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write checkpoint at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint at {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize session {session_id}: {source}")]
    Serialize {
        session_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Checkpoint at {path} failed validation: {reason}")]
    Invalid { path: PathBuf, reason: String },

    #[error("Session {session_id} is locked by another shepherd process")]
    Locked { session_id: String },

    #[error("Phase {phase} is not selected for session {session_id}")]
    PhaseNotSelected { phase: PhaseKind, session_id: String },
}

/// A capability that failed verification, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityFailure {
    pub capability: String,
    pub reason: String,
}

impl std::fmt::Display for CapabilityFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.capability, self.reason)
    }
}

fn join_failures(failures: &[CapabilityFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors from executor policy resolution.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Unknown executor policy '{name}'")]
    UnknownPolicy { name: String },

    #[error("Policy '{policy}' references unknown agent '{agent}'")]
    UnknownAgent { policy: String, agent: String },

    #[error(
        "Policy '{policy}' cannot run: {} failed verification and no usable fallback is configured",
        join_failures(.failures)
    )]
    CapabilityUnavailable {
        policy: String,
        failures: Vec<CapabilityFailure>,
    },

    #[error(
        "Policy fallback cycle or persistent failure after {} attempts (chain: {}); never verified: {}",
        .chain.len(),
        .chain.join(" -> "),
        join_failures(.failures)
    )]
    FallbackExhausted {
        chain: Vec<String>,
        failures: Vec<CapabilityFailure>,
    },
}

/// Errors raised while driving a subprocess.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while talking to {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed (exit code {}): {detail}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()))]
    Failed {
        program: String,
        exit_code: Option<i32>,
        detail: String,
    },
}

/// Errors from the code-hosting platform boundary.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unexpected {what} output from platform: {message}")]
    Parse { what: String, message: String },

    #[error("No commits between {base} and {head}")]
    NoCommits { base: String, head: String },
}

/// Failures that end a phase.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error(
        "Agent {agent} failed after {attempts} attempt(s) (exit code {}, timed out: {timed_out}): {detail}",
        exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string())
    )]
    AgentFailed {
        agent: String,
        exit_code: Option<i32>,
        timed_out: bool,
        attempts: u32,
        detail: String,
    },

    #[error("Agent {agent} exited with non-retryable code {exit_code} ({reason})")]
    NonRetryable {
        agent: String,
        exit_code: i32,
        reason: &'static str,
    },

    #[error(
        "Agent {agent} is running in a read-only sandbox (\"{phrase}\"). Re-run with write access for the working tree"
    )]
    ReadonlySandbox { agent: String, phrase: String },

    #[error("No repository change for {streak} consecutive iterations (last iteration {iteration})")]
    Stalled { streak: u32, iteration: u32 },

    #[error("Git error: {0}")]
    Git(String),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Session-level failures reported to the CLI.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Failed to read task spec at {path}: {source}")]
    TaskSpecRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No session with id '{session_id}'")]
    SessionNotFound { session_id: String },

    #[error("Phase {phase} failed: {source}")]
    PhaseFailed {
        phase: PhaseKind,
        #[source]
        source: PhaseError,
    },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
