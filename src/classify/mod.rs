//! Error taxonomy and stall detection.
//!
//! Failures from subprocesses, the platform and the filesystem arrive as
//! free-form text. `classify` maps them onto a fixed category set with a
//! severity, a retry flag and (when recognized) a recovery hint.

pub mod stall;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::PhaseKind;

pub use stall::{StallDetector, StallSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Git,
    Api,
    Runner,
    Filesystem,
    Config,
    Timeout,
    Resource,
    Validation,
    Internal,
}

impl ErrorCategory {
    pub fn default_severity(self) -> Severity {
        match self {
            Self::Config | Self::Resource => Severity::Critical,
            Self::Network | Self::Timeout => Severity::Warning,
            _ => Severity::Error,
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::Api | Self::Runner
        )
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Git => "git",
            Self::Api => "api",
            Self::Runner => "runner",
            Self::Filesystem => "filesystem",
            Self::Config => "config",
            Self::Timeout => "timeout",
            Self::Resource => "resource",
            Self::Validation => "validation",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Debug => "debug",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// One recorded failure or warning. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredError {
    pub message: String,
    pub category: ErrorCategory,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub retryable: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<PhaseKind>,
}

impl StructuredError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            category,
            severity: category.default_severity(),
            hint: None,
            retryable: category.is_retryable(),
            timestamp: Utc::now(),
            phase: None,
        }
    }

    /// A non-fatal note, e.g. reaching the iteration ceiling.
    pub fn warning(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self::new(category, message).with_severity(Severity::Warning)
    }

    pub fn with_phase(mut self, phase: PhaseKind) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        // config errors stay critical
        if self.category != ErrorCategory::Config {
            self.severity = severity;
        }
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Ordered patterns; the first category with a matching needle wins.
const PATTERNS: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::Config,
        &[
            "shepherd.toml",
            "config",
            "unknown policy",
            "unknown agent",
            "executor policy",
        ],
    ),
    (
        ErrorCategory::Timeout,
        &["timed out", "timeout", "deadline exceeded"],
    ),
    (
        ErrorCategory::Resource,
        &[
            "out of memory",
            "no space left",
            "disk quota",
            "too many open files",
            "code 137",
            "killed",
        ],
    ),
    (
        ErrorCategory::Api,
        &[
            "rate limit",
            "ratelimit",
            "429",
            "graphql",
            "api error",
            "bad gateway",
            "service unavailable",
            "unauthorized",
            "forbidden",
        ],
    ),
    (
        ErrorCategory::Network,
        &[
            "connection refused",
            "connection reset",
            "could not resolve host",
            "network",
            "dns",
            "tls handshake",
            "broken pipe",
        ],
    ),
    (
        ErrorCategory::Git,
        &[
            "merge conflict",
            "conflict",
            "not a git repository",
            "non-fast-forward",
            "git",
            "detached head",
        ],
    ),
    (
        ErrorCategory::Filesystem,
        &[
            "no such file",
            "permission denied",
            "read-only file system",
            "is a directory",
            "failed to write",
            "failed to read",
        ],
    ),
    (
        ErrorCategory::Runner,
        &[
            "exit code",
            "exited with",
            "spawn",
            "command not found",
            "agent",
            "sandbox",
        ],
    ),
    (
        ErrorCategory::Validation,
        &["invalid", "validation", "parse", "malformed", "unexpected"],
    ),
];

fn recovery_hint(lower: &str, category: ErrorCategory) -> Option<&'static str> {
    if lower.contains("rate limit") || lower.contains("ratelimit") || lower.contains("429") {
        return Some("wait and retry");
    }
    if lower.contains("merge conflict") || lower.contains("conflict") {
        return Some("resolve manually, then `--resume`");
    }
    if lower.contains("command not found") || lower.contains("code 127") {
        return Some("install the missing binary or choose another --policy");
    }
    if lower.contains("read-only") || lower.contains("sandbox") {
        return Some("run the agent with write access to the working tree, then `--resume`");
    }
    match category {
        ErrorCategory::Config => Some("check .shepherd/shepherd.toml and the --policy value"),
        ErrorCategory::Timeout => Some("raise the agent timeout_secs or retry with `--resume`"),
        _ => None,
    }
}

/// Classify a failure message by case-insensitive substring matching.
pub fn classify(message: &str) -> StructuredError {
    let lower = message.to_lowercase();
    let category = PATTERNS
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
        .map(|(category, _)| *category)
        .unwrap_or(ErrorCategory::Internal);

    let mut err = StructuredError::new(category, message);
    if let Some(hint) = recovery_hint(&lower, category) {
        err = err.with_hint(hint);
    }
    if category == ErrorCategory::Config {
        err.severity = Severity::Critical;
        err.retryable = false;
    }
    err
}

/// Classify an error chain, using every `source()` message.
pub fn classify_error(err: &(dyn std::error::Error + 'static), phase: Option<PhaseKind>) -> StructuredError {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = inner.source();
    }
    let mut classified = classify(&message);
    classified.phase = phase;
    classified
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_is_api_with_hint() {
        let err = classify("GraphQL: API rate limit exceeded for user");
        assert_eq!(err.category, ErrorCategory::Api);
        assert!(err.retryable);
        assert_eq!(err.hint.as_deref(), Some("wait and retry"));
    }

    #[test]
    fn test_merge_conflict_is_git_with_resume_hint() {
        let err = classify("CONFLICT (content): Merge conflict in src/lib.rs");
        assert_eq!(err.category, ErrorCategory::Git);
        assert!(!err.retryable);
        assert_eq!(err.hint.as_deref(), Some("resolve manually, then `--resume`"));
    }

    #[test]
    fn test_config_errors_are_critical_and_not_retryable() {
        let err = classify("Unknown executor policy 'gpt'");
        assert_eq!(err.category, ErrorCategory::Config);
        assert_eq!(err.severity, Severity::Critical);
        assert!(!err.retryable);

        let downgraded = err.with_severity(Severity::Warning);
        assert_eq!(downgraded.severity, Severity::Critical);
    }

    #[test]
    fn test_timeout_and_network() {
        assert_eq!(
            classify("agent timed out after 3600s").category,
            ErrorCategory::Timeout
        );
        assert_eq!(
            classify("fatal: unable to access: Could not resolve host: github.com").category,
            ErrorCategory::Network
        );
    }

    #[test]
    fn test_unmatched_is_internal() {
        let err = classify("something odd happened");
        assert_eq!(err.category, ErrorCategory::Internal);
        assert_eq!(err.severity, Severity::Error);
        assert!(err.hint.is_none());
    }

    #[test]
    fn test_classify_error_walks_sources() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "No space left on device");
        let err = crate::errors::CheckpointError::Write {
            path: "/tmp/x.json".into(),
            source: io,
        };
        let classified = classify_error(&err, Some(PhaseKind::Local));
        assert_eq!(classified.category, ErrorCategory::Resource);
        assert_eq!(classified.phase, Some(PhaseKind::Local));
    }

    #[test]
    fn test_structured_error_serde_round_trip_keeps_fields() {
        let err = classify("merge conflict").with_phase(PhaseKind::ReviewFix);
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"category\":\"git\""));
        assert!(json.contains("\"phase\":\"review_fix\""));
        let back: StructuredError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
