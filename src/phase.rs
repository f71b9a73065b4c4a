//! Phase vocabulary for the shepherd pipeline.
//!
//! A session runs at most three phases, always in the fixed order
//! `local` → `pr` → `review_fix`. Each phase can be toggled independently.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the three fixed pipeline phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    /// Implement → review → fix iterations against the local working tree.
    Local,
    /// Push the branch and make sure a pull request exists.
    Pr,
    /// Poll the pull request for automated review feedback and fix it.
    ReviewFix,
}

impl PhaseKind {
    /// All phases in pipeline order.
    pub const ALL: [PhaseKind; 3] = [PhaseKind::Local, PhaseKind::Pr, PhaseKind::ReviewFix];

    pub fn as_str(self) -> &'static str {
        match self {
            PhaseKind::Local => "local",
            PhaseKind::Pr => "pr",
            PhaseKind::ReviewFix => "review_fix",
        }
    }

    /// Human-readable label used by the terminal UI.
    pub fn label(self) -> &'static str {
        match self {
            PhaseKind::Local => "Local implementation",
            PhaseKind::Pr => "Publish pull request",
            PhaseKind::ReviewFix => "Review feedback",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "local" | "implement" => Ok(PhaseKind::Local),
            "pr" | "publish" => Ok(PhaseKind::Pr),
            "review_fix" | "review" => Ok(PhaseKind::ReviewFix),
            other => anyhow::bail!(
                "Invalid phase '{}'. Valid values: local, pr, review_fix",
                other
            ),
        }
    }
}

/// Lifecycle status of a single phase inside a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    /// Disabled at runtime (e.g. review_fix without any open pull request).
    Skipped,
}

impl PhaseStatus {
    /// Whether the phase needs no further work on resume.
    pub fn is_done(self) -> bool {
        matches!(self, PhaseStatus::Completed | PhaseStatus::Skipped)
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::InProgress => "in_progress",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Parse a comma-separated phase list into pipeline order, dropping duplicates.
pub fn parse_phase_list(input: &str) -> anyhow::Result<Vec<PhaseKind>> {
    let mut phases = Vec::new();
    for part in input.split(',').filter(|p| !p.trim().is_empty()) {
        let phase: PhaseKind = part.parse()?;
        if !phases.contains(&phase) {
            phases.push(phase);
        }
    }
    if phases.is_empty() {
        anyhow::bail!("At least one phase must be selected");
    }
    phases.sort();
    Ok(phases)
}
