//! Append-only per-session logs: the phase-transition journal and the
//! structured error log. Both are JSON lines; neither is ever rewritten.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::classify::StructuredError;
use crate::phase::{PhaseKind, PhaseStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub phase: PhaseKind,
    pub iteration: u32,
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub timestamp: DateTime<Utc>,
}

fn append_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut line = serde_json::to_string(value).context("Failed to serialize log entry")?;
    line.push('\n');
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?
        .write_all(line.as_bytes())
        .with_context(|| format!("Failed to append to {}", path.display()))?;
    Ok(())
}

fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mut out = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(entry) => out.push(entry),
            // a torn final line from a crash is skipped, not fatal
            Err(e) => warn!(path = %path.display(), line = idx + 1, error = %e, "Skipping unreadable log line"),
        }
    }
    Ok(out)
}

/// Phase-transition journal for one session.
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(
        &self,
        phase: PhaseKind,
        iteration: u32,
        status: PhaseStatus,
        note: Option<&str>,
    ) -> Result<()> {
        append_line(
            &self.path,
            &JournalEntry {
                phase,
                iteration,
                status,
                note: note.map(str::to_string),
                timestamp: Utc::now(),
            },
        )
    }

    pub fn entries(&self) -> Result<Vec<JournalEntry>> {
        read_lines(&self.path)
    }

    pub fn last_completed_phase(&self) -> Option<PhaseKind> {
        self.entries()
            .ok()?
            .into_iter()
            .rfind(|e| e.status == PhaseStatus::Completed)
            .map(|e| e.phase)
    }
}

/// Structured error log for one session.
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, error: &StructuredError) -> Result<()> {
        append_line(&self.path, error)
    }

    pub fn entries(&self) -> Result<Vec<StructuredError>> {
        read_lines(&self.path)
    }
}
