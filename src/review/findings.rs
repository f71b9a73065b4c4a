//! Findings reported by the local review service.
//!
//! The review tool prints plain-text blocks separated by rule lines, each with
//! `File:`, `Line:`, `Type:` and `Comment:` fields. Anything that does not
//! look like a finding block is ignored.
//!
//! ```
//! use shepherd::review::findings::parse_findings;
//!
//! let output = "\
//! ============================================================================
//! File: src/lib.rs
//! Line: 10 to 12
//! Type: potential_issue
//!
//! Comment:
//! Missing bounds check.
//! ";
//! let findings = parse_findings(output);
//! assert_eq!(findings.len(), 1);
//! assert_eq!(findings[0].file.as_deref(), Some("src/lib.rs"));
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static RULE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*[=\-]{10,}\s*$").unwrap());

static FIELD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(File|Line|Type|Comment|Prompt for AI Agent):\s*(.*)$").unwrap());

static CLEAN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(no (?:issues|findings|comments) (?:found|detected)|review completed?:? (?:0|no) (?:issues|findings))")
        .unwrap()
});

/// One issue raised by the review tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub file: Option<String>,
    /// Line or range as printed by the tool (`10`, `10 to 12`).
    pub line: Option<String>,
    pub kind: Option<String>,
    pub comment: String,
}

impl Finding {
    pub fn new(comment: impl Into<String>) -> Self {
        Self {
            comment: comment.into(),
            ..Default::default()
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_line(mut self, line: impl Into<String>) -> Self {
        self.line = Some(line.into());
        self
    }

    /// `path:line` when known.
    pub fn location(&self) -> Option<String> {
        match (&self.file, &self.line) {
            (Some(file), Some(line)) => Some(format!("{}:{}", file, line)),
            (Some(file), None) => Some(file.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(location) = self.location() {
            write!(f, "[{}] ", location)?;
        }
        if let Some(ref kind) = self.kind {
            write!(f, "({}) ", kind)?;
        }
        write!(f, "{}", self.comment.trim())
    }
}

/// Whether the tool said outright that it found nothing.
pub fn reports_clean(output: &str) -> bool {
    CLEAN_REGEX.is_match(output)
}

/// Parse every finding block in `output`.
pub fn parse_findings(output: &str) -> Vec<Finding> {
    RULE_REGEX
        .split(output)
        .filter_map(parse_block)
        .collect()
}

fn parse_block(block: &str) -> Option<Finding> {
    let mut finding = Finding::default();
    let mut comment = Vec::new();
    let mut in_comment = false;
    let mut has_file = false;

    for line in block.lines() {
        if let Some(caps) = FIELD_REGEX.captures(line.trim_end()) {
            let value = caps[2].trim();
            in_comment = false;
            match &caps[1] {
                "File" => {
                    has_file = true;
                    finding.file = Some(value.to_string());
                }
                "Line" if !value.is_empty() => finding.line = Some(value.to_string()),
                "Type" if !value.is_empty() => finding.kind = Some(value.to_string()),
                "Comment" => {
                    in_comment = true;
                    if !value.is_empty() {
                        comment.push(value.to_string());
                    }
                }
                _ => {}
            }
            continue;
        }
        if in_comment {
            comment.push(line.to_string());
        }
    }

    if !has_file {
        return None;
    }
    finding.comment = comment.join("\n").trim().to_string();
    if finding.comment.is_empty() {
        return None;
    }
    Some(finding)
}
