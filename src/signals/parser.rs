//! Signal parsing from agent output.

use super::types::{AgentSignals, Checklist};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static REMAINING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bREMAINING\s*[=:]\s*(\d+)").unwrap());

static READONLY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(read-only file system|readonly sandbox|read-only sandbox|sandbox(?:ed)? (?:is )?read-only|operation not permitted in sandbox|writes? (?:are|is) not allowed in (?:this|the) sandbox|approval policy (?:is )?never.*read-only)",
    )
    .unwrap()
});

static SUCCESS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bALL TASKS COMPLETE\b").unwrap());

static CHECKLIST_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*[-*+]\s+\[([ xX])\]").unwrap());

static ALL_CLEAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(no (?:further |new |more )?(?:issues|problems|suggestions|comments|actionable comments)|looks good to me|\blgtm\b|all clear|didn't find any (?:major )?issues)",
    )
    .unwrap()
});

/// Parser for extracting signals from agent output.
pub struct SignalParser {
    /// Whether to log parsing details (verbose mode)
    verbose: bool,
}

impl SignalParser {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Extract all signals from the given text.
    pub fn parse(&self, text: &str) -> AgentSignals {
        let remaining = REMAINING_REGEX
            .captures_iter(text)
            .filter_map(|cap| cap.get(1)?.as_str().parse::<u32>().ok())
            .last();

        let readonly_rejection = READONLY_REGEX
            .find(text)
            .map(|m| m.as_str().to_string());

        let success_marker = SUCCESS_REGEX.is_match(text);

        if self.verbose {
            debug!(
                ?remaining,
                readonly = readonly_rejection.is_some(),
                success_marker,
                "Parsed agent signals"
            );
        }

        AgentSignals {
            remaining,
            readonly_rejection,
            success_marker,
        }
    }
}

/// Convenience function to extract signals without creating a parser.
pub fn extract_signals(text: &str) -> AgentSignals {
    SignalParser::new(false).parse(text)
}

/// Count markdown checklist items in a document.
pub fn count_checklist(text: &str) -> Checklist {
    let mut checklist = Checklist::default();
    for cap in CHECKLIST_REGEX.captures_iter(text) {
        checklist.total += 1;
        if cap.get(1).is_some_and(|m| m.as_str() != " ") {
            checklist.checked += 1;
        }
    }
    checklist
}

/// Whether a reviewer comment body reads as an all-clear.
pub fn is_all_clear(body: &str) -> bool {
    ALL_CLEAR_REGEX.is_match(body)
}
