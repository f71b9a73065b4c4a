//! Signal types extracted from agent output.

use serde::{Deserialize, Serialize};

/// Signals found in one agent invocation's output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSignals {
    /// Last `REMAINING=<n>` value, if the agent reported one.
    pub remaining: Option<u32>,
    /// The readonly/sandbox phrase that matched, if any.
    pub readonly_rejection: Option<String>,
    /// Whether the explicit success marker appeared.
    pub success_marker: bool,
}

/// Markdown checklist tally (`- [ ]` / `- [x]`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checklist {
    pub total: usize,
    pub checked: usize,
}

impl Checklist {
    pub fn is_present(&self) -> bool {
        self.total > 0
    }

    pub fn unchecked(&self) -> usize {
        self.total.saturating_sub(self.checked)
    }

    pub fn is_complete(&self) -> bool {
        self.is_present() && self.checked == self.total
    }
}
