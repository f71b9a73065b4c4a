//! Signal extraction from agent and reviewer output.
//!
//! Agent output is opaque text. Only a handful of signals are pattern-matched:
//!
//! - `REMAINING=<n>` - remaining-work counter (last occurrence wins)
//! - readonly / sandbox rejection phrases
//! - `ALL TASKS COMPLETE` - explicit success marker
//!
//! plus markdown checklist counting for the task spec and all-clear phrases
//! from a supplementary reviewer. Everything here is pure: text in, typed
//! result out.

mod parser;
mod types;

pub use parser::{SignalParser, count_checklist, extract_signals, is_all_clear};
pub use types::{AgentSignals, Checklist};
