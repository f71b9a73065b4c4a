//! Prompt templates sent to work agents.
//!
//! - **Implement prompt**: full instruction block on iteration 1, a terse
//!   reminder afterwards
//! - **Findings prompt**: local review findings to address
//! - **Feedback prompt**: unresolved PR review threads, bounded to a budget
//! - **Push prompt**: agent-driven branch push

use std::path::Path;

use crate::platform::FeedbackItem;
use crate::review::ReviewReport;
use crate::util::truncate_chars;

/// The counter line every implement prompt asks the agent to print.
const REMAINING_INSTRUCTION: &str = "When you stop, print a final line `REMAINING=<n>` where <n> is the \
number of unchecked items left in the task spec checklist (0 when everything is done).";

/// Build the implementation prompt for `iteration` (1-based).
pub fn build_implement_prompt(task_spec: &Path, base_branch: &str, iteration: u32) -> String {
    if iteration <= 1 {
        let mut prompt = String::new();
        prompt.push_str("# Implementation task\n\n");
        prompt.push_str(&format!(
            "The task specification is at `{}`. Read it in full before writing code.\n\n",
            task_spec.display()
        ));
        prompt.push_str("## Instructions\n\n");
        prompt.push_str("- Implement the specification in this repository, working through its checklist in order.\n");
        prompt.push_str("- After finishing an item, tick it in the task spec (`- [ ]` → `- [x]`).\n");
        prompt.push_str("- Run the project's tests for the code you touch and fix what breaks.\n");
        prompt.push_str(&format!(
            "- Commit your work on the current branch; the pull request will target `{}`.\n",
            base_branch
        ));
        prompt.push_str("- Do not ask questions. Make reasonable decisions and note them in the commit message.\n\n");
        prompt.push_str("## Progress report\n\n");
        prompt.push_str(REMAINING_INSTRUCTION);
        prompt.push_str("\nIf every item is complete, also print `ALL TASKS COMPLETE`.\n");
        prompt
    } else {
        format!(
            "Continue implementing `{}` (iteration {}). Pick up the next unchecked item, \
             tick items as you finish them and commit.\n\n{}\n",
            task_spec.display(),
            iteration,
            REMAINING_INSTRUCTION
        )
    }
}

/// Ask the agent to address local review findings.
pub fn build_findings_prompt(task_spec: &Path, report: &ReviewReport) -> String {
    format!(
        "# Review findings\n\n\
         A code review of your uncommitted and committed work on `{}` reported the issues below. \
         Fix each one that is valid, skip the ones that are wrong, and commit.\n\n\
         {}\n\n\
         {}\n",
        task_spec.display(),
        report.render(),
        REMAINING_INSTRUCTION
    )
}

/// Ask the agent to address unresolved PR review threads.
///
/// Item bodies are trimmed so the whole prompt stays within `budget_chars`.
pub fn build_feedback_prompt(pr: u64, items: &[FeedbackItem], budget_chars: usize) -> String {
    let header = format!(
        "# Pull request #{} review feedback\n\n\
         Address the unresolved review comments below. Change the code where the comment is right, \
         leave it where it is not, then commit and push to the current branch.\n\n",
        pr
    );
    let footer = format!("\n{} item(s) total.\n", items.len());

    let available = budget_chars.saturating_sub(header.len() + footer.len());
    let per_item = if items.is_empty() {
        available
    } else {
        (available / items.len()).max(80)
    };

    let mut body = String::new();
    for (i, item) in items.iter().enumerate() {
        let location = item
            .location()
            .map(|l| format!(" `{}`", l))
            .unwrap_or_default();
        let entry = format!("{}.{} ({}): {}\n", i + 1, location, item.author, item.body.trim());
        body.push_str(&truncate_chars(&entry, per_item, "…\n"));
    }

    truncate_chars(&format!("{}{}{}", header, body, footer), budget_chars, "\n…\n")
}

/// Ask the agent to push the feature branch.
pub fn build_push_prompt(branch: &str) -> String {
    format!(
        "Push the current branch to the `origin` remote with upstream tracking \
         (`git push -u origin {}`). Resolve any rejection without rewriting history, \
         then print `PUSHED` on the last line.\n",
        branch
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, body: &str) -> FeedbackItem {
        FeedbackItem {
            id: id.to_string(),
            author: "coderabbitai".to_string(),
            body: body.to_string(),
            path: Some("src/lib.rs".to_string()),
            line: Some(12),
        }
    }

    #[test]
    fn test_first_pass_prompt_is_full() {
        let prompt = build_implement_prompt(Path::new("/repo/docs/prd.md"), "main", 1);
        assert!(prompt.contains("/repo/docs/prd.md"));
        assert!(prompt.contains("## Instructions"));
        assert!(prompt.contains("REMAINING=<n>"));
        assert!(prompt.contains("`main`"));
    }

    #[test]
    fn test_later_prompt_is_terse() {
        let first = build_implement_prompt(Path::new("prd.md"), "main", 1);
        let later = build_implement_prompt(Path::new("prd.md"), "main", 4);
        assert!(later.len() < first.len());
        assert!(later.contains("iteration 4"));
        assert!(!later.contains("## Instructions"));
    }

    #[test]
    fn test_feedback_prompt_lists_items() {
        let prompt = build_feedback_prompt(7, &[item("a", "Rename x"), item("b", "Add test")], 4000);
        assert!(prompt.contains("#7"));
        assert!(prompt.contains("1. `src/lib.rs:12` (coderabbitai): Rename x"));
        assert!(prompt.contains("2."));
        assert!(prompt.contains("2 item(s) total"));
    }

    #[test]
    fn test_feedback_prompt_respects_budget() {
        let long = "x".repeat(5000);
        let items: Vec<_> = (0..5).map(|i| item(&i.to_string(), &long)).collect();
        let prompt = build_feedback_prompt(1, &items, 2000);
        assert!(prompt.chars().count() <= 2000);
        assert!(prompt.contains("5."));
    }
}
