use crate::checkpoint::{Session, SessionStatus};
use crate::phase::{PhaseKind, PhaseStatus};
use crate::signals::AgentSignals;
use crate::util::format_secs;
use crate::ui::icons::{CHECK, CLOCK, CROSS, FIX, PR, PROGRESS, REVIEW, SKIP, SPARKLE, WARN};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Terminal UI for a shepherd session, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - Phase bar: how many of the selected phases have finished
/// - Iteration bar: spinner with the current iteration/cycle and live status
pub struct OrchestratorUI {
    multi: MultiProgress,
    phase_bar: ProgressBar,
    iteration_bar: ProgressBar,
    verbose: bool,
    current_iter: AtomicU32,
    max_iter: AtomicU32,
}

impl OrchestratorUI {
    /// Create the UI sized to the number of selected phases.
    pub fn new(total_phases: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let phase_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let phase_bar = multi.add(ProgressBar::new(total_phases));
        phase_bar.set_style(phase_style);
        phase_bar.set_prefix("Phases");

        let iteration_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let iteration_bar = multi.add(ProgressBar::new_spinner());
        iteration_bar.set_style(iteration_style);
        iteration_bar.set_prefix("  Iter");

        Self {
            multi,
            phase_bar,
            iteration_bar,
            verbose,
            current_iter: AtomicU32::new(0),
            max_iter: AtomicU32::new(0),
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    fn iteration_label(&self) -> String {
        let iter = self.current_iter.load(Ordering::SeqCst);
        let max = self.max_iter.load(Ordering::SeqCst);
        if max == 0 {
            format!("Iteration {}", style(iter).cyan())
        } else {
            format!("Iteration {}/{}", style(iter).cyan(), max)
        }
    }

    /// Print the phase header and point the phase bar at it.
    pub fn start_phase(&self, phase: PhaseKind) {
        self.phase_bar
            .set_message(format!("{}: {}", style(phase).yellow(), phase.label()));
        self.print_line("");
        self.print_line(format!("{}", style("═".repeat(60)).cyan()));
        self.print_line(format!(
            "{} {}",
            style("▶").green().bold(),
            style(phase.label()).yellow().bold()
        ));
        self.print_line(format!("{}", style("═".repeat(60)).cyan()));
    }

    /// Start the spinner for an iteration. `max == 0` means unbounded.
    pub fn start_iteration(&self, iter: u32, max: u32) {
        self.current_iter.store(iter, Ordering::SeqCst);
        self.max_iter.store(max, Ordering::SeqCst);
        self.iteration_bar.reset();
        self.iteration_bar.set_message(format!(
            "{} {}",
            self.iteration_label(),
            style("(starting...)").dim()
        ));
        self.iteration_bar
            .enable_steady_tick(Duration::from_millis(100));
    }

    /// Short status on the spinner; printed as a dim line in verbose mode.
    pub fn log_step(&self, msg: &str) {
        self.iteration_bar.set_message(format!(
            "{} {}",
            self.iteration_label(),
            style(format!("({})", msg)).dim()
        ));
        if self.verbose {
            self.print_line(format!("    {} {}", style("→").dim(), style(msg).dim()));
        }
    }

    /// Refresh the spinner with wall-clock elapsed time.
    pub fn update_elapsed(&self, elapsed: Duration) {
        let time_str = format_secs(elapsed.as_secs());
        self.iteration_bar.set_message(format!(
            "{} {}",
            self.iteration_label(),
            style(format!("({})", time_str)).dim()
        ));
    }

    pub fn show_signals(&self, signals: &AgentSignals) {
        if let Some(remaining) = signals.remaining {
            self.print_line(format!(
                "    {} Remaining: {}",
                PROGRESS,
                style(remaining).cyan().bold()
            ));
        }
        if signals.success_marker {
            self.print_line(format!("    {} Agent reported all tasks complete", CHECK));
        }
    }

    pub fn show_review(&self, findings: usize) {
        if findings == 0 {
            self.print_line(format!("    {} Review: {}", REVIEW, style("clean").green()));
        } else {
            self.print_line(format!(
                "    {} Review: {} finding(s)",
                REVIEW,
                style(findings).yellow().bold()
            ));
        }
    }

    pub fn show_review_skipped(&self, reason: &str) {
        self.print_line(format!(
            "    {} Review skipped: {}",
            SKIP,
            style(reason).dim()
        ));
    }

    pub fn show_fix(&self, items: usize) {
        self.print_line(format!(
            "    {} Fixing {} item(s)",
            FIX,
            style(items).yellow()
        ));
    }

    pub fn show_warning(&self, msg: &str) {
        self.print_line(format!("    {} {}", WARN, style(msg).yellow()));
    }

    pub fn show_pr(&self, number: u64, url: Option<&str>) {
        self.print_line(format!(
            "    {} Pull request #{} {}",
            PR,
            style(number).green().bold(),
            style(url.unwrap_or("")).dim()
        ));
    }

    pub fn show_waiting(&self, what: &str, wait: Duration) {
        self.iteration_bar.set_message(format!(
            "{} {} {}",
            CLOCK,
            what,
            style(format!("({}s)", wait.as_secs())).dim()
        ));
    }

    /// Finish the iteration spinner with a status line.
    pub fn iteration_done(&self, iter: u32, msg: &str) {
        self.iteration_bar
            .finish_with_message(format!("Iteration {} - {}", iter, msg));
    }

    pub fn iteration_error(&self, iter: u32, msg: &str) {
        self.iteration_bar
            .finish_with_message(format!("{} Iteration {} failed: {}", CROSS, iter, msg));
    }

    /// Advance the phase bar and print a completion line.
    pub fn phase_complete(&self, phase: PhaseKind) {
        self.phase_bar.inc(1);
        self.print_line(format!(
            "\n{} {} complete\n",
            SPARKLE,
            style(phase.label()).green().bold()
        ));
    }

    pub fn phase_skipped(&self, phase: PhaseKind, reason: &str) {
        self.phase_bar.inc(1);
        self.print_line(format!(
            "{} {} skipped: {}",
            SKIP,
            style(phase.label()).dim(),
            reason
        ));
    }

    pub fn phase_failed(&self, phase: PhaseKind, reason: &str) {
        self.print_line(format!(
            "\n{} {} failed: {}\n",
            CROSS,
            style(phase.label()).red().bold(),
            reason
        ));
    }

    /// Stop all bars and print the final session table.
    pub fn finish(&self, session: &Session) {
        self.iteration_bar.finish_and_clear();
        self.phase_bar.finish();
        for line in summary_lines(session) {
            self.print_line(line);
        }
    }
}

/// Plain-text session summary used by the UI and `sessions show`.
pub fn summary_lines(session: &Session) -> Vec<String> {
    let status = match session.status {
        SessionStatus::Completed => style(session.status.to_string()).green().bold(),
        SessionStatus::Failed => style(session.status.to_string()).red().bold(),
        SessionStatus::InProgress => style(session.status.to_string()).yellow(),
    };
    let mut lines = vec![
        String::new(),
        format!("Session {}  {}", style(&session.session_id).bold(), status),
        format!(
            "  {:<12} {} → {}",
            "branch",
            session.base_branch,
            session.feature_branch
        ),
    ];
    if let Some(ref policy) = session.executor_policy {
        lines.push(format!("  {:<12} {}", "policy", policy));
    }
    for phase in &session.selected_phases {
        let phase_status = session.phase_status(*phase);
        let marker = match phase_status {
            PhaseStatus::Completed => CHECK.to_string(),
            PhaseStatus::Failed => CROSS.to_string(),
            PhaseStatus::Skipped => SKIP.to_string(),
            _ => "  ".to_string(),
        };
        let detail = match phase {
            PhaseKind::Local => session
                .local()
                .map(|l| {
                    format!(
                        "iterations {} · remaining {} · empty streak {} · clean streak {}",
                        l.iteration,
                        l.last_remaining
                            .map(|r| r.to_string())
                            .unwrap_or_else(|| "?".to_string()),
                        l.empty_change_streak,
                        l.no_findings_streak
                    )
                })
                .unwrap_or_default(),
            PhaseKind::Pr => session
                .pr()
                .map(|p| match (p.pr_number, &p.pr_url) {
                    (Some(n), Some(url)) => format!("#{} {}", n, url),
                    (Some(n), None) => format!("#{}", n),
                    _ => "no pull request".to_string(),
                })
                .unwrap_or_default(),
            PhaseKind::ReviewFix => session
                .review_fix()
                .map(|r| format!("cycles {} · acknowledged {}", r.cycle, r.acknowledged.len()))
                .unwrap_or_default(),
        };
        lines.push(format!(
            "  {}{:<12} {:<11} {}",
            marker,
            phase.as_str(),
            phase_status.to_string(),
            style(detail).dim()
        ));
    }
    if !session.errors.is_empty() {
        lines.push(format!("  {} {} recorded error(s)", WARN, session.errors.len()));
    }
    lines
}
