//! Output and progress based stall detection.
//!
//! Diagnostics only: the local loop logs these signals at debug level. The hard
//! stop is the empty-change streak, not this detector.

use sha2::{Digest, Sha256};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StallSignal {
    /// The agent produced byte-identical output `times` iterations in a row.
    RepeatedOutput { times: usize },
    /// The remaining-work counter has not moved for `iterations` iterations.
    CounterPlateau { value: u32, iterations: usize },
}

impl std::fmt::Display for StallSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StallSignal::RepeatedOutput { times } => {
                write!(f, "identical agent output {} times in a row", times)
            }
            StallSignal::CounterPlateau { value, iterations } => write!(
                f,
                "remaining counter stuck at {} for {} iterations",
                value, iterations
            ),
        }
    }
}

#[derive(Debug)]
pub struct StallDetector {
    window: usize,
    outputs: VecDeque<String>,
    counters: VecDeque<Option<u32>>,
}

impl Default for StallDetector {
    fn default() -> Self {
        Self::new(3)
    }
}

impl StallDetector {
    /// `window` is how many consecutive observations must agree.
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(2),
            outputs: VecDeque::new(),
            counters: VecDeque::new(),
        }
    }

    pub fn observe(&mut self, output: &str, remaining: Option<u32>) -> Vec<StallSignal> {
        let digest = format!("{:x}", Sha256::digest(output.trim().as_bytes()));
        push_bounded(&mut self.outputs, digest, self.window);
        push_bounded(&mut self.counters, remaining, self.window);

        let mut signals = Vec::new();
        if self.outputs.len() == self.window
            && self.outputs.iter().all(|d| d == &self.outputs[0])
        {
            signals.push(StallSignal::RepeatedOutput { times: self.window });
        }
        if self.counters.len() == self.window
            && let Some(Some(value)) = self.counters.front().copied()
            && value > 0
            && self.counters.iter().all(|c| *c == Some(value))
        {
            signals.push(StallSignal::CounterPlateau {
                value,
                iterations: self.window,
            });
        }
        signals
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, value: T, cap: usize) {
    queue.push_back(value);
    while queue.len() > cap {
        queue.pop_front();
    }
}
