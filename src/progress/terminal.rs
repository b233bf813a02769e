// Copyright (c) 2025-2026 the pipeline-doctor contributors
// SPDX-License-Identifier: Apache-2.0

//! Spinner for one-shot CLI runs.
//!
//! Renders stage transitions on a single `indicatif` spinner line on stderr. When
//! stderr is not a terminal the bar is hidden and only the `tracing` output remains.

use super::{ProgressEvent, ProgressSink, ProgressStatus};
use console::Term;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const SPINNER_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] {msg}";

/// Drives one spinner through the stages of a single run.
pub struct TerminalSink {
    bar: ProgressBar,
}

impl TerminalSink {
    /// A visible spinner when stderr is a TTY, a hidden bar otherwise.
    pub fn new() -> Self {
        if Term::stderr().is_term() {
            Self::spinner()
        } else {
            Self::hidden()
        }
    }

    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    fn spinner() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(Self::style());
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template(SPINNER_TEMPLATE)
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to parse spinner template: {e}");
                ProgressStyle::default_spinner()
            })
    }

    /// The message currently shown next to the spinner.
    pub fn message(&self) -> String {
        self.bar.message()
    }

    /// Whether the run reached a terminal stage.
    pub fn is_finished(&self) -> bool {
        self.bar.is_finished()
    }
}

impl Default for TerminalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for TerminalSink {
    fn emit(&self, event: ProgressEvent) {
        tracing::debug!(status = event.status.as_str(), "{}", event.message);
        match event.status {
            ProgressStatus::Finishing | ProgressStatus::Complete => {
                self.bar.finish_with_message(event.message);
            }
            ProgressStatus::Error => self.bar.abandon_with_message(event.message),
            ProgressStatus::Initializing
            | ProgressStatus::Parsing
            | ProgressStatus::Retrieving
            | ProgressStatus::Analyzing
            | ProgressStatus::Generating => self.bar.set_message(event.message),
        }
    }
}

impl Drop for TerminalSink {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stages_update_spinner_message() {
        let sink = TerminalSink::hidden();
        sink.stage(ProgressStatus::Parsing, "Parsing URL...");
        sink.stage(ProgressStatus::Retrieving, "Retrieving build logs...");

        assert_eq!(sink.message(), "Retrieving build logs...");
        assert!(!sink.is_finished());
    }

    #[test]
    fn test_finishing_stage_finishes_spinner() {
        let sink = TerminalSink::hidden();
        sink.stage(ProgressStatus::Analyzing, "Analyzing logs...");
        sink.stage(ProgressStatus::Finishing, "Analysis complete");

        assert!(sink.is_finished());
        assert_eq!(sink.message(), "Analysis complete");
    }

    #[test]
    fn test_error_stage_abandons_spinner() {
        let sink = TerminalSink::hidden();
        sink.stage(ProgressStatus::Retrieving, "Retrieving build logs...");
        sink.stage(ProgressStatus::Error, "Analysis cancelled");

        assert!(sink.is_finished());
        assert_eq!(sink.message(), "Analysis cancelled");
    }

    #[test]
    fn test_spinner_template_parses() {
        assert!(ProgressStyle::default_spinner().template(SPINNER_TEMPLATE).is_ok());
    }
}
