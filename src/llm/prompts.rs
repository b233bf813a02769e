// Copyright (c) 2025-2026 the pipeline-doctor contributors
// SPDX-License-Identifier: Apache-2.0

//! Diagnosis prompt construction.
//!
//! Every provider uses the same instructional template; only the log budget
//! differs, since context windows differ between backends.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{(query|logs)\}\}").expect("placeholder pattern is invalid")
});

/// Default log budget for OpenAI-compatible backends, in characters.
pub const DEFAULT_MAX_LOG_CHARS: usize = 80_000;

/// Log budget for Gemini, whose context window is smaller.
pub const GEMINI_MAX_LOG_CHARS: usize = 50_000;

/// Question used when the user gave only a URL.
pub const DEFAULT_QUERY: &str = "What caused this build to fail and how can I fix it?";

/// Load the diagnosis prompt template.
pub fn diagnosis_prompt() -> &'static str {
    include_str!("../../prompts/diagnosis.md")
}

/// Keep at most `max_chars` characters from the start of `logs`.
///
/// Cuts on a character boundary, never inside a multi-byte sequence.
pub fn truncate_logs(logs: &str, max_chars: usize) -> &str {
    match logs.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &logs[..byte_index],
        None => logs,
    }
}

/// Build the diagnosis prompt for `query` over the first `max_log_chars` of `logs`.
pub fn build_diagnosis_prompt(logs: &str, query: &str, max_log_chars: usize) -> String {
    let trimmed = truncate_logs(logs, max_log_chars);
    if trimmed.len() < logs.len() {
        tracing::debug!(
            "Truncated logs from {} to {} bytes for prompt",
            logs.len(),
            trimmed.len()
        );
    }

    // One pass over the template: substituted text is never scanned again.
    PLACEHOLDER
        .replace_all(diagnosis_prompt(), |caps: &Captures<'_>| {
            if &caps[1] == "query" { query } else { trimmed }
        })
        .into_owned()
}
