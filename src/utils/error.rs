// Copyright (c) 2025-2026 the pipeline-doctor contributors
// SPDX-License-Identifier: Apache-2.0

use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

/// Redaction patterns, applied in order. All are literals compiled on first use.
static REDACTION_PATTERNS: LazyLock<[(regex::Regex, &'static str); 5]> = LazyLock::new(|| {
    [
        (
            regex::Regex::new(r"(api[_-]?key[=:\s]+)[^\s&]+")
                .expect("api_key redaction pattern is invalid"),
            "${1}[REDACTED]",
        ),
        (
            regex::Regex::new(r"([?&]key=)[^\s&]+").expect("key query redaction pattern is invalid"),
            "${1}[REDACTED]",
        ),
        (
            regex::Regex::new(r"(token[=:\s]+)[^\s]+").expect("token redaction pattern is invalid"),
            "${1}[REDACTED]",
        ),
        (
            regex::Regex::new(r"((?i:bearer)\s+|Basic\s+)[^\s]+")
                .expect("auth header redaction pattern is invalid"),
            "${1}[REDACTED]",
        ),
        (
            regex::Regex::new(r"(sk-[a-zA-Z0-9-]{8,})").expect("sk-key redaction pattern is invalid"),
            "[REDACTED]",
        ),
    ]
});

#[derive(Debug, Error)]
pub enum DoctorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM provider error: {provider} - {}", redact_sensitive_data(message))]
    Provider { provider: String, message: String },

    #[error("Rate limited by {provider}, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Analysis timed out after {}s", timeout.as_secs())]
    Timeout { timeout: Duration },

    #[error("Parse error: {message}")]
    ParseError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Validation error: {message}\nSuggestion: {suggestion}")]
    ValidationError { message: String, suggestion: String },

    #[error("Network error: {message}")]
    NetworkError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Redact sensitive information from error messages.
pub fn redact_sensitive_data(message: &str) -> String {
    let mut result = message.to_string();
    for (pattern, replacement) in REDACTION_PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).to_string();
    }
    result
}

impl DoctorError {
    pub fn invalid_provider(provider: &str) -> Self {
        DoctorError::ValidationError {
            message: format!("Invalid provider: '{}'", provider),
            suggestion: "Valid providers are: openai, openrouter, gemini".to_string(),
        }
    }

    pub fn missing_api_key(provider: &str) -> Self {
        // OpenAI-compatible credentials use the generic AI_* variables.
        let env_var = match provider {
            "openai" => "AI_API_KEY".to_string(),
            other => format!("{}_API_KEY", other.to_uppercase()),
        };
        DoctorError::ValidationError {
            message: format!("API key not configured for provider '{}'", provider),
            suggestion: format!(
                "Set the {} environment variable or add it to your config file",
                env_var
            ),
        }
    }

    /// Short, user-facing description without the variant prefix.
    ///
    /// Provider and network failures end up inside the "Error analyzing logs with ..."
    /// message, where repeating "LLM provider error: openai -" would only add noise.
    pub fn detail(&self) -> String {
        match self {
            DoctorError::Provider { message, .. } => redact_sensitive_data(message),
            DoctorError::NetworkError { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for DoctorError {
    fn from(err: serde_json::Error) -> Self {
        DoctorError::ParseError {
            message: "Failed to parse JSON response".to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<reqwest::Error> for DoctorError {
    fn from(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "Request timed out. Check your network connection.".to_string()
        } else if err.is_connect() {
            "Failed to connect to server. Check your network connection.".to_string()
        } else if err.is_status() {
            format!(
                "HTTP error: {}",
                err.status()
                    .map_or("unknown".to_string(), |s| s.to_string())
            )
        } else if err.is_decode() {
            "Failed to decode response body".to_string()
        } else {
            "Network request failed".to_string()
        };

        DoctorError::NetworkError {
            message,
            source: Some(Box::new(err)),
        }
    }
}
