// Copyright (c) 2025-2026 the pipeline-doctor contributors
// SPDX-License-Identifier: Apache-2.0

use crate::llm::provider::{CompletionOptions, CompletionResponse, LLMProvider, Message};
use crate::llm::providers::openai::{completions_url, http_client, send_chat};
use crate::utils::error::DoctorError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

pub const OPENROUTER_DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const OPENROUTER_DEFAULT_MODEL: &str = "openai/gpt-4-turbo";

const REFERER: &str = "https://github.com/pipeline-doctor/pipeline-doctor";
const TITLE: &str = "Pipeline Doctor";

/// OpenRouter LLM provider for accessing multiple models via a unified API.
///
/// Uses the OpenAI-compatible API under `{base_url}/chat/completions` and sends
/// OpenRouter's attribution headers with every request.
///
/// # Configuration
///
/// - `OPENROUTER_API_KEY` env var or `[providers.openrouter] api_key`
/// - `OPENROUTER_BASE_URL` env var or `[providers.openrouter] base_url`
/// - `[providers.openrouter] model = "..."` sets the default model
///
/// # Examples
///
/// ```no_run
/// use pipeline_doctor::llm::providers::openrouter::OpenRouterProvider;
/// use std::time::Duration;
///
/// let provider = OpenRouterProvider::new(
///     "your-api-key".to_string(),
///     "https://openrouter.ai/api/v1".to_string(),
///     "anthropic/claude-3-opus".to_string(),
///     Duration::from_secs(120),
/// ).expect("Failed to create provider");
/// ```
pub struct OpenRouterProvider {
    api_key: String,
    base_url: String,
    model: String,
    client: Client,
}

impl OpenRouterProvider {
    /// Creates a new OpenRouter provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, DoctorError> {
        Ok(Self {
            api_key,
            base_url,
            model,
            client: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl LLMProvider for OpenRouterProvider {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<CompletionResponse, DoctorError> {
        let request = self
            .client
            .post(completions_url(&self.base_url))
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", REFERER)
            .header("X-Title", TITLE);
        send_chat(request, "openrouter", &self.model, messages, options).await
    }

    fn model(&self) -> &str {
        &self.model
    }
}
