// Copyright (c) 2025-2026 the pipeline-doctor contributors
// SPDX-License-Identifier: Apache-2.0

//! OpenAI-compatible chat completions.
//!
//! The wire types here are shared with the OpenRouter provider, which speaks the
//! same protocol.

use crate::llm::provider::{CompletionOptions, CompletionResponse, LLMProvider, Message};
use crate::utils::error::DoctorError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const OPENAI_DEFAULT_BASE_URL: &str = "https://api.aimlapi.com/v1";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o";

/// Request body for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    error_type: Option<String>,
    message: Option<String>,
    code: Option<serde_json::Value>,
}

pub(crate) fn http_client(timeout: Duration) -> Result<Client, DoctorError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| DoctorError::Config(format!("Failed to create HTTP client: {}", e)))
}

pub(crate) fn completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

/// Send one chat-completion request and extract the first choice.
///
/// `provider` names the backend in error values.
pub(crate) async fn send_chat(
    request: RequestBuilder,
    provider: &str,
    model: &str,
    messages: &[Message],
    options: &CompletionOptions,
) -> Result<CompletionResponse, DoctorError> {
    let body = ChatRequest {
        model,
        messages: messages
            .iter()
            .map(|m| ChatMessage {
                role: &m.role,
                content: &m.content,
            })
            .collect(),
        max_tokens: options.max_tokens,
        temperature: options.temperature,
    };

    let response = request
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await?;

    let status = response.status();

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);

        return Err(DoctorError::RateLimited {
            provider: provider.to_string(),
            retry_after,
        });
    }

    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();

        if let Ok(ApiError {
            error: Some(detail),
        }) = serde_json::from_str::<ApiError>(&error_text)
        {
            let error_type = detail
                .error_type
                .or_else(|| detail.code.map(|c| c.to_string()))
                .unwrap_or_else(|| "unknown".to_string());
            let message = detail
                .message
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(DoctorError::Provider {
                provider: provider.to_string(),
                message: format!("{}: {}", error_type, message),
            });
        }

        return Err(DoctorError::Provider {
            provider: provider.to_string(),
            message: format!("HTTP {}: {}", status, error_text),
        });
    }

    let response_body: ChatResponse = response.json().await?;

    let content = response_body
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| DoctorError::Provider {
            provider: provider.to_string(),
            message: "response contained no completion text".to_string(),
        })?;

    let (prompt_tokens, completion_tokens) = response_body
        .usage
        .map(|u| (u.prompt_tokens, u.completion_tokens))
        .unwrap_or((0, 0));

    Ok(CompletionResponse::new(
        content,
        prompt_tokens,
        completion_tokens,
    ))
}

pub struct OpenAIProvider {
    api_key: String,
    base_url: String,
    model: String,
    client: Client,
}

impl OpenAIProvider {
    /// Creates a provider against an OpenAI-compatible endpoint.
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
impl LLMProvider for OpenAIProvider {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<CompletionResponse, DoctorError> {
        let request = self
            .client
            .post(completions_url(&self.base_url))
            .bearer_auth(&self.api_key);
        send_chat(request, "openai", &self.model, messages, options).await
    }

    fn model(&self) -> &str {
        &self.model
    }
}
