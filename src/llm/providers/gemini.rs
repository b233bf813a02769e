// Copyright (c) 2025-2026 the pipeline-doctor contributors
// SPDX-License-Identifier: Apache-2.0

use crate::llm::provider::{CompletionOptions, CompletionResponse, LLMProvider, Message};
use crate::llm::providers::openai::http_client;
use crate::utils::error::DoctorError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const GEMINI_DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-1.5-pro";

/// Google Gemini via the `generateContent` REST endpoint.
pub struct GeminiProvider {
    api_key: String,
    base_url: String,
    model: String,
    client: Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: usize,
    #[serde(default)]
    candidates_token_count: usize,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    status: Option<String>,
    message: Option<String>,
}

impl GeminiProvider {
    /// Creates a new Gemini provider.
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

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    /// Gemini calls the assistant side "model".
    fn gemini_role(role: &str) -> &str {
        match role {
            "assistant" => "model",
            _ => "user",
        }
    }
}

#[async_trait]
impl LLMProvider for GeminiProvider {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<CompletionResponse, DoctorError> {
        let generation_config = (options.max_tokens.is_some() || options.temperature.is_some())
            .then_some(GenerationConfig {
                max_output_tokens: options.max_tokens,
                temperature: options.temperature,
            });
        let request_body = GenerateContentRequest {
            contents: messages
                .iter()
                .map(|m| Content {
                    role: Self::gemini_role(&m.role),
                    parts: vec![Part { text: &m.content }],
                })
                .collect(),
            generation_config,
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(DoctorError::RateLimited {
                provider: "gemini".to_string(),
                retry_after: None,
            });
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();

            if let Ok(error) = serde_json::from_str::<GeminiError>(&error_text) {
                return Err(DoctorError::Provider {
                    provider: "gemini".to_string(),
                    message: format!(
                        "{}: {}",
                        error.error.status.unwrap_or_else(|| status.to_string()),
                        error
                            .error
                            .message
                            .unwrap_or_else(|| "Unknown error".to_string())
                    ),
                });
            }

            return Err(DoctorError::Provider {
                provider: "gemini".to_string(),
                message: format!("HTTP {}: {}", status, error_text),
            });
        }

        let response_body: GenerateContentResponse = response.json().await?;

        let content = response_body
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .filter(|text| !text.is_empty())
            .ok_or_else(|| DoctorError::Provider {
                provider: "gemini".to_string(),
                message: "response contained no text".to_string(),
            })?;

        let (prompt_tokens, completion_tokens) = response_body
            .usage_metadata
            .map(|u| (u.prompt_token_count, u.candidates_token_count))
            .unwrap_or((0, 0));

        Ok(CompletionResponse::new(
            content,
            prompt_tokens,
            completion_tokens,
        ))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_layout() {
        let provider = GeminiProvider::new(
            "key".to_string(),
            "https://example.test/v1beta/".to_string(),
            "gemini-1.5-flash".to_string(),
            Duration::from_secs(5),
        )
        .expect("should create provider");
        assert_eq!(
            provider.endpoint(),
            "https://example.test/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn test_request_serialization_uses_camel_case() {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: "Hello" }],
            }],
            generation_config: Some(GenerationConfig {
                max_output_tokens: Some(256),
                temperature: None,
            }),
        };
        let json = serde_json::to_string(&request).expect("serialization should succeed");
        assert!(json.contains("\"generationConfig\":{\"maxOutputTokens\":256}"));
        assert!(json.contains("\"parts\":[{\"text\":\"Hello\"}]"));
    }

    #[test]
    fn test_assistant_role_maps_to_model() {
        assert_eq!(GeminiProvider::gemini_role("assistant"), "model");
        assert_eq!(GeminiProvider::gemini_role("user"), "user");
        assert_eq!(GeminiProvider::gemini_role("system"), "user");
    }
}
