// Copyright (c) 2025-2026 the pipeline-doctor contributors
// SPDX-License-Identifier: Apache-2.0

//! Provider registry: name → concrete language-model client.
//!
//! The set of backends is closed ([`ProviderKind`]). Unknown names never fail;
//! they resolve to the configured default provider with a warning. The registry
//! holds one active [`ProviderHandle`] and replaces it wholesale when a request
//! asks for a different provider or model.

use crate::llm::prompts::{DEFAULT_MAX_LOG_CHARS, GEMINI_MAX_LOG_CHARS, build_diagnosis_prompt};
use crate::llm::provider::{CompletionOptions, LLMProvider, Message};
use crate::llm::providers::gemini::{GEMINI_DEFAULT_BASE_URL, GEMINI_DEFAULT_MODEL, GeminiProvider};
use crate::llm::providers::openai::{OPENAI_DEFAULT_BASE_URL, OPENAI_DEFAULT_MODEL, OpenAIProvider};
use crate::llm::providers::openrouter::{
    OPENROUTER_DEFAULT_BASE_URL, OPENROUTER_DEFAULT_MODEL, OpenRouterProvider,
};
use crate::utils::error::DoctorError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Supported language-model backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    OpenRouter,
    Gemini,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::OpenAI,
        ProviderKind::OpenRouter,
        ProviderKind::Gemini,
    ];

    /// Parse a provider id, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "openai" => Some(ProviderKind::OpenAI),
            "openrouter" => Some(ProviderKind::OpenRouter),
            "gemini" => Some(ProviderKind::Gemini),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Gemini => "gemini",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "OpenAI",
            ProviderKind::OpenRouter => "OpenRouter",
            ProviderKind::Gemini => "Gemini",
        }
    }

    /// Models offered to interactive clients for this provider.
    pub fn suggested_models(&self) -> &'static [&'static str] {
        match self {
            ProviderKind::OpenAI => &["gpt-4o", "gpt-4-turbo", "gpt-3.5-turbo"],
            ProviderKind::OpenRouter => &[
                "openai/gpt-4-turbo",
                "anthropic/claude-3-opus",
                "anthropic/claude-3-sonnet",
                "mistralai/mistral-large",
                "meta-llama/llama-3-70b-instruct",
            ],
            ProviderKind::Gemini => &["gemini-1.5-pro", "gemini-1.5-flash", "gemini-1.0-pro"],
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported providers, their display names and suggested models.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderCatalogue {
    pub providers: BTreeMap<&'static str, &'static str>,
    pub models: BTreeMap<&'static str, Vec<&'static str>>,
    pub default_provider: &'static str,
}

impl ProviderCatalogue {
    pub fn new(default_provider: ProviderKind) -> Self {
        Self {
            providers: ProviderKind::ALL
                .iter()
                .map(|k| (k.as_str(), k.display_name()))
                .collect(),
            models: ProviderKind::ALL
                .iter()
                .map(|k| (k.as_str(), k.suggested_models().to_vec()))
                .collect(),
            default_provider: default_provider.as_str(),
        }
    }
}

/// Connection settings for one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    /// Log characters embedded in the prompt.
    pub max_log_chars: usize,
    pub options: CompletionOptions,
}

impl ProviderSettings {
    pub fn defaults_for(kind: ProviderKind) -> Self {
        let (base_url, model, max_log_chars) = match kind {
            ProviderKind::OpenAI => (
                OPENAI_DEFAULT_BASE_URL,
                OPENAI_DEFAULT_MODEL,
                DEFAULT_MAX_LOG_CHARS,
            ),
            ProviderKind::OpenRouter => (
                OPENROUTER_DEFAULT_BASE_URL,
                OPENROUTER_DEFAULT_MODEL,
                DEFAULT_MAX_LOG_CHARS,
            ),
            ProviderKind::Gemini => (
                GEMINI_DEFAULT_BASE_URL,
                GEMINI_DEFAULT_MODEL,
                GEMINI_MAX_LOG_CHARS,
            ),
        };
        Self {
            api_key: None,
            base_url: base_url.to_string(),
            model: model.to_string(),
            max_log_chars,
            options: CompletionOptions::default(),
        }
    }
}

/// Everything needed to build any provider.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrySettings {
    pub default_provider: ProviderKind,
    pub openai: ProviderSettings,
    pub openrouter: ProviderSettings,
    pub gemini: ProviderSettings,
    /// Transport timeout for provider HTTP clients.
    pub request_timeout: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            default_provider: ProviderKind::OpenAI,
            openai: ProviderSettings::defaults_for(ProviderKind::OpenAI),
            openrouter: ProviderSettings::defaults_for(ProviderKind::OpenRouter),
            gemini: ProviderSettings::defaults_for(ProviderKind::Gemini),
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl RegistrySettings {
    pub fn for_kind(&self, kind: ProviderKind) -> &ProviderSettings {
        match kind {
            ProviderKind::OpenAI => &self.openai,
            ProviderKind::OpenRouter => &self.openrouter,
            ProviderKind::Gemini => &self.gemini,
        }
    }

    /// Map a requested provider name to a supported kind, falling back to the default.
    pub fn kind_or_default(&self, name: &str) -> ProviderKind {
        ProviderKind::parse(name).unwrap_or_else(|| {
            tracing::warn!(
                "Unknown provider '{}', falling back to {}",
                name,
                self.default_provider.display_name()
            );
            self.default_provider
        })
    }
}

/// Concrete client for one backend.
pub enum ProviderClient {
    OpenAI(OpenAIProvider),
    OpenRouter(OpenRouterProvider),
    Gemini(GeminiProvider),
}

impl ProviderClient {
    fn as_provider(&self) -> &dyn LLMProvider {
        match self {
            ProviderClient::OpenAI(p) => p,
            ProviderClient::OpenRouter(p) => p,
            ProviderClient::Gemini(p) => p,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ProviderClient::OpenAI(_) => "OpenAIProvider",
            ProviderClient::OpenRouter(_) => "OpenRouterProvider",
            ProviderClient::Gemini(_) => "GeminiProvider",
        }
    }
}

/// A ready-to-use provider: client plus its prompt budget.
pub struct ProviderHandle {
    kind: ProviderKind,
    client: ProviderClient,
    has_api_key: bool,
    max_log_chars: usize,
    options: CompletionOptions,
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("kind", &self.kind)
            .field("model", &self.model())
            .field("max_log_chars", &self.max_log_chars)
            .finish_non_exhaustive()
    }
}

impl ProviderHandle {
    /// Build the client for `kind`, using `model` when given and the configured model otherwise.
    pub fn build(
        kind: ProviderKind,
        model: Option<&str>,
        settings: &RegistrySettings,
    ) -> Result<Self, DoctorError> {
        let provider_settings = settings.for_kind(kind);
        let model = model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(&provider_settings.model)
            .to_string();
        let api_key = provider_settings.api_key.clone().unwrap_or_default();
        let base_url = provider_settings.base_url.clone();
        let timeout = settings.request_timeout;

        let client = match kind {
            ProviderKind::OpenAI => ProviderClient::OpenAI(OpenAIProvider::new(
                api_key, base_url, model, timeout,
            )?),
            ProviderKind::OpenRouter => ProviderClient::OpenRouter(OpenRouterProvider::new(
                api_key, base_url, model, timeout,
            )?),
            ProviderKind::Gemini => ProviderClient::Gemini(GeminiProvider::new(
                api_key, base_url, model, timeout,
            )?),
        };

        let handle = Self {
            kind,
            client,
            has_api_key: provider_settings
                .api_key
                .as_deref()
                .is_some_and(|k| !k.is_empty()),
            max_log_chars: provider_settings.max_log_chars,
            options: provider_settings.options,
        };
        if !handle.has_api_key {
            tracing::warn!("No API key configured for {}", kind.display_name());
        }
        tracing::info!(
            "Initialized {} provider with model: {}",
            kind.display_name(),
            handle.model()
        );
        Ok(handle)
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn model(&self) -> &str {
        self.client.as_provider().model()
    }

    pub fn max_log_chars(&self) -> usize {
        self.max_log_chars
    }

    pub fn client(&self) -> &ProviderClient {
        &self.client
    }

    /// Ask the backend to diagnose `logs` with respect to `query`.
    pub async fn analyze(&self, logs: &str, query: &str) -> Result<String, DoctorError> {
        if !self.has_api_key {
            return Err(DoctorError::missing_api_key(self.kind.as_str()));
        }

        let provider = self.client.as_provider();
        tracing::info!(
            "Analyzing logs with {} model {}",
            self.kind.display_name(),
            provider.model()
        );
        let prompt = build_diagnosis_prompt(logs, query, self.max_log_chars);
        let messages = [Message::user(prompt)];

        tracing::info!("Sending request to {} API", self.kind.display_name());
        let response = provider
            .complete(&messages, &self.options)
            .await?;

        tracing::info!(
            prompt_tokens = response.prompt_tokens,
            completion_tokens = response.completion_tokens,
            "Successfully generated analysis with {}",
            self.kind.display_name()
        );
        Ok(response.content)
    }
}

/// Resolve a provider name (and optional model) into a fresh handle.
///
/// Unknown names fall back to the default provider; this is not an error.
pub fn resolve(
    name: &str,
    model: Option<&str>,
    settings: &RegistrySettings,
) -> Result<ProviderHandle, DoctorError> {
    tracing::info!("Creating AI provider for: {}", name);
    ProviderHandle::build(settings.kind_or_default(name), model, settings)
}

/// Holds the active provider and swaps it when a request asks for another one.
pub struct ProviderRegistry {
    settings: RegistrySettings,
    active: RwLock<Arc<ProviderHandle>>,
}

impl ProviderRegistry {
    /// Create a registry with the default provider active.
    pub fn new(settings: RegistrySettings) -> Result<Self, DoctorError> {
        let initial = ProviderHandle::build(settings.default_provider, None, &settings)?;
        Ok(Self {
            settings,
            active: RwLock::new(Arc::new(initial)),
        })
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    pub fn catalogue(&self) -> ProviderCatalogue {
        ProviderCatalogue::new(self.settings.default_provider)
    }

    /// Snapshot of the active handle.
    pub fn active(&self) -> Arc<ProviderHandle> {
        match self.active.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Make `name`/`model` the active provider, rebuilding only when it differs.
    ///
    /// Returns the handle the caller should use; concurrent callers each keep the
    /// snapshot they selected.
    pub fn activate(
        &self,
        name: Option<&str>,
        model: Option<&str>,
    ) -> Result<Arc<ProviderHandle>, DoctorError> {
        let current = self.active();
        let kind = name.map_or(current.kind(), |n| self.settings.kind_or_default(n));
        let model = model.filter(|m| !m.trim().is_empty());

        let same_model = model.is_none_or(|m| m == current.model());
        if kind == current.kind() && same_model {
            return Ok(current);
        }

        tracing::info!(
            "Changing AI provider from {} ({}) to {} ({})",
            current.kind(),
            current.model(),
            kind,
            model.unwrap_or("default model")
        );
        let handle = Arc::new(ProviderHandle::build(kind, model, &self.settings)?);
        match self.active.write() {
            Ok(mut guard) => *guard = Arc::clone(&handle),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&handle),
        }
        Ok(handle)
    }
}
