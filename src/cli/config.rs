// Copyright (c) 2025-2026 the pipeline-doctor contributors
// SPDX-License-Identifier: Apache-2.0

//! Configuration management using the `config` crate for hierarchical discovery and merging.
//!
//! ## Configuration Sources (in precedence order, highest to lowest):
//! 1. **CLI flags** - Highest precedence (applied by the subcommand)
//! 2. **Environment variables** - `PIPELINE_DOCTOR_*`, nested keys separated by `__`
//!    (e.g. `PIPELINE_DOCTOR_SERVER__BIND`)
//! 3. **Config files** - Lowest precedence
//!
//! ## Config File Discovery (in merge order, later overrides earlier):
//! 1. `~/.config/pipeline-doctor/config.toml` (user config directory)
//! 2. `./pipeline-doctor.toml` in the current directory
//! 3. Explicit `--config` path (must exist)
//!
//! Credentials and endpoints left unset after merging fall back to their
//! conventional variables: `AZURE_DEVOPS_PAT`, `AZURE_DEVOPS_ORG`, `AI_API_KEY`,
//! `AI_API_BASE_URL`, `AI_MODEL`, `OPENROUTER_API_KEY`, `OPENROUTER_BASE_URL`,
//! `GEMINI_API_KEY`, `GEMINI_MODEL` and `DEFAULT_AI_PROVIDER`.

use crate::ci::UrlDefaults;
use crate::llm::{ProviderKind, ProviderSettings, RegistrySettings};
use crate::llm::provider::CompletionOptions;
use crate::server::ServerSettings;
use crate::utils::error::DoctorError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const LOCAL_CONFIG_FILE: &str = "pipeline-doctor.toml";

/// Root configuration structure loaded from config files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ci: CiConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub default_provider: Option<String>,
}

/// HTTP service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_analysis_timeout_secs")]
    pub analysis_timeout_secs: u64,
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            analysis_timeout_secs: default_analysis_timeout_secs(),
            session_ttl_secs: default_session_ttl_secs(),
            heartbeat_ms: default_heartbeat_ms(),
        }
    }
}

fn default_bind() -> String {
    crate::server::DEFAULT_BIND.to_string()
}

fn default_analysis_timeout_secs() -> u64 {
    300
}

fn default_session_ttl_secs() -> u64 {
    600
}

fn default_heartbeat_ms() -> u64 {
    1000
}

/// CI server access and URL reconstruction defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiConfig {
    /// Personal access token for the build REST API.
    pub pat: Option<String>,
    pub organization: Option<String>,
    /// Host used to rebuild scheme-less or path-only URLs.
    pub host: Option<String>,
    pub collection: Option<String>,
    pub project: Option<String>,
    #[serde(default = "default_ci_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            pat: None,
            organization: None,
            host: None,
            collection: None,
            project: None,
            request_timeout_secs: default_ci_timeout_secs(),
        }
    }
}

fn default_ci_timeout_secs() -> u64 {
    60
}

/// LLM provider configurations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: ProviderConfig,
    #[serde(default)]
    pub openrouter: ProviderConfig,
    #[serde(default)]
    pub gemini: ProviderConfig,
    /// Transport timeout for provider requests, in seconds.
    pub request_timeout_secs: Option<u64>,
}

/// Configuration for a single LLM provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_log_chars: Option<usize>,
    /// Completion length cap sent to the backend.
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

fn discover_config_paths(explicit_path: Option<&Path>) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    // User config (lowest precedence)
    if let Some(user_config) = get_user_config_path() {
        paths.push(user_config);
    }

    let current_dir_config = PathBuf::from(LOCAL_CONFIG_FILE);
    if current_dir_config.exists() {
        paths.push(current_dir_config);
    }

    // Explicit --config path (highest precedence)
    if let Some(explicit) = explicit_path {
        if !explicit.exists() {
            return Err(DoctorError::Config(format!(
                "Config file not found: {}",
                explicit.display()
            ))
            .into());
        }
        paths.push(explicit.to_path_buf());
    }

    Ok(paths)
}

fn get_user_config_path() -> Option<PathBuf> {
    dirs::config_dir()
        .map(|config_dir| config_dir.join("pipeline-doctor").join("config.toml"))
        .filter(|path| path.exists())
}

/// Load configuration from discovered config files and environment variables.
pub fn load(explicit_path: Option<&Path>) -> Result<Config> {
    let mut builder = config::Config::builder();

    for config_path in discover_config_paths(explicit_path)? {
        tracing::debug!("Loading config file: {}", config_path.display());
        builder = builder.add_source(config::File::from(config_path));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PIPELINE_DOCTOR")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let settings = builder.build().context("Failed to build configuration")?;

    let mut config: Config = settings
        .try_deserialize()
        .context("Failed to deserialize configuration")?;
    config.apply_env_fallbacks(|name| std::env::var(name).ok());
    Ok(config)
}

fn fill(slot: &mut Option<String>, value: Option<String>) {
    if slot.as_deref().is_none_or(str::is_empty) {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            *slot = Some(value);
        }
    }
}

impl Config {
    /// Fill unset values from the conventional credential variables.
    pub fn apply_env_fallbacks(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fill(&mut self.ci.pat, lookup("AZURE_DEVOPS_PAT"));
        fill(&mut self.ci.organization, lookup("AZURE_DEVOPS_ORG"));
        fill(&mut self.general.default_provider, lookup("DEFAULT_AI_PROVIDER"));

        let openai = &mut self.providers.openai;
        fill(&mut openai.api_key, lookup("AI_API_KEY"));
        fill(&mut openai.base_url, lookup("AI_API_BASE_URL"));
        fill(&mut openai.model, lookup("AI_MODEL"));

        let openrouter = &mut self.providers.openrouter;
        fill(&mut openrouter.api_key, lookup("OPENROUTER_API_KEY"));
        fill(&mut openrouter.base_url, lookup("OPENROUTER_BASE_URL"));

        let gemini = &mut self.providers.gemini;
        fill(&mut gemini.api_key, lookup("GEMINI_API_KEY"));
        fill(&mut gemini.model, lookup("GEMINI_MODEL"));
    }

    /// Provider settings with built-in defaults for anything not configured.
    pub fn registry_settings(&self) -> Result<RegistrySettings, DoctorError> {
        let default_provider = match self.general.default_provider.as_deref() {
            Some(name) => {
                ProviderKind::parse(name).ok_or_else(|| DoctorError::invalid_provider(name))?
            }
            None => ProviderKind::OpenAI,
        };
        let mut settings = RegistrySettings {
            default_provider,
            openai: provider_settings(ProviderKind::OpenAI, &self.providers.openai),
            openrouter: provider_settings(ProviderKind::OpenRouter, &self.providers.openrouter),
            gemini: provider_settings(ProviderKind::Gemini, &self.providers.gemini),
            ..RegistrySettings::default()
        };
        if let Some(secs) = self.providers.request_timeout_secs {
            settings.request_timeout = Duration::from_secs(secs);
        }
        Ok(settings)
    }

    pub fn url_defaults(&self) -> UrlDefaults {
        let base = UrlDefaults::default();
        UrlDefaults {
            host: self.ci.host.clone().unwrap_or(base.host),
            collection: self
                .ci
                .collection
                .clone()
                .or_else(|| self.ci.organization.clone())
                .unwrap_or(base.collection),
            project: self.ci.project.clone().unwrap_or(base.project),
        }
    }

    pub fn ci_timeout(&self) -> Duration {
        Duration::from_secs(self.ci.request_timeout_secs)
    }

    /// Server settings, with `bind` taking precedence over the configured address.
    pub fn server_settings(&self, bind: Option<&str>) -> ServerSettings {
        ServerSettings {
            bind: bind.map_or_else(|| self.server.bind.clone(), str::to_string),
            analysis_timeout: Duration::from_secs(self.server.analysis_timeout_secs),
            session_ttl: Duration::from_secs(self.server.session_ttl_secs),
            heartbeat: Duration::from_millis(self.server.heartbeat_ms),
        }
    }
}

fn provider_settings(kind: ProviderKind, config: &ProviderConfig) -> ProviderSettings {
    let defaults = ProviderSettings::defaults_for(kind);
    ProviderSettings {
        api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        base_url: config.base_url.clone().unwrap_or(defaults.base_url),
        model: config.model.clone().unwrap_or(defaults.model),
        max_log_chars: config.max_log_chars.unwrap_or(defaults.max_log_chars),
        options: CompletionOptions {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        },
    }
}
