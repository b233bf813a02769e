// Copyright (c) 2025-2026 the pipeline-doctor contributors
// SPDX-License-Identifier: Apache-2.0

//! # pipeline-doctor
//!
//! Turns a CI build URL plus a question into a diagnosis:
//!
//! 1. **Parse** - [`ci::url`] finds the build URL in free-form text and extracts a
//!    [`ci::BuildReference`]
//! 2. **Retrieve** - [`ci::fetcher`] pulls every log of the build from the CI REST API
//! 3. **Analyze** - [`llm::registry`] hands the logs and question to the selected
//!    language-model provider
//!
//! [`pipeline::Orchestrator`] composes the stages and reports each transition as a
//! [`progress::ProgressEvent`]. [`server`] exposes the pipeline over HTTP with a
//! server-sent progress stream per session.
//!
//! Configuration follows hierarchical precedence:
//! 1. User config (~/.config/pipeline-doctor/config.toml)
//! 2. Current directory (pipeline-doctor.toml)
//! 3. Explicit --config path
//! 4. Environment variables (PIPELINE_DOCTOR_*, then the conventional credential variables)
//! 5. CLI flags (highest precedence)

pub mod ci;
pub mod cli;
pub mod llm;
pub mod pipeline;
pub mod progress;
pub mod server;
pub mod utils;

use anyhow::{Context, Result};
use ci::url::parse_build_url;
use ci::{LogFetcher, ParseFailure, UrlParser};
use cli::args::{Args, Command};
use cli::config::Config;
use llm::{ProviderCatalogue, ProviderRegistry};
use pipeline::{AnalysisRequest, AnalysisService, Orchestrator, split_query};
use progress::{ProgressBroker, TerminalSink};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber at `level`. `RUST_LOG` overrides it.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
    if installed.is_err() {
        tracing::debug!("Logging was already initialized");
    }
}

/// Wire parser, fetcher and provider registry from the resolved configuration.
pub fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let registry = ProviderRegistry::new(config.registry_settings()?)
        .context("Failed to initialize the default AI provider")?;

    let pat = config.ci.pat.clone().unwrap_or_default();
    if pat.is_empty() {
        tracing::warn!("No personal access token configured; CI requests will be unauthenticated");
    }
    if let Some(organization) = &config.ci.organization {
        tracing::info!("Initialized Azure DevOps client for organization: {}", organization);
    }
    let fetcher = LogFetcher::new(pat, config.ci_timeout()).context("Failed to create CI client")?;

    Ok(Orchestrator::new(UrlParser::new(config.url_defaults()), fetcher, registry)
        .with_analysis_timeout(Duration::from_secs(config.server.analysis_timeout_secs)))
}

pub async fn run(args: Args) -> Result<()> {
    tracing::info!("pipeline-doctor v{} starting", env!("CARGO_PKG_VERSION"));
    let config = cli::config::load(args.config.as_deref())?;

    match args.command {
        Command::Serve { bind } => {
            let settings = config.server_settings(bind.as_deref());
            tracing::debug!(?settings, "Server configuration");
            let orchestrator = Arc::new(build_orchestrator(&config)?);
            let broker = Arc::new(ProgressBroker::new(settings.heartbeat));
            server::serve(AnalysisService::new(orchestrator, broker), &settings).await
        }
        Command::Analyze {
            text,
            provider,
            model,
        } => {
            let orchestrator = build_orchestrator(&config)?;
            let request = AnalysisRequest::new(text.join(" "))
                .with_user("cli_user")
                .with_provider(provider)
                .with_model(model);

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            let spinner = TerminalSink::new();
            let analysis = orchestrator.run(&request, &spinner, &cancel).await?;
            drop(spinner);
            println!("{}", analysis.result);
            Ok(())
        }
        Command::Parse { text } => {
            let joined = text.join(" ");
            let parser = UrlParser::new(config.url_defaults());
            let found = parser.locate(&joined).ok_or(ParseFailure::NoUrl)?;
            let reference = parse_build_url(&found.url)?;
            let output = serde_json::json!({
                "url": found.url,
                "matcher": found.matcher,
                "query": split_query(&joined, found.end),
                "reference": reference,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Command::Providers => {
            let settings = config.registry_settings()?;
            let catalogue = ProviderCatalogue::new(settings.default_provider);
            println!("{}", serde_json::to_string_pretty(&catalogue)?);
            Ok(())
        }
    }
}
