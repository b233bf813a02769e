// Copyright (c) 2025-2026 the pipeline-doctor contributors
// SPDX-License-Identifier: Apache-2.0

//! Request orchestration: raw text in, diagnosis out.
//!
//! A run walks these stages and reports each one to a [`ProgressSink`]:
//!
//! 1. **Initializing** - activate the requested provider/model
//! 2. **Parsing** - locate the build URL and split off the question
//! 3. **Retrieving** - fetch the build logs
//! 4. **Analyzing** / **Generating** - send logs and question to the provider
//! 5. **Finishing** - analysis text received
//!
//! The first failing stage short-circuits the run with a [`PipelineError`] whose
//! `Display` is the message shown to the user, and an `error` event is emitted
//! with the same text. [`AnalysisService`] runs exactly one pipeline per
//! submission on a background task and hands the outcome back to the caller.

use crate::ci::{FetchError, LogFetcher, LogRetrieval, ParseFailure, UrlParser};
use crate::ci::url::parse_build_url;
use crate::llm::prompts::DEFAULT_QUERY;
use crate::llm::{ProviderHandle, ProviderKind, ProviderRegistry};
use crate::progress::{NoopSink, ProgressBroker, ProgressSink, ProgressStatus, SessionSink};
use crate::utils::error::DoctorError;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_ANALYSIS_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_USER_ID: &str = "api_user";

/// One inbound analysis call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub raw_text: String,
    pub user_id: String,
    pub provider_name: Option<String>,
    pub model: Option<String>,
    pub session_id: Option<String>,
}

impl AnalysisRequest {
    pub fn new(raw_text: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            user_id: DEFAULT_USER_ID.to_string(),
            provider_name: None,
            model: None,
            session_id: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_provider(mut self, provider: Option<String>) -> Self {
        self.provider_name = provider.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model.filter(|m| !m.trim().is_empty());
        self
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id.filter(|s| !s.trim().is_empty());
        self
    }
}

/// A completed diagnosis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Analysis {
    pub result: String,
    pub provider: ProviderKind,
    pub model: String,
}

/// Why a run stopped early. `Display` is the user-facing message.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(
        "I couldn't find a valid Azure DevOps URL in your message. Please include the URL to the build or release you want me to analyze."
    )]
    NoUrl,

    #[error(
        "I couldn't parse that Azure DevOps URL. Please make sure it's a valid build or release URL."
    )]
    InvalidUrl(#[source] ParseFailure),

    #[error("I had trouble retrieving the logs: {0}")]
    Fetch(#[from] FetchError),

    #[error("I had trouble retrieving the logs: No logs found for this build.")]
    NoLogs,

    #[error("Error analyzing logs with {}: {}", .kind.display_name(), .source.detail())]
    Analysis {
        kind: ProviderKind,
        #[source]
        source: DoctorError,
    },

    #[error("Error initializing AI provider: {}", .0.detail())]
    ProviderSetup(#[source] DoctorError),

    #[error("Analysis cancelled")]
    Cancelled,
}

/// A failed run, tagged with the provider handle it ran on.
///
/// `provider` and `model` are `None` when the run failed before a handle was
/// activated.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    #[source]
    pub error: PipelineError,
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
}

impl RunFailure {
    fn on(handle: &ProviderHandle, error: PipelineError) -> Self {
        Self {
            error,
            provider: Some(handle.kind()),
            model: Some(handle.model().to_string()),
        }
    }
}

impl From<PipelineError> for RunFailure {
    fn from(error: PipelineError) -> Self {
        Self {
            error,
            provider: None,
            model: None,
        }
    }
}

/// Split `raw_text` at the end of the located URL.
///
/// Returns the trimmed remainder, or the default question when nothing follows.
pub fn split_query(raw_text: &str, url_end: usize) -> String {
    let rest = raw_text.get(url_end..).unwrap_or_default().trim();
    if rest.is_empty() {
        DEFAULT_QUERY.to_string()
    } else {
        rest.to_string()
    }
}

/// Composes URL parsing, log retrieval and provider analysis.
pub struct Orchestrator {
    parser: UrlParser,
    fetcher: LogFetcher,
    registry: ProviderRegistry,
    analysis_timeout: Duration,
}

impl Orchestrator {
    pub fn new(parser: UrlParser, fetcher: LogFetcher, registry: ProviderRegistry) -> Self {
        Self {
            parser,
            fetcher,
            registry,
            analysis_timeout: DEFAULT_ANALYSIS_TIMEOUT,
        }
    }

    pub fn with_analysis_timeout(mut self, timeout: Duration) -> Self {
        self.analysis_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn parser(&self) -> &UrlParser {
        &self.parser
    }

    /// Run the pipeline and render the outcome as text.
    ///
    /// Failures come back as their user-facing message, never as an error.
    pub async fn process(&self, request: &AnalysisRequest) -> String {
        match self.run(request, &NoopSink, &CancellationToken::new()).await {
            Ok(analysis) => analysis.result,
            Err(e) => e.to_string(),
        }
    }

    /// Run every stage, reporting transitions to `sink`.
    ///
    /// On failure an `error` event carrying the user-facing message is emitted
    /// before returning.
    pub async fn run(
        &self,
        request: &AnalysisRequest,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Analysis, PipelineError> {
        self.run_tracked(request, sink, cancel)
            .await
            .map_err(|failure| failure.error)
    }

    /// Like [`Orchestrator::run`], but a failure keeps the provider and model
    /// the run used, even if another run has switched the active handle since.
    pub async fn run_tracked(
        &self,
        request: &AnalysisRequest,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Analysis, RunFailure> {
        tracing::info!(
            user_id = %request.user_id,
            session_id = ?request.session_id,
            "Processing analysis request"
        );
        let previous = self.registry.active();
        let outcome = match self
            .registry
            .activate(request.provider_name.as_deref(), request.model.as_deref())
        {
            Ok(handle) => self
                .execute(request, &previous, &handle, sink, cancel)
                .await
                .map_err(|e| RunFailure::on(&handle, e)),
            Err(e) => Err(RunFailure::from(PipelineError::ProviderSetup(e))),
        };
        match &outcome {
            Ok(analysis) => tracing::info!(
                "Analysis complete ({} characters from {})",
                analysis.result.len(),
                analysis.provider.display_name()
            ),
            Err(e) => {
                tracing::warn!("Analysis stopped: {}", e);
                sink.stage(ProgressStatus::Error, &e.to_string());
            }
        }
        outcome
    }

    async fn execute(
        &self,
        request: &AnalysisRequest,
        previous: &Arc<ProviderHandle>,
        handle: &Arc<ProviderHandle>,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Analysis, PipelineError> {
        let verb = if Arc::ptr_eq(previous, handle) {
            "Using"
        } else {
            "Initializing"
        };
        sink.stage(
            ProgressStatus::Initializing,
            &format!(
                "{} {} provider ({})...",
                verb,
                handle.kind().display_name(),
                handle.model()
            ),
        );

        sink.stage(ProgressStatus::Parsing, "Parsing Azure DevOps URL...");
        let found = self.parser.locate(&request.raw_text).ok_or_else(|| {
            tracing::warn!("No valid Azure DevOps URL found in the message");
            PipelineError::NoUrl
        })?;
        let query = split_query(&request.raw_text, found.end);
        tracing::info!(url = %found.url, query = %query, "Extracted URL and query");
        let reference = parse_build_url(&found.url).map_err(PipelineError::InvalidUrl)?;

        sink.stage(ProgressStatus::Retrieving, "Retrieving build logs...");
        tracing::info!("Retrieving logs for build ID: {}", reference.build_id);
        let logs = match until_cancelled(cancel, self.fetcher.fetch(&reference)).await?? {
            LogRetrieval::Retrieved(logs) => logs,
            LogRetrieval::Empty => return Err(PipelineError::NoLogs),
        };
        if !logs.skipped.is_empty() {
            tracing::warn!("Skipped {} log sections: {:?}", logs.skipped.len(), logs.skipped);
        }

        let kind = handle.kind();
        sink.stage(
            ProgressStatus::Analyzing,
            &format!("Analyzing with {}...", kind.display_name()),
        );
        tracing::info!("Starting log analysis with provider {}", kind);
        sink.stage(ProgressStatus::Generating, "Generating analysis...");
        let analysis = tokio::time::timeout(self.analysis_timeout, handle.analyze(&logs.text, &query));
        let result = match until_cancelled(cancel, analysis).await? {
            Ok(Ok(text)) => text,
            Ok(Err(source)) => return Err(PipelineError::Analysis { kind, source }),
            Err(_elapsed) => {
                tracing::error!(
                    "{} analysis exceeded {}s",
                    kind.display_name(),
                    self.analysis_timeout.as_secs()
                );
                return Err(PipelineError::Analysis {
                    kind,
                    source: DoctorError::Timeout {
                        timeout: self.analysis_timeout,
                    },
                });
            }
        };

        sink.stage(ProgressStatus::Finishing, "Completing analysis...");
        Ok(Analysis {
            result,
            provider: kind,
            model: handle.model().to_string(),
        })
    }
}

async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    work: F,
) -> Result<F::Output, PipelineError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::info!("Analysis cancelled by client");
            Err(PipelineError::Cancelled)
        }
        output = work => Ok(output),
    }
}

/// Runs one pipeline per submission, streaming progress when a session is given.
#[derive(Clone)]
pub struct AnalysisService {
    orchestrator: Arc<Orchestrator>,
    broker: Arc<ProgressBroker>,
}

impl AnalysisService {
    pub fn new(orchestrator: Arc<Orchestrator>, broker: Arc<ProgressBroker>) -> Self {
        Self {
            orchestrator,
            broker,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn broker(&self) -> &Arc<ProgressBroker> {
        &self.broker
    }

    /// Spawn the run and wait for its outcome.
    ///
    /// With a session id, stage events go to that session and the done sentinel
    /// is published when the run ends, whatever the outcome.
    pub async fn submit(&self, request: AnalysisRequest) -> Result<Analysis, RunFailure> {
        let (tx, rx) = oneshot::channel();
        let orchestrator = Arc::clone(&self.orchestrator);
        let broker = Arc::clone(&self.broker);

        tokio::spawn(async move {
            let outcome = match request.session_id.clone() {
                Some(session_id) => {
                    let sink = SessionSink::new(Arc::clone(&broker), session_id.clone());
                    let cancel = broker.begin_run(&session_id);
                    let outcome = orchestrator.run_tracked(&request, &sink, &cancel).await;
                    broker.finish(&session_id);
                    outcome
                }
                None => {
                    orchestrator
                        .run_tracked(&request, &NoopSink, &CancellationToken::new())
                        .await
                }
            };
            if tx.send(outcome).is_err() {
                tracing::debug!("Submitter went away before the analysis finished");
            }
        });

        rx.await
            .unwrap_or_else(|_| Err(RunFailure::from(PipelineError::Cancelled)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ci::FetchStage;

    #[test]
    fn test_split_query_takes_text_after_url() {
        let text = "https://dev.azure.com/o/p/_build/results?buildId=1   what failed? ";
        let end = text.find("   ").expect("separator");
        assert_eq!(split_query(text, end), "what failed?");
    }

    #[test]
    fn test_split_query_defaults_when_empty() {
        let text = "https://dev.azure.com/o/p/_build/results?buildId=1";
        assert_eq!(split_query(text, text.len()), DEFAULT_QUERY);
        assert_eq!(split_query("x  ", 1), DEFAULT_QUERY);
    }

    #[test]
    fn test_user_messages() {
        assert!(PipelineError::NoUrl.to_string().starts_with("I couldn't find a valid"));
        assert!(
            PipelineError::InvalidUrl(ParseFailure::NoUrl)
                .to_string()
                .starts_with("I couldn't parse that Azure DevOps URL")
        );
        let fetch = PipelineError::from(FetchError::Status {
            stage: FetchStage::BuildDetails,
            status: 401,
        });
        assert_eq!(
            fetch.to_string(),
            "I had trouble retrieving the logs: Failed to get build details: 401"
        );
        let timeout = PipelineError::Analysis {
            kind: ProviderKind::Gemini,
            source: DoctorError::Timeout {
                timeout: Duration::from_secs(5),
            },
        };
        assert_eq!(
            timeout.to_string(),
            "Error analyzing logs with Gemini: Analysis timed out after 5s"
        );
    }

    #[test]
    fn test_request_builders_drop_blank_values() {
        let request = AnalysisRequest::new("text")
            .with_provider(Some("  ".to_string()))
            .with_model(Some("gpt-4o".to_string()))
            .with_session(Some(String::new()));
        assert_eq!(request.user_id, DEFAULT_USER_ID);
        assert!(request.provider_name.is_none());
        assert_eq!(request.model.as_deref(), Some("gpt-4o"));
        assert!(request.session_id.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = until_cancelled(&cancel, std::future::pending::<()>()).await;
        assert!(matches!(outcome, Err(PipelineError::Cancelled)));
    }
}
