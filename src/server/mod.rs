// Copyright (c) 2025-2026 the pipeline-doctor contributors
// SPDX-License-Identifier: Apache-2.0

//! HTTP surface.
//!
//! | Route | Purpose |
//! |---|---|
//! | `POST /api/analyze` | submit a build URL and question, wait for the diagnosis |
//! | `GET /stream-progress/{session_id}` | server-sent progress events for a session |
//! | `GET /api/providers` | provider catalogue |
//! | `GET /debug` | liveness plus configured providers |
//! | `GET /test_provider/{name}` | build a provider client without calling it |

use crate::llm::prompts::DEFAULT_QUERY;
use crate::llm::resolve;
use crate::pipeline::{AnalysisRequest, AnalysisService, DEFAULT_ANALYSIS_TIMEOUT, DEFAULT_USER_ID};
use crate::progress::broker::{DEFAULT_HEARTBEAT, DEFAULT_SESSION_TTL};
use crate::progress::{ProgressEvent, ProgressStatus, StreamFrame};
use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;

pub const DEFAULT_BIND: &str = "127.0.0.1:5000";

/// Listener and session lifecycle settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub bind: String,
    pub analysis_timeout: Duration,
    pub session_ttl: Duration,
    pub heartbeat: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            analysis_timeout: DEFAULT_ANALYSIS_TIMEOUT,
            session_ttl: DEFAULT_SESSION_TTL,
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }
}

impl ServerSettings {
    /// How often the session sweeper runs.
    pub fn sweep_interval(&self) -> Duration {
        (self.session_ttl / 10).max(Duration::from_secs(1))
    }
}

#[derive(Clone)]
pub struct AppState {
    service: AnalysisService,
}

impl AppState {
    pub fn new(service: AnalysisService) -> Self {
        Self { service }
    }
}

/// JSON error body: `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmitBody {
    pub url: Option<String>,
    pub query: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    #[serde(rename = "sessionId", alias = "session_id")]
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub result: String,
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelParam {
    pub model: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/analyze", post(analyze))
        .route("/stream-progress/{session_id}", get(stream_progress))
        .route("/api/providers", get(providers))
        .route("/debug", get(debug))
        .route("/test_provider/{name}", get(test_provider))
        .with_state(state)
}

/// Bind, start the session sweeper and serve until Ctrl-C.
pub async fn serve(service: AnalysisService, settings: &ServerSettings) -> Result<()> {
    let sweeper = service
        .broker()
        .spawn_sweeper(settings.session_ttl, settings.sweep_interval());

    let listener = tokio::net::TcpListener::bind(&settings.bind)
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind))?;
    tracing::info!(
        "Listening on http://{}",
        listener.local_addr().context("Listener has no local address")?
    );

    axum::serve(listener, router(AppState::new(service)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    sweeper.abort();
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}

/// Strip a stray `@` and make sure the URL has a scheme. Blank input yields `None`.
pub fn normalize_submitted_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let url = trimmed.strip_prefix('@').unwrap_or(trimmed).trim();
    if url.is_empty() {
        return None;
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        Some(url.to_string())
    } else {
        Some(format!("https://{}", url))
    }
}

async fn analyze(
    State(state): State<AppState>,
    Json(body): Json<SubmitBody>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let url = body
        .url
        .as_deref()
        .and_then(normalize_submitted_url)
        .ok_or_else(|| ApiError::bad_request("URL is required"))?;
    let query = body
        .query
        .filter(|q| !q.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_QUERY.to_string());

    let registry = state.service.orchestrator().registry();
    let provider = body
        .provider
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| registry.settings().default_provider.to_string());

    let request = AnalysisRequest::new(format!("{} {}", url, query))
        .with_user(body.user_id.unwrap_or_else(|| DEFAULT_USER_ID.to_string()))
        .with_provider(Some(provider))
        .with_model(body.model)
        .with_session(body.session_id);
    tracing::info!(raw_text = %request.raw_text, "Analysis submitted");

    let response = match state.service.submit(request).await {
        Ok(analysis) => SubmitResponse {
            result: analysis.result,
            provider: analysis.provider.to_string(),
            model: analysis.model,
        },
        Err(failure) => {
            // Without a handle the run never got past provider setup.
            let (provider, model) = match (failure.provider, failure.model.clone()) {
                (Some(kind), Some(model)) => (kind.to_string(), model),
                _ => {
                    let active = registry.active();
                    (active.kind().to_string(), active.model().to_string())
                }
            };
            SubmitResponse {
                result: failure.to_string(),
                provider,
                model,
            }
        }
    };
    Ok(Json(response))
}

async fn stream_progress(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    tracing::info!(session_id = %session_id, "Progress subscriber connected");
    let greeting = ProgressEvent::new(ProgressStatus::Initializing, "Starting analysis...");
    let frames = state.service.broker().subscribe(&session_id);
    let stream = futures::stream::once(async move { StreamFrame::Event(greeting) })
        .chain(frames)
        .map(|frame| Ok::<Event, Infallible>(frame_to_event(frame)));

    let mut response = Sse::new(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        header::HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}

fn frame_to_event(frame: StreamFrame) -> Event {
    match frame {
        StreamFrame::Event(event) => json_event(&event),
        StreamFrame::Heartbeat => Event::default().comment("heartbeat"),
        StreamFrame::Complete => json_event(&ProgressEvent::new(
            ProgressStatus::Complete,
            "Analysis complete",
        )),
    }
}

fn json_event(event: &ProgressEvent) -> Event {
    Event::default().json_data(event).unwrap_or_else(|e| {
        tracing::error!("Failed to serialize progress event: {}", e);
        Event::default().comment("unserializable event")
    })
}

async fn providers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.orchestrator().registry().catalogue())
}

async fn debug(State(state): State<AppState>) -> impl IntoResponse {
    let catalogue = state.service.orchestrator().registry().catalogue();
    Json(serde_json::json!({
        "status": "ok",
        "message": "API is working",
        "providers": catalogue.providers,
        "default_provider": catalogue.default_provider,
    }))
}

async fn test_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<ModelParam>,
) -> Response {
    let settings = state.service.orchestrator().registry().settings();
    match resolve(&name, params.model.as_deref(), settings) {
        Ok(handle) => Json(serde_json::json!({
            "status": "ok",
            "message": format!("Successfully initialized {} provider", name),
            "model": params.model.as_deref().unwrap_or("default model"),
            "provider_type": handle.client().type_name(),
        }))
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "status": "error",
                "message": e.to_string(),
            })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_submitted_url() {
        assert_eq!(
            normalize_submitted_url("@https://dev.azure.com/o/p/_build/results?buildId=1").as_deref(),
            Some("https://dev.azure.com/o/p/_build/results?buildId=1")
        );
        assert_eq!(
            normalize_submitted_url("  dev.azure.com/o/p/_build/results?buildId=1 ").as_deref(),
            Some("https://dev.azure.com/o/p/_build/results?buildId=1")
        );
        assert_eq!(
            normalize_submitted_url("http://tfs.local/tfs/c/p?buildId=2").as_deref(),
            Some("http://tfs.local/tfs/c/p?buildId=2")
        );
        assert_eq!(normalize_submitted_url("  @ "), None);
        assert_eq!(normalize_submitted_url(""), None);
    }

    #[test]
    fn test_submit_body_accepts_both_session_spellings() {
        let camel: SubmitBody =
            serde_json::from_str(r#"{"url":"x","sessionId":"abc"}"#).expect("camel");
        assert_eq!(camel.session_id.as_deref(), Some("abc"));
        let snake: SubmitBody =
            serde_json::from_str(r#"{"url":"x","session_id":"def"}"#).expect("snake");
        assert_eq!(snake.session_id.as_deref(), Some("def"));
    }

    #[test]
    fn test_sweep_interval_has_floor() {
        let settings = ServerSettings {
            session_ttl: Duration::from_secs(3),
            ..ServerSettings::default()
        };
        assert_eq!(settings.sweep_interval(), Duration::from_secs(1));
        assert_eq!(
            ServerSettings::default().sweep_interval(),
            Duration::from_secs(60)
        );
    }
}
