// Copyright (c) 2025-2026 the pipeline-doctor contributors
// SPDX-License-Identifier: Apache-2.0

//! HTTP router tests driven through `tower::ServiceExt::oneshot`.

mod common;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use common::{build_url, mock_build, mock_build_details, mock_chat, orchestrator};
use pipeline_doctor::pipeline::AnalysisService;
use pipeline_doctor::progress::ProgressBroker;
use pipeline_doctor::server::{AppState, router};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app(base_url: &str) -> Router {
    let broker = Arc::new(ProgressBroker::new(Duration::from_millis(50)));
    let service = AnalysisService::new(Arc::new(orchestrator(base_url)), broker);
    router(AppState::new(service))
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).expect("request"))
        .await
        .expect("router should respond");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, serde_json::from_slice(&bytes).expect("json body"))
}

async fn post_analyze(app: &Router, body: Value) -> (StatusCode, Value) {
    let request = Request::post("/api/analyze")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("router should respond");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, serde_json::from_slice(&bytes).expect("json body"))
}

/// JSON payloads of every `data:` line in an event-stream body.
fn data_frames(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).expect("frame should be JSON"))
        .collect()
}

#[tokio::test]
async fn test_providers_catalogue() {
    let app = app("http://127.0.0.1:9");
    let (status, body) = get(&app, "/api/providers").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["providers"]["openai"], "OpenAI");
    assert_eq!(body["providers"]["openrouter"], "OpenRouter");
    assert_eq!(body["providers"]["gemini"], "Gemini");
    assert_eq!(body["models"]["gemini"][0], "gemini-1.5-pro");
    assert_eq!(body["default_provider"], "openai");
}

#[tokio::test]
async fn test_debug_endpoint() {
    let app = app("http://127.0.0.1:9");
    let (status, body) = get(&app, "/debug").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["message"], "API is working");
    assert_eq!(body["default_provider"], "openai");
    assert_eq!(body["providers"].as_object().map(|p| p.len()), Some(3));
}

#[tokio::test]
async fn test_provider_probe_reports_client_type() {
    let app = app("http://127.0.0.1:9");
    let (status, body) = get(&app, "/test_provider/gemini?model=gemini-1.5-flash").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["message"], "Successfully initialized gemini provider");
    assert_eq!(body["model"], "gemini-1.5-flash");
    assert_eq!(body["provider_type"], "GeminiProvider");
}

#[tokio::test]
async fn test_provider_probe_unknown_name_falls_back() {
    let app = app("http://127.0.0.1:9");
    let (status, body) = get(&app, "/test_provider/claude").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model"], "default model");
    assert_eq!(body["provider_type"], "OpenAIProvider");
}

#[tokio::test]
async fn test_analyze_requires_url() {
    let app = app("http://127.0.0.1:9");

    let (status, body) = post_analyze(&app, serde_json::json!({ "query": "why?" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "URL is required");

    let (status, _) = post_analyze(&app, serde_json::json!({ "url": " @ " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_analyze_returns_diagnosis() {
    let mut server = mockito::Server::new_async().await;
    let _ci = mock_build(&mut server, 60, &["error MSB3073"]).await;
    let chat = mock_chat(&mut server, "The post-build step failed.").await;

    let app = app(&server.url());
    let (status, body) = post_analyze(
        &app,
        serde_json::json!({
            "url": format!("@{}", build_url(&server.url(), 60)),
            "query": "why?",
            "provider": "openai",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "The post-build step failed.");
    assert_eq!(body["provider"], "openai");
    assert_eq!(body["model"], "gpt-4o");
    chat.assert_async().await;
}

#[tokio::test]
async fn test_analyze_failure_is_reported_in_result() {
    let mut server = mockito::Server::new_async().await;
    let _details = mock_build_details(&mut server, 61, 404).await;

    let app = app(&server.url());
    let (status, body) = post_analyze(
        &app,
        serde_json::json!({ "url": build_url(&server.url(), 61) }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["result"],
        "I had trouble retrieving the logs: Failed to get build details: 404"
    );
    assert_eq!(body["provider"], "openai");
    assert_eq!(body["model"], "gpt-4o");
}

#[tokio::test]
async fn test_progress_stream_replays_session_events() {
    let mut server = mockito::Server::new_async().await;
    let _ci = mock_build(&mut server, 62, &["log"]).await;
    let _chat = mock_chat(&mut server, "done").await;

    let app = app(&server.url());
    let (status, body) = post_analyze(
        &app,
        serde_json::json!({
            "url": build_url(&server.url(), 62),
            "sessionId": "sse-1",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "done");

    let response = app
        .clone()
        .oneshot(
            Request::get("/stream-progress/sse-1")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("router should respond");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
    assert_eq!(response.headers()["x-accel-buffering"], "no");

    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("stream should end after completion");
    let text = String::from_utf8(bytes.to_vec()).expect("utf-8");
    let frames = data_frames(&text);

    let statuses: Vec<&str> = frames
        .iter()
        .filter_map(|frame| frame["status"].as_str())
        .collect();
    assert_eq!(
        statuses,
        vec![
            "initializing",
            "initializing",
            "parsing",
            "retrieving",
            "analyzing",
            "generating",
            "finishing",
            "complete",
        ]
    );
    assert_eq!(frames[0]["message"], "Starting analysis...");
    assert_eq!(frames[7]["message"], "Analysis complete");
    assert!(frames.iter().all(|frame| frame["timestamp"].is_string()));
}
