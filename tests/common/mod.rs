// Copyright (c) 2025-2026 the pipeline-doctor contributors
// SPDX-License-Identifier: Apache-2.0

//! Common test utilities and fixtures for integration tests.
//!
//! The CI REST API and the provider endpoints are both served by one mockito
//! server; build URLs use the TFS layout so that the server's address becomes
//! the API base.

#![allow(dead_code)]

use mockito::{Matcher, Mock, ServerGuard};
use pipeline_doctor::ci::{LogFetcher, UrlParser};
use pipeline_doctor::llm::{ProviderRegistry, RegistrySettings};
use pipeline_doctor::pipeline::Orchestrator;
use std::time::Duration;

pub const PAT: &str = "test-pat";
/// `base64(":test-pat")`
pub const BASIC_AUTH: &str = "Basic OnRlc3QtcGF0";
pub const API_KEY: &str = "test-key";
pub const COLLECTION: &str = "DefaultCollection";
pub const PROJECT: &str = "Payments";

/// Build-results URL for `build_id` on the mock server.
pub fn build_url(server_url: &str, build_id: u64) -> String {
    format!(
        "{}/tfs/{}/{}/_build/results?buildId={}&view=logs",
        server_url, COLLECTION, PROJECT, build_id
    )
}

/// REST path under the project's `_apis` root.
pub fn api_path(build_id: u64, suffix: &str) -> String {
    format!(
        "/tfs/{}/{}/_apis/build/builds/{}{}",
        COLLECTION, PROJECT, build_id, suffix
    )
}

pub fn api_version() -> Matcher {
    Matcher::UrlEncoded("api-version".into(), "6.0".into())
}

pub async fn mock_build_details(server: &mut ServerGuard, build_id: u64, status: usize) -> Mock {
    server
        .mock("GET", api_path(build_id, "").as_str())
        .match_query(api_version())
        .match_header("authorization", BASIC_AUTH)
        .with_status(status)
        .with_header("content-type", "application/json")
        .with_body(r#"{"buildNumber":"20260114.3","status":"completed","result":"failed"}"#)
        .create_async()
        .await
}

pub async fn mock_log_index(server: &mut ServerGuard, build_id: u64, log_ids: &[u64]) -> Mock {
    let entries: Vec<serde_json::Value> = log_ids
        .iter()
        .map(|id| serde_json::json!({ "id": id, "lineCount": 42, "type": "Container" }))
        .collect();
    server
        .mock("GET", api_path(build_id, "/logs").as_str())
        .match_query(api_version())
        .match_header("authorization", BASIC_AUTH)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(serde_json::json!({ "count": log_ids.len(), "value": entries }).to_string())
        .create_async()
        .await
}

pub async fn mock_log(
    server: &mut ServerGuard,
    build_id: u64,
    log_id: u64,
    status: usize,
    body: &str,
) -> Mock {
    server
        .mock("GET", api_path(build_id, &format!("/logs/{}", log_id)).as_str())
        .match_query(api_version())
        .match_header("authorization", BASIC_AUTH)
        .with_status(status)
        .with_header("content-type", "text/plain")
        .with_body(body)
        .create_async()
        .await
}

/// Build detail, index and one body per entry of `logs`, all successful.
pub async fn mock_build(server: &mut ServerGuard, build_id: u64, logs: &[&str]) -> Vec<Mock> {
    let ids: Vec<u64> = (1..=logs.len() as u64).collect();
    let mut mocks = vec![
        mock_build_details(server, build_id, 200).await,
        mock_log_index(server, build_id, &ids).await,
    ];
    for (id, body) in ids.iter().zip(logs) {
        mocks.push(mock_log(server, build_id, *id, 200, body).await);
    }
    mocks
}

pub fn chat_completion_body(text: &str) -> String {
    serde_json::json!({
        "id": "chatcmpl-1",
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": text } }],
        "usage": { "prompt_tokens": 120, "completion_tokens": 30 }
    })
    .to_string()
}

/// OpenAI-compatible completion endpoint answering with `text`.
pub async fn mock_chat(server: &mut ServerGuard, text: &str) -> Mock {
    server
        .mock("POST", "/chat/completions")
        .match_header("authorization", format!("Bearer {}", API_KEY).as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(chat_completion_body(text))
        .create_async()
        .await
}

/// Every provider pointed at `base_url` with a test key.
pub fn registry_settings(base_url: &str) -> RegistrySettings {
    let mut settings = RegistrySettings::default();
    for provider in [
        &mut settings.openai,
        &mut settings.openrouter,
        &mut settings.gemini,
    ] {
        provider.api_key = Some(API_KEY.to_string());
        provider.base_url = base_url.to_string();
    }
    settings.request_timeout = Duration::from_secs(5);
    settings
}

pub fn fetcher() -> LogFetcher {
    LogFetcher::new(PAT.to_string(), Duration::from_secs(5)).expect("Failed to create fetcher")
}

/// Orchestrator whose CI server and providers all live at `base_url`.
pub fn orchestrator(base_url: &str) -> Orchestrator {
    let registry =
        ProviderRegistry::new(registry_settings(base_url)).expect("Failed to create registry");
    Orchestrator::new(UrlParser::default(), fetcher(), registry)
}
