// Copyright (c) 2025-2026 the pipeline-doctor contributors
// SPDX-License-Identifier: Apache-2.0

//! Build log retrieval from the CI REST API.
//!
//! Retrieval is three sequential calls: build detail, log index, then one call
//! per listed log. The first two are required; individual log bodies are best
//! effort and a failed body is skipped with a warning.

use crate::ci::url::BuildReference;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

pub const API_VERSION: &str = "6.0";
pub const LOG_SEPARATOR: &str = "\n\n===== LOG SECTION =====\n\n";

/// Stage of retrieval that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStage {
    BuildDetails,
    LogIndex,
}

impl std::fmt::Display for FetchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchStage::BuildDetails => write!(f, "build details"),
            FetchStage::LogIndex => write!(f, "logs list"),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to get {stage}: {status}")]
    Status { stage: FetchStage, status: u16 },

    #[error("Error retrieving build logs: {message}")]
    Transport {
        stage: FetchStage,
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Could not determine the project or server for build {build_id} from the URL")]
    IncompleteReference { build_id: u64 },
}

impl FetchError {
    /// HTTP status code for status failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Concatenated log text plus bookkeeping about what was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLogs {
    pub text: String,
    /// Number of log sections that made it into `text`.
    pub sections: usize,
    /// Ids of listed logs whose bodies could not be fetched.
    pub skipped: Vec<u64>,
}

/// Outcome of a retrieval that reached the log index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRetrieval {
    Retrieved(BuildLogs),
    /// The index was empty or every body fetch failed.
    Empty,
}

#[derive(Debug, Deserialize)]
struct LogIndex {
    #[serde(default)]
    value: Vec<LogEntry>,
}

#[derive(Debug, Deserialize)]
struct LogEntry {
    id: Option<u64>,
    #[serde(rename = "lineCount")]
    line_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildDetails {
    build_number: Option<String>,
    status: Option<String>,
    result: Option<String>,
}

/// Authenticated client for the build REST endpoints.
pub struct LogFetcher {
    client: Client,
    personal_access_token: String,
}

impl LogFetcher {
    /// Creates a fetcher authenticating with a personal access token.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(personal_access_token: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            personal_access_token,
        })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, reqwest::Error> {
        // Basic auth with an empty user name encodes as base64(":" + token).
        self.client
            .get(url)
            .basic_auth("", Some(&self.personal_access_token))
            .send()
            .await
    }

    async fn get_required(
        &self,
        url: &str,
        stage: FetchStage,
    ) -> Result<reqwest::Response, FetchError> {
        tracing::info!("Requesting {} from: {}", stage, url);
        let response = self
            .get(url)
            .await
            .map_err(|e| transport_error(stage, e))?;

        if response.status() != StatusCode::OK {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Failed to get {}: {} - {}", stage, status, body);
            return Err(FetchError::Status { stage, status });
        }
        Ok(response)
    }

    /// Retrieve and concatenate every log of the referenced build.
    ///
    /// Job and task ids on the reference are not used to narrow the selection;
    /// all logs of the build are returned.
    pub async fn fetch(&self, reference: &BuildReference) -> Result<LogRetrieval, FetchError> {
        let api_base = reference
            .api_base()
            .ok_or(FetchError::IncompleteReference {
                build_id: reference.build_id,
            })?;
        let build_id = reference.build_id;

        let build_url = format!(
            "{}/build/builds/{}?api-version={}",
            api_base, build_id, API_VERSION
        );
        let details = self
            .get_required(&build_url, FetchStage::BuildDetails)
            .await?;
        match details.json::<BuildDetails>().await {
            Ok(build) => tracing::info!(
                build_number = ?build.build_number,
                status = ?build.status,
                result = ?build.result,
                "Build {} details retrieved",
                build_id
            ),
            Err(e) => tracing::debug!("Build details payload not understood: {}", e),
        }

        if reference.job_id.is_some() || reference.task_id.is_some() {
            tracing::debug!(
                job_id = ?reference.job_id,
                task_id = ?reference.task_id,
                "Job/task selection present; fetching all logs"
            );
        }

        let logs_url = format!(
            "{}/build/builds/{}/logs?api-version={}",
            api_base, build_id, API_VERSION
        );
        let index: LogIndex = self
            .get_required(&logs_url, FetchStage::LogIndex)
            .await?
            .json()
            .await
            .map_err(|e| transport_error(FetchStage::LogIndex, e))?;

        let mut sections = Vec::with_capacity(index.value.len());
        let mut skipped = Vec::new();

        for entry in &index.value {
            let Some(log_id) = entry.id else {
                continue;
            };
            let log_url = format!(
                "{}/build/builds/{}/logs/{}?api-version={}",
                api_base, build_id, log_id, API_VERSION
            );
            tracing::info!(
                lines = ?entry.line_count,
                "Requesting log content from: {}",
                log_url
            );

            match self.get(&log_url).await {
                Ok(response) if response.status() == StatusCode::OK => {
                    match response.text().await {
                        Ok(body) => sections.push(body),
                        Err(e) => {
                            tracing::warn!("Failed to read log {}: {}", log_id, e);
                            skipped.push(log_id);
                        }
                    }
                }
                Ok(response) => {
                    tracing::warn!("Failed to get log {}: {}", log_id, response.status());
                    skipped.push(log_id);
                }
                Err(e) => {
                    tracing::warn!("Failed to get log {}: {}", log_id, e);
                    skipped.push(log_id);
                }
            }
        }

        if sections.is_empty() {
            tracing::warn!("No logs found for build {}", build_id);
            return Ok(LogRetrieval::Empty);
        }

        let logs = BuildLogs {
            sections: sections.len(),
            text: sections.join(LOG_SEPARATOR),
            skipped,
        };
        tracing::info!(
            "Successfully retrieved logs ({} sections, {} characters)",
            logs.sections,
            logs.text.len()
        );
        Ok(LogRetrieval::Retrieved(logs))
    }
}

fn transport_error(stage: FetchStage, err: reqwest::Error) -> FetchError {
    tracing::error!("Error retrieving {}: {}", stage, err);
    FetchError::Transport {
        stage,
        message: err.to_string(),
        source: Some(err),
    }
}
