// Copyright (c) 2025-2026 the pipeline-doctor contributors
// SPDX-License-Identifier: Apache-2.0

//! Progress reporting for long-running analyses.
//!
//! The orchestrator emits a [`ProgressEvent`] at every stage transition through a
//! [`ProgressSink`]. Interactive runs use a [`SessionSink`] that publishes into the
//! [`ProgressBroker`]; one-shot CLI runs draw a [`TerminalSink`] spinner.

pub mod broker;
pub mod terminal;

pub use broker::{ProgressBroker, StreamFrame};
pub use terminal::TerminalSink;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Stage names as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Initializing,
    Parsing,
    Retrieving,
    Analyzing,
    Generating,
    Finishing,
    Complete,
    Error,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Initializing => "initializing",
            ProgressStatus::Parsing => "parsing",
            ProgressStatus::Retrieving => "retrieving",
            ProgressStatus::Analyzing => "analyzing",
            ProgressStatus::Generating => "generating",
            ProgressStatus::Finishing => "finishing",
            ProgressStatus::Complete => "complete",
            ProgressStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub status: ProgressStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(status: ProgressStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Receives stage transitions from a pipeline run.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);

    fn stage(&self, status: ProgressStatus, message: &str) {
        self.emit(ProgressEvent::new(status, message));
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Publishes events to one broker session.
#[derive(Clone)]
pub struct SessionSink {
    broker: Arc<ProgressBroker>,
    session_id: String,
}

impl SessionSink {
    pub fn new(broker: Arc<ProgressBroker>, session_id: impl Into<String>) -> Self {
        Self {
            broker,
            session_id: session_id.into(),
        }
    }
}

impl ProgressSink for SessionSink {
    fn emit(&self, event: ProgressEvent) {
        self.broker.publish(&self.session_id, event);
    }
}

/// Keeps every event in memory, in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statuses(&self) -> Vec<ProgressStatus> {
        self.events().iter().map(|e| e.status).collect()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: ProgressEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
