// Copyright (c) 2025-2026 the pipeline-doctor contributors
// SPDX-License-Identifier: Apache-2.0

pub mod fetcher;
pub mod url;

pub use fetcher::{BuildLogs, FetchError, FetchStage, LogFetcher, LogRetrieval};
pub use url::{BuildReference, CiSystem, ParseFailure, UrlDefaults, UrlMatch, UrlParser};
