// Copyright (c) 2025-2026 the pipeline-doctor contributors
// SPDX-License-Identifier: Apache-2.0

//! Build-reference extraction from free-form text.
//!
//! Extraction runs in two phases:
//!
//! 1. **Locate** - an ordered table of [`UrlMatcher`]s is scanned against the raw
//!    text. The first matcher that finds something wins; its normalizer turns the
//!    (possibly partial) match into an absolute URL.
//! 2. **Parse** - the absolute URL is classified as TFS or cloud-hosted and the
//!    build id, project, base URL and optional job/task ids are pulled out.
//!
//! Parsing is lenient: only `buildId` is mandatory. A URL whose layout does not
//! match still yields a [`BuildReference`] with `base_url`/`project` unset.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use thiserror::Error;

static BUILD_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"buildId=(\d+)").expect("build id pattern is invalid"));
static TFS_BASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(https?://[^/]+/tfs/[^/]+)").expect("tfs base pattern is invalid")
});
static TFS_PROJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"tfs/[^/]+/([^/?#]+)").expect("tfs project pattern is invalid"));
static CLOUD_BASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(https?://dev\.azure\.com/[^/]+)").expect("cloud base pattern is invalid")
});
static CLOUD_PROJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"azure\.com/[^/]+/([^/?#]+)").expect("cloud project pattern is invalid")
});
static JOB_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]j=([^&#\s]+)").expect("job id pattern is invalid"));
static TASK_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]t=([^&#\s]+)").expect("task id pattern is invalid"));

/// Which REST layout a build URL follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CiSystem {
    /// On-premises Team Foundation Server (`https://host/tfs/<collection>/<project>/...`).
    Tfs,
    /// Cloud-hosted Azure DevOps (`https://dev.azure.com/<org>/<project>/...`).
    CloudHosted,
}

/// Structured identification of one CI build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildReference {
    pub system: CiSystem,
    pub base_url: Option<String>,
    pub project: Option<String>,
    pub build_id: u64,
    pub job_id: Option<String>,
    pub task_id: Option<String>,
}

impl BuildReference {
    /// `{base_url}/{project}/_apis`, or `None` when the URL did not carry enough layout.
    pub fn api_base(&self) -> Option<String> {
        match (&self.base_url, &self.project) {
            (Some(base), Some(project)) => {
                Some(format!("{}/{}/_apis", base.trim_end_matches('/'), project))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("no build URL found in the message")]
    NoUrl,

    #[error("no buildId parameter in '{url}'")]
    MissingBuildId { url: String },
}

/// Defaults used to rebuild absolute URLs from partial matches.
///
/// The host decides the layout: `dev.azure.com` rebuilds cloud URLs, any other
/// host is treated as an on-premises TFS server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlDefaults {
    /// Host used for scheme-less fragments and, on TFS, bare `tfs/...` paths.
    pub host: String,
    /// TFS collection, or the organization on a cloud host, used when only a build id is given.
    pub collection: String,
    /// Project used when only a build id is given.
    pub project: String,
}

impl UrlDefaults {
    pub fn is_cloud_hosted(&self) -> bool {
        self.host.eq_ignore_ascii_case(CLOUD_HOST)
    }
}

const CLOUD_HOST: &str = "dev.azure.com";

impl Default for UrlDefaults {
    fn default() -> Self {
        Self {
            host: CLOUD_HOST.to_string(),
            collection: "DefaultCollection".to_string(),
            project: "DefaultProject".to_string(),
        }
    }
}

/// Turns the captured fragment into an absolute URL.
type Normalizer = fn(&str, &UrlDefaults) -> String;

/// One entry of the ordered matcher table.
struct UrlMatcher {
    name: &'static str,
    pattern: Regex,
    normalize: Normalizer,
}

/// A located URL plus the span of raw text it consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlMatch {
    /// Absolute URL after normalization.
    pub url: String,
    /// Name of the matcher that fired.
    pub matcher: &'static str,
    /// Byte offset in the raw text just past the matched fragment.
    pub end: usize,
}

/// Ordered-pattern URL locator and build-reference parser.
pub struct UrlParser {
    defaults: UrlDefaults,
    matchers: Vec<UrlMatcher>,
}

fn keep_absolute(fragment: &str, _: &UrlDefaults) -> String {
    fragment.to_string()
}

fn prefix_scheme(fragment: &str, _: &UrlDefaults) -> String {
    format!("https://{}", fragment)
}

fn prefix_default_host(fragment: &str, defaults: &UrlDefaults) -> String {
    format!("https://{}/{}", defaults.host, fragment)
}

fn expand_build_id(fragment: &str, defaults: &UrlDefaults) -> String {
    let layout = if defaults.is_cloud_hosted() { "" } else { "tfs/" };
    format!(
        "https://{}/{}{}/{}/_build/results?buildId={}",
        defaults.host, layout, defaults.collection, defaults.project, fragment
    )
}

impl UrlParser {
    pub fn new(defaults: UrlDefaults) -> Self {
        let host = regex::escape(&defaults.host);
        let mut matchers = vec![
            UrlMatcher {
                name: "absolute",
                pattern: compile(r"(?:^|\s)@?(https?://\S+)"),
                normalize: keep_absolute,
            },
            UrlMatcher {
                name: "known_host",
                pattern: compile(&format!(r"(?:^|\s)@?({}\S+)", host)),
                normalize: prefix_scheme,
            },
        ];
        // A `tfs/` path only has a home on an on-premises host.
        if !defaults.is_cloud_hosted() {
            matchers.push(UrlMatcher {
                name: "tfs_path",
                pattern: compile(r"(?:^|\s)@?(tfs/\S+)"),
                normalize: prefix_default_host,
            });
        }
        matchers.push(UrlMatcher {
            name: "build_id",
            pattern: compile(r"buildId=(\d+)"),
            normalize: expand_build_id,
        });
        Self { defaults, matchers }
    }

    pub fn defaults(&self) -> &UrlDefaults {
        &self.defaults
    }

    /// Find the first build URL in `text`, trying matchers in priority order.
    pub fn locate(&self, text: &str) -> Option<UrlMatch> {
        self.matchers.iter().find_map(|matcher| {
            let captures = matcher.pattern.captures(text)?;
            let fragment = captures.get(1)?;
            let url = (matcher.normalize)(fragment.as_str(), &self.defaults);
            tracing::debug!(
                "URL matched by '{}': {} -> {}",
                matcher.name,
                fragment.as_str(),
                url
            );
            Some(UrlMatch {
                url,
                matcher: matcher.name,
                end: fragment.end(),
            })
        })
    }

    /// Locate a URL in `text` and parse it into a [`BuildReference`].
    pub fn parse(&self, text: &str) -> Result<BuildReference, ParseFailure> {
        let found = self.locate(text).ok_or(ParseFailure::NoUrl)?;
        parse_build_url(&found.url)
    }
}

impl Default for UrlParser {
    fn default() -> Self {
        Self::new(UrlDefaults::default())
    }
}

fn compile(pattern: &str) -> Regex {
    // The only runtime input interpolated into a pattern is the host, and it is escaped.
    Regex::new(pattern).expect("URL matcher pattern is invalid")
}

fn capture(pattern: &Regex, url: &str) -> Option<String> {
    pattern
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Parse an absolute build URL.
///
/// `buildId=` is mandatory; everything else is best effort.
pub fn parse_build_url(url: &str) -> Result<BuildReference, ParseFailure> {
    tracing::info!("Parsing build URL: {}", url);

    let build_id = BUILD_ID
        .captures(url)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .ok_or_else(|| {
            tracing::warn!("Could not extract build ID from URL");
            ParseFailure::MissingBuildId {
                url: url.to_string(),
            }
        })?;

    let (system, base_url, project) = if url.to_lowercase().contains("tfs") {
        (
            CiSystem::Tfs,
            capture(&TFS_BASE, url),
            capture(&TFS_PROJECT, url),
        )
    } else {
        (
            CiSystem::CloudHosted,
            capture(&CLOUD_BASE, url),
            capture(&CLOUD_PROJECT, url),
        )
    };

    let reference = BuildReference {
        system,
        base_url,
        project,
        build_id,
        job_id: capture(&JOB_ID, url),
        task_id: capture(&TASK_ID, url),
    };

    tracing::info!(
        build_id = reference.build_id,
        project = ?reference.project,
        job_id = ?reference.job_id,
        task_id = ?reference.task_id,
        "Parsed build reference"
    );
    Ok(reference)
}
