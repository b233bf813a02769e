// Copyright (c) 2025-2026 the pipeline-doctor contributors
// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI argument parsing with environment variable support.
///
/// Environment variables follow the pattern `PIPELINE_DOCTOR_*` and are overridden by CLI flags.
/// Example: `PIPELINE_DOCTOR_PROVIDER=gemini` is overridden by `--provider openrouter`.
#[derive(Parser, Debug)]
#[command(name = "pipeline-doctor")]
#[command(about = "Diagnose failed CI builds from their URL and logs")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Config file path
    #[arg(short, long, global = true, env = "PIPELINE_DOCTOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP service
    Serve {
        /// Address to listen on
        #[arg(long, env = "PIPELINE_DOCTOR_BIND")]
        bind: Option<String>,
    },

    /// Analyze a build: a URL followed by an optional question
    Analyze {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,

        /// LLM provider
        #[arg(short, long, env = "PIPELINE_DOCTOR_PROVIDER")]
        provider: Option<String>,

        /// Model to use
        #[arg(short, long, env = "PIPELINE_DOCTOR_MODEL")]
        model: Option<String>,
    },

    /// Print the build reference found in the text as JSON
    Parse {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// List supported providers and their models
    Providers,
}

impl Args {
    /// Log level name for the `-v`/`-q` flags.
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

pub fn parse() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_joins_free_text() {
        let args = Args::try_parse_from([
            "pipeline-doctor",
            "analyze",
            "https://dev.azure.com/o/p/_build/results?buildId=1",
            "why",
            "did",
            "it",
            "fail?",
            "--provider",
            "gemini",
        ])
        .expect("should parse");
        match args.command {
            Command::Analyze { text, provider, .. } => {
                assert_eq!(text.len(), 5);
                assert_eq!(provider.as_deref(), Some("gemini"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_verbosity_levels() {
        let args = Args::try_parse_from(["pipeline-doctor", "-vv", "providers"]).expect("parse");
        assert_eq!(args.log_level(), "trace");
        let args = Args::try_parse_from(["pipeline-doctor", "providers", "-q"]).expect("parse");
        assert_eq!(args.log_level(), "warn");
    }

    #[test]
    fn test_serve_bind_flag() {
        let args = Args::try_parse_from(["pipeline-doctor", "serve", "--bind", "0.0.0.0:9000"])
            .expect("parse");
        assert!(matches!(
            args.command,
            Command::Serve { bind: Some(ref b) } if b == "0.0.0.0:9000"
        ));
    }
}
