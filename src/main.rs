// Copyright (c) 2025-2026 the pipeline-doctor contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use pipeline_doctor::utils::error::DoctorError;
use pipeline_doctor::{cli, run};

#[tokio::main]
async fn main() {
    // Determine verbose mode early; errors can happen before clap runs.
    let verbose = std::env::args().any(|arg| arg.starts_with("-v"));

    if let Err(e) = run_main().await {
        display_error(&e, verbose);
        std::process::exit(1);
    }
}

/// Display an error with its cause chain.
fn display_error(error: &anyhow::Error, verbose: bool) {
    if let Some(DoctorError::ValidationError {
        message,
        suggestion,
    }) = error.downcast_ref::<DoctorError>()
    {
        eprintln!("\n\u{26a0} {}\n  \u{2192} {}", message, suggestion);
        return;
    }

    eprintln!("\n\u{26a0} Error: {}", error);

    let causes: Vec<_> = error.chain().skip(1).collect();
    if !causes.is_empty() {
        eprintln!("\nCaused by:");
        for (i, cause) in causes.iter().enumerate() {
            let prefix = if i == causes.len() - 1 {
                "\u{2514}\u{2500}"
            } else {
                "\u{251c}\u{2500}"
            };
            eprintln!("{} {}", prefix, cause);
        }
    }

    if verbose {
        let backtrace = error.backtrace();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            eprintln!("\nBacktrace:\n{}", backtrace);
        }
    }
}

async fn run_main() -> Result<()> {
    let args = cli::args::parse();
    pipeline_doctor::init_logging(args.log_level());
    run(args).await
}
