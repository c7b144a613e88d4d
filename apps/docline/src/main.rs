//! # Docline
//!
//! Command-line front end for the docline lineage engine.
//!
//! ## Usage
//!
//! ```bash
//! docline init -B redb -D lineage.redb
//! docline add report.xlsx --meta '{"owner": "finance"}'
//! docline add report.csv
//! docline derive report.xlsx report.csv -t conversion -p sheet=1
//! docline chain report.csv
//! docline migrate report.csv --to 2 --set owner=\"ops\"
//! ```
//!
//! Logs go to stderr. `DOCLINE_LOG_FORMAT=json` switches them to JSON lines
//! and `RUST_LOG` overrides the default filter.

use clap::Parser;
use docline::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = cli::execute(cli) {
        tracing::error!(kind = e.kind(), retryable = e.is_retryable(), "Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let log_format = std::env::var("DOCLINE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let default_filter = if verbose {
        "docline=debug,docline_core=debug"
    } else {
        "docline=info,docline_core=warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
