//! Gemini Server
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                    GEMINI SERVER                     │
//!                    │                                                      │
//!   TLS request line │  ┌─────────┐   ┌──────────┐   ┌─────────────────┐   │
//!   ─────────────────┼─▶│   net   │──▶│  gemini  │──▶│    security     │   │
//!                    │  │listener │   │ handler  │   │ rate limit, 6x, │   │
//!                    │  │  + tls  │   │          │   │ path guard      │   │
//!                    │  └─────────┘   └────┬─────┘   └─────────────────┘   │
//!                    │                     │                                │
//!                    │          ┌──────────┴──────────┐                     │
//!                    │          ▼                     ▼                     │
//!                    │  ┌──────────────┐     ┌────────────────┐            │
//!                    │  │   routing    │     │ static files,  │            │
//!                    │  │ redirects,   │────▶│ listings, MIME │            │
//!                    │  │ CGI / SCGI   │     └────────────────┘            │
//!                    │  └──────────────┘                                    │
//!   status + body    │                                                      │
//!   ◀────────────────┼── response.rs ── one access log entry per connection │
//!                    │                                                      │
//!                    │  Cross-cutting: config (+ overlays), observability,  │
//!                    │                 lifecycle (startup, signals)         │
//!                    └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use gemini_server::config::load_config;
use gemini_server::lifecycle;
use gemini_server::observability::logging;

#[derive(Parser)]
#[command(name = "gemini-server", version)]
#[command(about = "Serve a document tree over the Gemini protocol", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "/etc/gemini-server.toml")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };

    if cli.check {
        println!("{}: configuration OK", cli.config.display());
        return ExitCode::SUCCESS;
    }

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("Failed to open error log: {e}");
        return ExitCode::FAILURE;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "gemini-server starting"
    );

    match lifecycle::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            ExitCode::FAILURE
        }
    }
}
