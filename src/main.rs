//! Punch CLI
//!
//! Command-line front end for one-shot checks and watch mode.

mod cli;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error + Send + Sync>> {
    let args = cli::Cli::parse();

    // Logs go to stderr so rendered results own stdout.
    let directive = format!("punch={}", args.log_level.as_str().to_ascii_lowercase());
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    cli::run(args).await
}
