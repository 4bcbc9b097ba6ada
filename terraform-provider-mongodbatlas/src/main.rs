//! Terraform Provider for MongoDB Atlas
//!
//! Speaks line-delimited JSON-RPC on stdin/stdout with Terraform and manages
//! `mongodbatlas_cluster` resources.

use anyhow::Context;
use clap::Parser;
use std::io::{self, BufRead, Write};
use terraform_provider_mongodbatlas::logging::LoggingConfig;
use terraform_provider_mongodbatlas::MongoDbAtlasProvider;

/// Terraform Provider for MongoDB Atlas
#[derive(Parser, Debug)]
#[command(name = "terraform-provider-mongodbatlas")]
#[command(about = "Terraform provider for MongoDB Atlas clusters")]
struct Args {
    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Log level, as set by Terraform
    #[arg(long, env = "TF_LOG")]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    LoggingConfig::from_flags(args.debug, args.log_level.as_deref(), args.log_json)
        .init()
        .context("failed to initialize logging")?;

    tracing::info!("Starting Terraform Provider for MongoDB Atlas");

    let provider = MongoDbAtlasProvider::new().context("failed to create Tokio runtime")?;

    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();

    for line in stdin.lock().lines() {
        let input = line.context("failed to read request")?;
        if input.trim().is_empty() {
            continue;
        }

        let response = provider.handle_request(&input);
        writeln!(stdout, "{}", response).context("failed to write response")?;
        stdout.flush().context("failed to flush stdout")?;
    }

    tracing::info!("Terraform Provider shutting down");
    Ok(())
}
