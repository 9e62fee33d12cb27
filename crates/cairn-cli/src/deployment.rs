//! # Export and Import Subcommands
//!
//! - `cairn export <stack> [--file <path>]` writes the `{version,
//!   deployment}` envelope to a file or stdout.
//! - `cairn import <stack> --file <path>` replaces the stack's latest
//!   deployment with an envelope.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use cairn_core::UntypedDeployment;
use cairn_state::LocalBackend;

/// Arguments for `cairn export`.
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Stack to export.
    pub stack: String,

    /// Write to this file instead of stdout.
    #[arg(long)]
    pub file: Option<PathBuf>,
}

/// Arguments for `cairn import`.
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Stack to import into.
    pub stack: String,

    /// Envelope file to read.
    #[arg(long)]
    pub file: PathBuf,
}

/// Execute `cairn export`.
pub async fn run_export(args: &ExportArgs, backend: &LocalBackend) -> Result<u8> {
    let reference = backend.parse_stack_reference(&args.stack)?;
    let envelope = backend.export_deployment(&reference).await?;
    let json = serde_json::to_string_pretty(&envelope)?;
    match &args.file {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            tracing::info!(stack = %reference, path = %path.display(), "exported deployment");
        }
        None => println!("{json}"),
    }
    Ok(0)
}

/// Execute `cairn import`.
pub async fn run_import(args: &ImportArgs, backend: &LocalBackend) -> Result<u8> {
    let reference = backend.parse_stack_reference(&args.stack)?;
    let bytes =
        std::fs::read(&args.file).with_context(|| format!("reading {}", args.file.display()))?;
    let envelope: UntypedDeployment = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing {}", args.file.display()))?;
    backend.import_deployment(&reference, envelope).await?;
    println!("Import complete.");
    Ok(0)
}
