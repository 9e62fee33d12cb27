//! # cairn CLI entry point
//!
//! Parses command-line arguments, opens the state backend and dispatches
//! to subcommand handlers.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cairn_cli::cancel::{run_cancel, CancelArgs};
use cairn_cli::deployment::{run_export, run_import, ExportArgs, ImportArgs};
use cairn_cli::history::{run_history, HistoryArgs};
use cairn_cli::stack::{run_stack, StackArgs};
use cairn_cli::state::{run_state, StateArgs};
use cairn_cli::{backend_url, open_backend};

/// Self-managed infrastructure state.
///
/// Stores stack checkpoints, update history and backups in a local
/// directory or an object-store bucket.
#[derive(Parser, Debug)]
#[command(name = "cairn", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// State URL, e.g. `file://~` or `file:///srv/state`.
    #[arg(long, global = true)]
    backend_url: Option<String>,

    /// Directory holding `Cairn.yaml`. Defaults to the working directory.
    #[arg(long, global = true)]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage stacks (ls, init, rm, rename).
    Stack(StackArgs),

    /// Show the update history of a stack.
    History(HistoryArgs),

    /// Export a stack's latest deployment.
    Export(ExportArgs),

    /// Replace a stack's latest deployment.
    Import(ImportArgs),

    /// Cancel the running update of a stack by removing its locks.
    Cancel(CancelArgs),

    /// State store maintenance.
    State(StateArgs),
}

fn init_tracing(verbose: u8, json: bool) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let project_dir = cli
        .cwd
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let url = backend_url(cli.backend_url.as_deref());
    tracing::debug!(url = %url, project_dir = %project_dir.display(), "starting");

    let backend = match open_backend(&url, &project_dir).await {
        Ok(backend) => backend,
        Err(e) => {
            tracing::error!("{e:#}");
            return ExitCode::from(1);
        }
    };

    let result = match &cli.command {
        Commands::Stack(args) => run_stack(args, &backend, &project_dir).await,
        Commands::History(args) => run_history(args, &backend).await,
        Commands::Export(args) => run_export(args, &backend).await,
        Commands::Import(args) => run_import(args, &backend).await,
        Commands::Cancel(args) => run_cancel(args, &backend).await,
        Commands::State(args) => run_state(args, &backend).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}
