//! # State Subcommand
//!
//! `cairn state upgrade` moves every stack of a legacy state store into
//! the project layout. It stops at the first stack whose project cannot be
//! inferred; fix or remove that stack and run it again.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use cairn_state::{LocalBackend, ReferenceStore};

/// Arguments for `cairn state`.
#[derive(Args, Debug)]
pub struct StateArgs {
    #[command(subcommand)]
    pub command: StateCommand,
}

/// State subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommand {
    /// Migrate the state store to the project layout.
    Upgrade,
}

/// Execute `cairn state`.
pub async fn run_state(args: &StateArgs, backend: &LocalBackend) -> Result<u8> {
    match args.command {
        StateCommand::Upgrade => {
            if backend.store() == ReferenceStore::Project {
                println!("The state store at {} is already up to date.", backend.url());
                return Ok(0);
            }
            backend
                .upgrade()
                .await
                .with_context(|| format!("upgrading state store at {}", backend.url()))?;
            println!("Upgraded the state store at {}.", backend.url());
            Ok(0)
        }
    }
}
