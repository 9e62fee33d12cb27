//! # Cancel Subcommand
//!
//! `cairn cancel <stack>` deletes every lock marker of a stack, including
//! ones held by running processes. Running it again is harmless.

use anyhow::Result;
use clap::Args;

use cairn_state::LocalBackend;

/// Arguments for `cairn cancel`.
#[derive(Args, Debug)]
pub struct CancelArgs {
    /// Stack whose update to cancel.
    pub stack: String,
}

/// Execute `cairn cancel`.
pub async fn run_cancel(args: &CancelArgs, backend: &LocalBackend) -> Result<u8> {
    let reference = backend.parse_stack_reference(&args.stack)?;
    backend.cancel_current_update(&reference).await?;
    println!("The currently running update for '{reference}' has been canceled!");
    Ok(0)
}
