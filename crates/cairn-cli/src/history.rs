//! # History Subcommand
//!
//! `cairn history <stack> [--page-size N] [--page N] [--json]`

use anyhow::Result;
use chrono::{TimeZone, Utc};
use clap::Args;

use cairn_core::{UpdateInfo, UpdateResult};
use cairn_state::LocalBackend;

/// Arguments for `cairn history`.
#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Stack whose history to show.
    pub stack: String,

    /// Records per page; 0 shows everything.
    #[arg(long, default_value_t = 0)]
    pub page_size: usize,

    /// Page to show, counting from 1.
    #[arg(long, default_value_t = 1)]
    pub page: usize,

    /// Print the records as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Execute `cairn history`.
pub async fn run_history(args: &HistoryArgs, backend: &LocalBackend) -> Result<u8> {
    let reference = backend.parse_stack_reference(&args.stack)?;
    let updates = backend
        .get_history(&reference, args.page_size, args.page)
        .await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&updates)?);
        return Ok(0);
    }
    if updates.is_empty() {
        println!("Stack '{reference}' has no updates");
        return Ok(0);
    }
    for update in &updates {
        println!("{}", format_update(update));
    }
    Ok(0)
}

fn format_time(unix: i64) -> String {
    Utc.timestamp_opt(unix, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| unix.to_string())
}

/// One-line summary of an update record.
pub fn format_update(update: &UpdateInfo) -> String {
    let result = match update.result {
        UpdateResult::Succeeded => "succeeded",
        UpdateResult::Failed => "failed",
    };
    let changes: Vec<String> = update
        .resource_changes
        .iter()
        .map(|(op, n)| format!("{op}={n}"))
        .collect();
    let mut line = format!(
        "{} {} {result} ({}s)",
        format_time(update.start_time),
        update.kind,
        update.end_time.saturating_sub(update.start_time),
    );
    if !changes.is_empty() {
        line.push_str(&format!(" [{}]", changes.join(", ")));
    }
    if !update.message.is_empty() {
        line.push_str(&format!(": {}", update.message));
    }
    line
}
