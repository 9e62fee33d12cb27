//! # Stack Subcommand
//!
//! - `cairn stack ls [--project <p>]`
//! - `cairn stack init <stack> [--secrets-provider <provider>]`
//! - `cairn stack rm <stack> [--force]`
//! - `cairn stack rename <stack> <new-name>`

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use cairn_core::{Name, ProjectStack};
use cairn_secrets::validate_secrets_provider;
use cairn_state::{LocalBackend, StackSummary};

/// Arguments for `cairn stack`.
#[derive(Args, Debug)]
pub struct StackArgs {
    #[command(subcommand)]
    pub command: StackCommand,
}

/// Stack subcommands.
#[derive(Subcommand, Debug)]
pub enum StackCommand {
    /// List stacks.
    Ls {
        /// Only list stacks of this project.
        #[arg(long)]
        project: Option<String>,
    },
    /// Create an empty stack and set up its secrets provider.
    Init {
        /// Stack name: `stack`, `project/stack` or
        /// `organization/project/stack`.
        stack: String,

        /// Secrets provider: `passphrase`, `default`, or a KMS URL.
        #[arg(long)]
        secrets_provider: Option<String>,
    },
    /// Remove a stack. Its checkpoint is kept as a backup.
    Rm {
        /// Stack to remove.
        stack: String,

        /// Remove even if resources remain.
        #[arg(long, short)]
        force: bool,
    },
    /// Rename a stack.
    Rename {
        /// Stack to rename.
        stack: String,

        /// New name.
        new_name: String,
    },
}

/// Execute `cairn stack`.
pub async fn run_stack(args: &StackArgs, backend: &LocalBackend, project_dir: &Path) -> Result<u8> {
    match &args.command {
        StackCommand::Ls { project } => {
            let project = project
                .as_deref()
                .map(Name::parse_project)
                .transpose()
                .context("invalid --project")?;
            let stacks = backend.list_stacks(project.as_ref()).await?;
            print!("{}", format_stack_table(&stacks));
            Ok(0)
        }
        StackCommand::Init {
            stack,
            secrets_provider,
        } => {
            let reference = backend.parse_stack_reference(stack)?;
            if let Some(provider) = secrets_provider {
                validate_secrets_provider(provider)?;
            }
            let created = backend.create_stack(&reference).await?;

            let settings_path = ProjectStack::path_for(project_dir, reference.name().as_str());
            if let Some(provider) = secrets_provider {
                let mut settings = ProjectStack::load(&settings_path)?;
                settings.clear_secrets_provider();
                if provider != "passphrase" && provider != "default" {
                    settings.secrets_provider = provider.clone();
                }
                settings.save(&settings_path)?;
            }
            let manager = backend
                .stack_secrets_manager(&settings_path)
                .await
                .with_context(|| format!("configuring secrets for stack '{reference}'"))?;
            tracing::debug!(kind = manager.type_name(), "secrets manager ready");

            println!("Created stack '{}'", created.reference());
            Ok(0)
        }
        StackCommand::Rm { stack, force } => {
            let reference = backend.parse_stack_reference(stack)?;
            backend.remove_stack(&reference, *force).await?;
            println!("Stack '{reference}' has been removed!");
            Ok(0)
        }
        StackCommand::Rename { stack, new_name } => {
            let old = backend.parse_stack_reference(stack)?;
            let new = backend.parse_stack_reference(new_name)?;
            let renamed = backend.rename_stack(&old, &new).await?;
            println!("Renamed {old} to {renamed}");
            Ok(0)
        }
    }
}

/// Render stack summaries as an aligned table.
pub fn format_stack_table(stacks: &[StackSummary]) -> String {
    let rows: Vec<[String; 3]> = stacks
        .iter()
        .map(|s| {
            [
                s.name.to_string(),
                s.last_update
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_else(|| "n/a".to_string()),
                s.resource_count
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "n/a".to_string()),
            ]
        })
        .collect();
    let width = rows
        .iter()
        .map(|r| r[0].len())
        .chain(std::iter::once("NAME".len()))
        .max()
        .unwrap_or(4);
    let mut out = format!("{:<width$}  {:<23}  RESOURCE COUNT\n", "NAME", "LAST UPDATE");
    for [name, last, count] in rows {
        out.push_str(&format!("{name:<width$}  {last:<23}  {count}\n"));
    }
    out
}
