//! # cairn-cli — Command-Line Interface for Self-Managed State
//!
//! Provides the `cairn` binary. Argument parsing lives next to each
//! handler; handlers delegate to `cairn-state` and only format output.
//!
//! ## Subcommands
//!
//! - `cairn stack ls|init|rm|rename`: stack lifecycle.
//! - `cairn history <stack>`: update records, newest first.
//! - `cairn export <stack>` / `cairn import <stack>`: deployment envelopes.
//! - `cairn cancel <stack>`: force-release a stack lock.
//! - `cairn state upgrade`: migrate a legacy state store.
//!
//! ## Backend Selection
//!
//! The state URL comes from `--backend-url`, then `CAIRN_BACKEND_URL`,
//! then `file://~`. The current project is read from `Cairn.yaml` in the
//! working directory when present.

pub mod cancel;
pub mod deployment;
pub mod history;
pub mod stack;
pub mod state;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use cairn_core::project::PROJECT_FILE;
use cairn_core::{Name, Project};
use cairn_secrets::{EnvPassphrase, KeyServiceRegistry, SecretsProvider};
use cairn_state::{BackendOptions, LocalBackend};

/// Environment variable naming the state URL.
pub const BACKEND_URL_ENV_VAR: &str = "CAIRN_BACKEND_URL";

/// State URL used when none is configured.
pub const DEFAULT_BACKEND_URL: &str = "file://~";

/// Resolve the state URL from a flag, the environment, or the default.
pub fn backend_url(flag: Option<&str>) -> String {
    flag.map(str::to_string)
        .or_else(|| {
            std::env::var(BACKEND_URL_ENV_VAR)
                .ok()
                .filter(|v| !v.is_empty())
        })
        .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string())
}

/// The project defined in `dir`, if it has a `Cairn.yaml`.
pub fn current_project(dir: &Path) -> Result<Option<Name>> {
    if !dir.join(PROJECT_FILE).is_file() {
        return Ok(None);
    }
    let project = Project::load(dir)
        .with_context(|| format!("loading {}", dir.join(PROJECT_FILE).display()))?;
    Ok(Some(project.name))
}

/// Open the backend at `url` for the project in `project_dir`.
pub async fn open_backend(url: &str, project_dir: &Path) -> Result<LocalBackend> {
    let secrets = SecretsProvider::new(
        KeyServiceRegistry::default(),
        Arc::new(EnvPassphrase { interactive: true }),
    );
    let opts = BackendOptions::from_env()
        .with_current_project(current_project(project_dir)?)
        .with_secrets(secrets);
    LocalBackend::new(url, opts)
        .await
        .with_context(|| format!("opening state backend at {url}"))
}
