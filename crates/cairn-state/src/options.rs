//! Backend construction options.

use std::sync::Arc;

use cairn_core::env::{env_flag, GZIP_ENV_VAR};
use cairn_core::Name;
use cairn_secrets::SecretsProvider;
use cairn_storage::{BucketMux, BucketOpener};

/// Options for [`crate::LocalBackend::new`].
#[derive(Debug, Default)]
pub struct BackendOptions {
    /// Compress checkpoints and history written from now on.
    pub gzip: bool,
    /// Project whose stacks render without qualification.
    pub current_project: Option<Name>,
    /// URL scheme registry used to open the state bucket.
    pub mux: BucketMux,
    /// Constructs secrets managers for stacks.
    pub secrets: SecretsProvider,
}

impl BackendOptions {
    /// Options from the process environment: gzip from
    /// `CAIRN_SELF_MANAGED_STATE_GZIP`, everything else default.
    pub fn from_env() -> Self {
        Self {
            gzip: env_flag(GZIP_ENV_VAR),
            ..Self::default()
        }
    }

    /// Set the current project.
    pub fn with_current_project(mut self, project: Option<Name>) -> Self {
        self.current_project = project;
        self
    }

    /// Set the gzip toggle.
    pub fn with_gzip(mut self, gzip: bool) -> Self {
        self.gzip = gzip;
        self
    }

    /// Serve `scheme://` URLs with `opener`.
    pub fn with_bucket_opener(mut self, scheme: &str, opener: Arc<dyn BucketOpener>) -> Self {
        self.mux.register(scheme, opener);
        self
    }

    /// Use `secrets` to build secrets managers.
    pub fn with_secrets(mut self, secrets: SecretsProvider) -> Self {
        self.secrets = secrets;
        self
    }
}
