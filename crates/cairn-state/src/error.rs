//! # Backend Error Types
//!
//! Every failure a backend operation can report. Messages name the stack
//! and the condition. Storage errors propagate unchanged except where a
//! missing object is meaningful ("never deployed", "no history"), in which
//! case callers match on [`BucketError::is_not_found`] before converting.

use cairn_core::{CoreError, NameError, ResourceChanges};
use cairn_secrets::SecretsError;
use cairn_storage::BucketError;
use thiserror::Error;

/// Errors from the state backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// No such stack.
    #[error("no stack named '{stack}' found")]
    NotFound {
        /// Rendered stack reference.
        stack: String,
    },

    /// A stack with this name already exists.
    #[error("stack '{stack}' already exists")]
    AlreadyExists {
        /// Rendered stack reference.
        stack: String,
    },

    /// Another process holds the stack lock.
    #[error(
        "the stack '{stack}' is currently locked by {count} lock(s). Either wait for the other \
         process(es) to end or delete the lock file with `cairn cancel`.{details}"
    )]
    Locked {
        /// Rendered stack reference.
        stack: String,
        /// Number of foreign lock markers found.
        count: usize,
        /// One line per marker describing its holder.
        details: String,
    },

    /// A stack or project name failed validation.
    #[error(transparent)]
    InvalidName(#[from] NameError),

    /// A stack reference is syntactically valid but not usable here.
    #[error("invalid stack reference '{reference}': {reason}")]
    InvalidReference {
        /// The rejected reference text.
        reference: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The stack's project contradicts the current project.
    #[error("provided project name '{project}' doesn't match the current project '{current}'")]
    ProjectMismatch {
        /// Project named by the stack reference.
        project: String,
        /// The current project.
        current: String,
    },

    /// The layout manifest names a version this build cannot read.
    #[error(
        "state store unsupported: layout version ({0}) is not supported by this version of cairn"
    )]
    UnsupportedLayoutVersion(u32),

    /// The checkpoint format version is newer than this build supports.
    #[error("checkpoint for '{stack}' has unsupported version {version}")]
    UnsupportedCheckpointVersion {
        /// Rendered stack reference.
        stack: String,
        /// Version found.
        version: u32,
    },

    /// Layout migration stopped at a stack whose project cannot be inferred.
    #[error("no project found for stack {stack}")]
    MigrationIncomplete {
        /// Rendered stack reference.
        stack: String,
    },

    /// Removal refused because resources remain.
    #[error("refusing to remove stack '{stack}' because it still contains resources")]
    HasResources {
        /// Rendered stack reference.
        stack: String,
    },

    /// The stack has no history to take configuration from.
    #[error("no previous deployment")]
    NoPreviousDeployment,

    /// The deployment engine reported failure.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A background task of the apply pipeline panicked or was aborted.
    #[error("apply task failed: {0}")]
    Task(String),

    /// Secrets manager failure (includes malformed ciphertext and decrypt
    /// failures).
    #[error(transparent)]
    Secrets(#[from] SecretsError),

    /// Storage failure.
    #[error(transparent)]
    Bucket(#[from] BucketError),

    /// Document or settings failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// JSON encoding failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML encoding failure.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Local I/O failure (compression).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A failure annotated with what was being attempted.
    #[error("{context}: {source}")]
    Context {
        /// What was being attempted.
        context: String,
        /// Underlying failure.
        #[source]
        source: Box<BackendError>,
    },
}

impl BackendError {
    /// Annotate with what was being attempted.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through [`BackendError::Context`].
    pub fn root(&self) -> &BackendError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the root cause is a missing stack or object.
    pub fn is_not_found(&self) -> bool {
        match self.root() {
            Self::NotFound { .. } => true,
            Self::Bucket(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Whether the root cause is a held lock.
    pub fn is_locked(&self) -> bool {
        matches!(self.root(), Self::Locked { .. })
    }

    /// Whether the root cause is an unreadable or undecryptable secret.
    pub fn is_ciphertext_error(&self) -> bool {
        matches!(self.root(), Self::Secrets(e) if e.is_ciphertext_error())
    }
}

/// Failure reported by the deployment engine. Carries the changes that
/// were applied before the failure.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct EngineError {
    /// Failure description.
    pub message: String,
    /// Changes applied before the failure.
    pub changes: ResourceChanges,
}

impl EngineError {
    /// An engine failure with no recorded changes.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            changes: ResourceChanges::new(),
        }
    }
}
