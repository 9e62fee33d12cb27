//! # Error Types
//!
//! Errors raised by the foundational types. All errors use `thiserror`
//! for derive-based `Display` and `Error` implementations; higher crates
//! wrap them with `#[from]` conversions.

use thiserror::Error;

/// Top-level error type for `cairn-core`.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A stack, project, or URN failed syntax validation.
    #[error(transparent)]
    InvalidName(#[from] NameError),

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML encoding or decoding failed.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// An export envelope carried a deployment version this build cannot read.
    #[error("unsupported deployment version {0}; expected 1..=3")]
    UnsupportedDeploymentVersion(u32),

    /// IO error while reading or writing a settings file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A name failed validation.
///
/// The message always names the offending value so that user-visible
/// failures identify the concrete input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    /// The name was empty.
    #[error("{kind} name may not be empty")]
    Empty {
        /// What kind of name was being validated ("stack", "project").
        kind: &'static str,
    },

    /// The name exceeded the maximum length.
    #[error("{kind} names are limited to {max} characters: {value:?}")]
    TooLong {
        /// What kind of name was being validated.
        kind: &'static str,
        /// The maximum permitted length.
        max: usize,
        /// The rejected value.
        value: String,
    },

    /// The name contained a character outside `[A-Za-z0-9_.-]`.
    #[error("{kind} names may only contain alphanumerics, hyphens, underscores, and periods: {value:?}")]
    InvalidCharacter {
        /// What kind of name was being validated.
        kind: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A URN did not have the `urn:cairn:<stack>::<project>::<type>::<name>` shape.
    #[error("malformed URN: {0:?}")]
    MalformedUrn(String),
}
