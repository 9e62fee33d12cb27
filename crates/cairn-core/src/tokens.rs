//! # Names and URNs
//!
//! Newtype wrappers for the identifiers that address state in a bucket.
//! A [`Name`] is the validated form of a stack or project name; a [`Urn`]
//! identifies one resource inside a deployment and embeds the stack and
//! project that own it.
//!
//! ## Invariant
//!
//! A `Name` can only be produced through [`Name::parse`] (or
//! [`Name::parse_project`]), so any `Name` in hand is 1–100 characters of
//! `[A-Za-z0-9_.-]`. Storage paths are derived from names, which keeps
//! path separators out of every derived key.

use serde::{Deserialize, Serialize};

use crate::error::NameError;

/// Maximum length of a stack or project name.
pub const MAX_NAME_LENGTH: usize = 100;

/// URN scheme prefix for resources managed by Cairn.
pub const URN_PREFIX: &str = "urn:cairn:";

/// URN segment delimiter.
const URN_DELIMITER: &str = "::";

fn validate(kind: &'static str, value: &str) -> Result<(), NameError> {
    if value.is_empty() {
        return Err(NameError::Empty { kind });
    }
    if value.len() > MAX_NAME_LENGTH {
        return Err(NameError::TooLong {
            kind,
            max: MAX_NAME_LENGTH,
            value: value.to_string(),
        });
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(NameError::InvalidCharacter {
            kind,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Returns `true` if `value` is a syntactically valid name.
pub fn is_name(value: &str) -> bool {
    validate("stack", value).is_ok()
}

/// A validated stack or project name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Name(String);

impl Name {
    /// Parse a stack name.
    pub fn parse(value: &str) -> Result<Self, NameError> {
        validate("stack", value)?;
        Ok(Self(value.to_string()))
    }

    /// Parse a project name. Same grammar as a stack name, but errors
    /// report the value as a project name.
    pub fn parse_project(value: &str) -> Result<Self, NameError> {
        validate("project", value)?;
        Ok(Self(value.to_string()))
    }

    /// Return the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Name {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate("stack", &value)?;
        Ok(Self(value))
    }
}

impl From<Name> for String {
    fn from(name: Name) -> Self {
        name.0
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for Name {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Name {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// A resource URN: `urn:cairn:<stack>::<project>::<type>::<name>`.
///
/// Stored as the raw string so that documents written by other tools
/// round-trip unchanged; accessors parse on demand.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Urn(String);

impl Urn {
    /// Build a URN from its parts.
    pub fn new(stack: &str, project: &str, type_token: &str, name: &str) -> Self {
        Self(format!(
            "{URN_PREFIX}{stack}{URN_DELIMITER}{project}{URN_DELIMITER}{type_token}{URN_DELIMITER}{name}"
        ))
    }

    /// Parse and validate a URN string.
    pub fn parse(value: &str) -> Result<Self, NameError> {
        let urn = Self(value.to_string());
        urn.parts()?;
        Ok(urn)
    }

    fn parts(&self) -> Result<[&str; 4], NameError> {
        let rest = self
            .0
            .strip_prefix(URN_PREFIX)
            .ok_or_else(|| NameError::MalformedUrn(self.0.clone()))?;
        let mut split = rest.splitn(4, URN_DELIMITER);
        match (split.next(), split.next(), split.next(), split.next()) {
            (Some(stack), Some(project), Some(ty), Some(name)) => Ok([stack, project, ty, name]),
            _ => Err(NameError::MalformedUrn(self.0.clone())),
        }
    }

    /// The stack segment, or `None` if the URN is malformed.
    pub fn stack(&self) -> Option<&str> {
        self.parts().ok().map(|p| p[0])
    }

    /// The project segment, or `None` if the URN is malformed.
    pub fn project(&self) -> Option<&str> {
        self.parts().ok().map(|p| p[1])
    }

    /// The resource type token, or `None` if the URN is malformed.
    pub fn type_token(&self) -> Option<&str> {
        self.parts().ok().map(|p| p[2])
    }

    /// The resource name, or `None` if the URN is malformed.
    pub fn name(&self) -> Option<&str> {
        self.parts().ok().map(|p| p[3])
    }

    /// Return a copy of this URN with the stack (and optionally project)
    /// segment replaced.
    pub fn rename_stack(&self, stack: &str, project: Option<&str>) -> Result<Self, NameError> {
        let [_, old_project, ty, name] = self.parts()?;
        Ok(Self::new(stack, project.unwrap_or(old_project), ty, name))
    }

    /// Return the URN as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Urn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
