//! Names for resource classes and mutation operations.

use crate::constants::KEY_SEPARATOR;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

/// A category of upstream data sharing one cache policy
/// (e.g. `accounts`, `instruments`, `kill-switch`).
///
/// Names are non-empty, contain no whitespace and never contain the
/// scoped-key separator, so a class prefix can never match keys of
/// another class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceClass(pub(crate) String);

impl ResourceClass {
    /// Validate and wrap a class name.
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "resource_class".to_string(),
                value: name,
                reason: "must not be empty".to_string(),
            });
        }
        if name.contains(KEY_SEPARATOR) || name.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidValue {
                field: "resource_class".to_string(),
                value: name,
                reason: format!("must not contain whitespace or '{}'", KEY_SEPARATOR),
            });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ResourceClass {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl FromStr for ResourceClass {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ResourceClass {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ResourceClass> for String {
    fn from(class: ResourceClass) -> Self {
        class.0
    }
}

/// Name of an upstream write (e.g. `account.update`) that may invalidate
/// cached resource classes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationOp(String);

impl MutationOp {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MutationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MutationOp {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Borrow<str> for MutationOp {
    fn borrow(&self) -> &str {
        &self.0
    }
}
