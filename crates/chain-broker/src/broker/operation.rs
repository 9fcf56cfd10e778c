//! Operation tokens handed back to callers for polling.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BrokerError;

/// Lifecycle operation a token refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationVerb {
    Provision,
    Deprovision,
}

impl OperationVerb {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Provision => "provision",
            Self::Deprovision => "deprovision",
        }
    }
}

impl fmt::Display for OperationVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `verb:name`, the only state the broker hands out.
///
/// The name is both the resource group and the deployment name, so a lost
/// token can be rebuilt from the instance id alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationToken {
    pub verb: OperationVerb,
    pub name: String,
}

impl OperationToken {
    pub fn provision(name: impl Into<String>) -> Self {
        Self {
            verb: OperationVerb::Provision,
            name: name.into(),
        }
    }

    pub fn deprovision(name: impl Into<String>) -> Self {
        Self {
            verb: OperationVerb::Deprovision,
            name: name.into(),
        }
    }
}

impl fmt::Display for OperationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.verb, self.name)
    }
}

/// Longest resource group name the provider accepts.
pub const MAX_INSTANCE_ID_LEN: usize = 90;

/// Whether `name` is a legal resource group name: 1-90 letters, digits,
/// `-`, `_`, `.`, `(` or `)`, not ending in `.`.
#[must_use]
pub fn is_valid_instance_id(name: &str) -> bool {
    !name.is_empty()
        && name.chars().count() <= MAX_INSTANCE_ID_LEN
        && !name.ends_with('.')
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '(' | ')'))
}

/// Reject ids that cannot name a resource group.
///
/// # Errors
/// [`BrokerError::InvalidInstanceId`] when [`is_valid_instance_id`] fails.
pub fn validate_instance_id(instance_id: &str) -> Result<(), BrokerError> {
    if is_valid_instance_id(instance_id) {
        Ok(())
    } else {
        Err(BrokerError::InvalidInstanceId(instance_id.to_string()))
    }
}

impl FromStr for OperationToken {
    type Err = BrokerError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let malformed = || BrokerError::MalformedToken(raw.to_string());

        // Exactly one colon; the name must itself be a usable group name.
        let (verb, name) = raw.split_once(':').ok_or_else(malformed)?;
        if !is_valid_instance_id(name) {
            return Err(malformed());
        }
        let verb = match verb {
            "provision" => OperationVerb::Provision,
            "deprovision" => OperationVerb::Deprovision,
            _ => return Err(malformed()),
        };

        Ok(Self {
            verb,
            name: name.to_string(),
        })
    }
}

impl Serialize for OperationToken {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
