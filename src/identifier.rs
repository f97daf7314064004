//! Human-readable statement identifiers.
//!
//! Identifiers are dot-separated names (`group.lemma_2`). Each component
//! starts with a letter or underscore; the leading components act as a
//! namespace for display and lookup purposes only.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::NamingError;

static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_']*(\.[A-Za-z_][A-Za-z0-9_']*)*$").unwrap()
});

/// A validated statement identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Validate and wrap an identifier.
    pub fn new(raw: impl Into<String>) -> Result<Self, NamingError> {
        let raw = raw.into();
        if IDENTIFIER_RE.is_match(&raw) {
            Ok(Identifier(raw))
        } else {
            Err(NamingError::InvalidIdentifier { identifier: raw })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespace components, excluding the final name.
    pub fn namespace(&self) -> impl Iterator<Item = &str> {
        let mut parts: Vec<&str> = self.0.split('.').collect();
        parts.pop();
        parts.into_iter()
    }

    /// The final component.
    pub fn name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Identifier {
    type Err = NamingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Identifier::new(s)
    }
}
