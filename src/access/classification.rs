//! Classification registry: the fixed set of document security levels.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Document sensitivity, ordered lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Visible to every authenticated user.
    Public,
    /// Restricted to owners and supervisory roles.
    Confidential,
    /// Restricted to owners and administrators; always gated by OTP.
    Secret,
}

impl SecurityLevel {
    /// Every level, lowest first.
    pub const ALL: [SecurityLevel; 3] = [
        SecurityLevel::Public,
        SecurityLevel::Confidential,
        SecurityLevel::Secret,
    ];

    /// Stable lowercase identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            SecurityLevel::Public => "public",
            SecurityLevel::Confidential => "confidential",
            SecurityLevel::Secret => "secret",
        }
    }

    /// Whether this level is at least as sensitive as `other`.
    pub fn is_at_least(self, other: SecurityLevel) -> bool {
        self >= other
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string names no known security level.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown security level: {0}")]
pub struct UnknownSecurityLevel(pub String);

impl FromStr for SecurityLevel {
    type Err = UnknownSecurityLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" | "publico" => Ok(SecurityLevel::Public),
            "confidential" | "confidencial" => Ok(SecurityLevel::Confidential),
            "secret" | "secreto" => Ok(SecurityLevel::Secret),
            _ => Err(UnknownSecurityLevel(s.to_owned())),
        }
    }
}
