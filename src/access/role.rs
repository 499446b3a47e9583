//! Role registry: the fixed set of user roles and their relative authority.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// User role, ordered by authority.
///
/// The ordering holds for most rules, but Admin does not subsume every
/// Supervisor exemption: an Admin downloading someone else's Confidential
/// document still needs a step-up code while a Supervisor does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular account.
    User,
    /// Reviewer with read/edit access to Confidential material.
    Supervisor,
    /// Administrator with access to every level.
    Admin,
}

impl Role {
    /// Every role, lowest authority first.
    pub const ALL: [Role; 3] = [Role::User, Role::Supervisor, Role::Admin];

    /// Stable lowercase identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Supervisor => "supervisor",
            Role::Admin => "admin",
        }
    }

    /// Supervisor or Admin.
    pub fn is_supervisory(self) -> bool {
        matches!(self, Role::Supervisor | Role::Admin)
    }

    /// Exactly Admin.
    pub fn is_admin(self) -> bool {
        self == Role::Admin
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string names no known role.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" | "usuario" => Ok(Role::User),
            "supervisor" => Ok(Role::Supervisor),
            "admin" => Ok(Role::Admin),
            _ => Err(UnknownRole(s.to_owned())),
        }
    }
}
