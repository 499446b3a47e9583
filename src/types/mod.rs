//! Core value types shared by the evaluator, the OTP state machine and the
//! audit emitter.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::access::classification::SecurityLevel;
use crate::access::role::Role;

/// Identifier of an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub i64);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The actor requesting an action, as supplied by the identity collaborator.
///
/// The core trusts this value as already authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    /// Authenticated user id.
    pub id: UserId,
    /// Role assigned to the user.
    pub role: Role,
}

impl Principal {
    /// Build a principal from an id and role.
    pub fn new(id: UserId, role: Role) -> Self {
        Self { id, role }
    }

    /// Whether this principal owns the given document.
    pub fn owns(&self, document: &DocumentDescriptor) -> bool {
        document.owner_id == self.id
    }
}

/// Read-only projection of a document used for access decisions.
///
/// The full document record belongs to the storage collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentDescriptor {
    /// Document id.
    pub id: DocumentId,
    /// Owning user.
    pub owner_id: UserId,
    /// Classification of the document.
    pub security_level: SecurityLevel,
}

impl DocumentDescriptor {
    /// Build a descriptor.
    pub fn new(id: DocumentId, owner_id: UserId, security_level: SecurityLevel) -> Self {
        Self {
            id,
            owner_id,
            security_level,
        }
    }
}

/// Operation a principal may request on a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Open the document for reading.
    View,
    /// Fetch the underlying file.
    Download,
    /// Remove the document.
    Delete,
    /// Modify metadata or content.
    Edit,
}

impl Action {
    /// Every action, in table order.
    pub const ALL: [Action; 4] = [Action::View, Action::Download, Action::Delete, Action::Edit];

    /// Stable lowercase identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Download => "download",
            Action::Delete => "delete",
            Action::Edit => "edit",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string names no known action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown action: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "view" | "ver" => Ok(Action::View),
            "download" | "descargar" => Ok(Action::Download),
            "delete" | "eliminar" => Ok(Action::Delete),
            "edit" | "editar" => Ok(Action::Edit),
            _ => Err(UnknownAction(s.to_owned())),
        }
    }
}
