//! Permission evaluator: maps (role, ownership, action, level) to a decision.
//!
//! Evaluation runs in two stages. The base check decides whether the principal
//! may perform the action at all; only a permitted action reaches the step-up
//! stage, which decides whether an OTP challenge must be passed first. Both
//! stages are pure functions over the enumerated registries.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::access::classification::SecurityLevel;
use crate::access::role::Role;
use crate::types::{Action, DocumentDescriptor, DocumentId, Principal, UserId};

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Why a decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "role")]
pub enum DecisionReason {
    /// The level is open to every authenticated user for this action.
    OpenToAll,
    /// The principal owns the document.
    Owner,
    /// The principal's role grants the action at this level.
    RoleGrant(Role),
    /// Neither ownership nor role grants the action.
    NotAuthorized,
    /// The principal may create documents at the requested level.
    CreationPermitted,
    /// The principal's role may not create documents at the requested level.
    CreationRestricted,
}

impl DecisionReason {
    /// Stable machine-readable code.
    pub fn code(self) -> &'static str {
        match self {
            DecisionReason::OpenToAll => "OPEN_TO_ALL",
            DecisionReason::Owner => "OWNER",
            DecisionReason::RoleGrant(_) => "ROLE_GRANT",
            DecisionReason::NotAuthorized => "NOT_AUTHORIZED",
            DecisionReason::CreationPermitted => "CREATION_PERMITTED",
            DecisionReason::CreationRestricted => "CREATION_RESTRICTED",
        }
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionReason::OpenToAll => f.write_str("level is open to all users"),
            DecisionReason::Owner => f.write_str("principal owns the document"),
            DecisionReason::RoleGrant(role) => write!(f, "granted to role {role}"),
            DecisionReason::NotAuthorized => {
                f.write_str("principal is neither the owner nor in an authorized role")
            }
            DecisionReason::CreationPermitted => f.write_str("role may create at this level"),
            DecisionReason::CreationRestricted => {
                f.write_str("role may not create documents at this level")
            }
        }
    }
}

/// Three-way summary of a [`Decision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    /// Not permitted; no OTP prompt.
    Denied,
    /// Permitted without step-up.
    Allowed,
    /// Permitted only after a verified OTP challenge.
    AllowedWithOtp,
}

/// Output of the evaluator. Computed fresh per request and never persisted.
///
/// A decision with `otp_required` set is not a terminal permission: the
/// caller must obtain a verified challenge before executing the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the base role/ownership check passed.
    pub permitted: bool,
    /// Whether a verified OTP challenge is required before executing.
    pub otp_required: bool,
    /// Basis of the decision.
    pub reason: DecisionReason,
}

impl Decision {
    fn deny(reason: DecisionReason) -> Self {
        Self {
            permitted: false,
            otp_required: false,
            reason,
        }
    }

    fn allow(reason: DecisionReason, otp_required: bool) -> Self {
        Self {
            permitted: true,
            otp_required,
            reason,
        }
    }

    /// Collapse into the three-way outcome.
    pub fn outcome(&self) -> DecisionOutcome {
        match (self.permitted, self.otp_required) {
            (false, _) => DecisionOutcome::Denied,
            (true, false) => DecisionOutcome::Allowed,
            (true, true) => DecisionOutcome::AllowedWithOtp,
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Decide whether `principal` may perform `action` on `document`.
///
/// Pure function of its inputs: calling it twice with the same arguments
/// yields the same decision.
pub fn evaluate(principal: &Principal, document: &DocumentDescriptor, action: Action) -> Decision {
    match grant_basis(principal, document, action) {
        Some(reason) => Decision::allow(reason, requires_step_up(principal, document, action)),
        None => Decision::deny(DecisionReason::NotAuthorized),
    }
}

/// Base authorization check. Returns the grant basis, or `None` to deny.
fn grant_basis(
    principal: &Principal,
    document: &DocumentDescriptor,
    action: Action,
) -> Option<DecisionReason> {
    let role = principal.role;
    match (action, document.security_level) {
        (Action::View | Action::Download, SecurityLevel::Public) => {
            Some(DecisionReason::OpenToAll)
        }
        (Action::Delete, SecurityLevel::Public) => {
            owner_or_role(principal, document, role.is_admin())
        }
        (Action::Edit, SecurityLevel::Public) | (_, SecurityLevel::Confidential) => {
            owner_or_role(principal, document, role.is_supervisory())
        }
        (_, SecurityLevel::Secret) => owner_or_role(principal, document, role.is_admin()),
    }
}

fn owner_or_role(
    principal: &Principal,
    document: &DocumentDescriptor,
    role_grants: bool,
) -> Option<DecisionReason> {
    if principal.owns(document) {
        Some(DecisionReason::Owner)
    } else if role_grants {
        Some(DecisionReason::RoleGrant(principal.role))
    } else {
        None
    }
}

/// Step-up check, only consulted for already-permitted actions.
///
/// Ownership is deliberately absent from every rule except Confidential
/// downloads: owning a Secret document never waives the code.
fn requires_step_up(principal: &Principal, document: &DocumentDescriptor, action: Action) -> bool {
    match (action, document.security_level) {
        (_, SecurityLevel::Secret) => true,
        (Action::View, _) => false,
        (Action::Download, SecurityLevel::Public) => false,
        (Action::Download, SecurityLevel::Confidential) => {
            principal.role.is_admin() && !principal.owns(document)
        }
        (Action::Delete, _) => true,
        (Action::Edit, SecurityLevel::Public) => false,
        (Action::Edit, SecurityLevel::Confidential) => true,
    }
}

/// Decide whether `principal` may create a document at `level`.
///
/// Users may create Public and Confidential documents; Secret documents
/// require a supervisory role. Creation never requires step-up.
pub fn evaluate_creation(principal: &Principal, level: SecurityLevel) -> Decision {
    let allowed = match level {
        SecurityLevel::Public | SecurityLevel::Confidential => true,
        SecurityLevel::Secret => principal.role.is_supervisory(),
    };
    if allowed {
        Decision::allow(DecisionReason::CreationPermitted, false)
    } else {
        Decision::deny(DecisionReason::CreationRestricted)
    }
}

/// Decide whether `principal` may move `document` to `new_level`.
///
/// Reclassifying is an edit of the existing document that must also satisfy
/// the creation rule for the target level. Step-up follows the edit rule.
pub fn evaluate_reclassification(
    principal: &Principal,
    document: &DocumentDescriptor,
    new_level: SecurityLevel,
) -> Decision {
    let edit = evaluate(principal, document, Action::Edit);
    if !edit.permitted {
        return edit;
    }
    let create = evaluate_creation(principal, new_level);
    if !create.permitted {
        return create;
    }
    edit
}

/// Filter `documents` down to the ones `principal` may view.
///
/// Documents that need a step-up to open are still listed.
pub fn visible_to<'a, I>(
    principal: Principal,
    documents: I,
) -> impl Iterator<Item = &'a DocumentDescriptor> + 'a
where
    I: IntoIterator<Item = &'a DocumentDescriptor>,
    I::IntoIter: 'a,
{
    documents
        .into_iter()
        .filter(move |doc| evaluate(&principal, doc, Action::View).permitted)
}

// ---------------------------------------------------------------------------
// Decision matrix
// ---------------------------------------------------------------------------

/// One row of the full decision table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatrixRow {
    /// Actor role.
    pub role: Role,
    /// Whether the actor owns the document.
    pub owner: bool,
    /// Document level.
    pub level: SecurityLevel,
    /// Requested action.
    pub action: Action,
    /// Resulting decision.
    pub decision: Decision,
}

/// Enumerate every (role, ownership, level, action) combination.
pub fn decision_matrix() -> Vec<MatrixRow> {
    let actor_id = UserId(1);
    let other_id = UserId(2);
    let mut rows = Vec::with_capacity(
        Role::ALL
            .len()
            .saturating_mul(SecurityLevel::ALL.len())
            .saturating_mul(Action::ALL.len())
            .saturating_mul(2),
    );
    for role in Role::ALL {
        let principal = Principal::new(actor_id, role);
        for owner in [false, true] {
            for level in SecurityLevel::ALL {
                let owner_id = if owner { actor_id } else { other_id };
                let document = DocumentDescriptor::new(DocumentId(0), owner_id, level);
                for action in Action::ALL {
                    rows.push(MatrixRow {
                        role,
                        owner,
                        level,
                        action,
                        decision: evaluate(&principal, &document, action),
                    });
                }
            }
        }
    }
    rows
}
