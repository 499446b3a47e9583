//! Step-up challenge records and the continuation token that resumes them.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::OtpError;
use crate::types::{Action, DocumentId, UserId};

/// Longest encoded token accepted by [`PendingAction::decode`].
const MAX_TOKEN_LEN: usize = 1024;

/// An outstanding step-up challenge for one principal.
///
/// At most one exists per principal; issuing a new one supersedes the old.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpChallenge {
    /// Challenge identity, compared on every verification.
    pub id: Uuid,
    /// Principal who must answer.
    pub principal_id: UserId,
    /// Document the gated action targets.
    pub document_id: DocumentId,
    /// The gated action.
    pub action: Action,
    /// When the challenge was issued.
    pub issued_at: DateTime<Utc>,
    /// Instant from which verification is rejected.
    pub expires_at: DateTime<Utc>,
    /// Invalid codes still tolerated. Never negative; zero destroys the challenge.
    pub attempts_remaining: u32,
}

impl OtpChallenge {
    /// Whether `now` is at or past the expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether this challenge gates `action` on `document_id`.
    pub fn targets(&self, document_id: DocumentId, action: Action) -> bool {
        self.document_id == document_id && self.action == action
    }

    /// Continuation token naming this challenge.
    pub fn pending_action(&self) -> PendingAction {
        PendingAction {
            challenge_id: self.id,
            principal_id: self.principal_id,
            document_id: self.document_id,
            action: self.action,
            requested_at: self.issued_at,
        }
    }
}

/// Serializable continuation for an action waiting on a step-up code.
///
/// Handed to the caller when a challenge is issued and presented back with
/// the code, so the flow can resume on a different connection or process.
/// The token carries no authority by itself: verification always checks it
/// against the principal's live challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Challenge the token answers.
    pub challenge_id: Uuid,
    /// Principal that requested the action.
    pub principal_id: UserId,
    /// Target document.
    pub document_id: DocumentId,
    /// Requested action.
    pub action: Action,
    /// When the action was requested.
    pub requested_at: DateTime<Utc>,
}

impl PendingAction {
    /// Encode as URL-safe base64 JSON.
    ///
    /// # Errors
    ///
    /// Returns [`OtpError::InvalidToken`] if serialization fails.
    pub fn encode(&self) -> Result<String, OtpError> {
        let json = serde_json::to_vec(self).map_err(|_| OtpError::InvalidToken)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Decode a token produced by [`PendingAction::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`OtpError::InvalidToken`] for anything that is not a token.
    pub fn decode(token: &str) -> Result<Self, OtpError> {
        if token.len() > MAX_TOKEN_LEN {
            return Err(OtpError::InvalidToken);
        }
        let json = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| OtpError::InvalidToken)?;
        serde_json::from_slice(&json).map_err(|_| OtpError::InvalidToken)
    }
}

/// What the caller receives when a step-up is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedChallenge {
    /// Continuation to present together with the code.
    pub pending: PendingAction,
    /// Deadline for answering.
    pub expires_at: DateTime<Utc>,
    /// Invalid codes still tolerated.
    pub attempts_remaining: u32,
}

impl From<&OtpChallenge> for IssuedChallenge {
    fn from(challenge: &OtpChallenge) -> Self {
        Self {
            pending: challenge.pending_action(),
            expires_at: challenge.expires_at,
            attempts_remaining: challenge.attempts_remaining,
        }
    }
}

/// Proof that a challenge was answered correctly.
///
/// Deliberately not `Clone`: it authorizes exactly one invocation of the
/// pending action and is consumed when turned into an authorization. The
/// challenge it came from no longer exists.
#[derive(Debug, PartialEq, Eq)]
pub struct StepUpGrant {
    pending: PendingAction,
    verified_at: DateTime<Utc>,
}

impl StepUpGrant {
    pub(crate) fn new(pending: PendingAction, verified_at: DateTime<Utc>) -> Self {
        Self {
            pending,
            verified_at,
        }
    }

    /// The action this grant unlocks.
    pub fn pending(&self) -> &PendingAction {
        &self.pending
    }

    /// When the code was accepted.
    pub fn verified_at(&self) -> DateTime<Utc> {
        self.verified_at
    }

    /// Consume the grant.
    pub fn into_pending(self) -> PendingAction {
        self.pending
    }
}
