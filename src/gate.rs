//! Access gate: the single entry point hosts call before touching a document.
//!
//! The gate looks up the document descriptor, runs the evaluator, drives the
//! OTP step-up when the decision demands it, and audits every verdict and
//! OTP transition. An [`Authorization`] can only be obtained from the gate,
//! and [`ActionExecutor`]s only accept an `Authorization`, so a gated action
//! cannot run without its step-up.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::access::classification::SecurityLevel;
use crate::access::policy::{
    evaluate, evaluate_creation, evaluate_reclassification, Decision, DecisionReason,
};
use crate::audit::{AuditEvent, AuditSink};
use crate::clock::Clock;
use crate::config::OtpConfig;
use crate::otp::{
    EnrollmentArtifact, EnrollmentStatus, IssuedChallenge, OtpError, OtpManager, OtpOutcome,
    PendingAction, StepUpGrant,
};
use crate::types::{Action, DocumentDescriptor, DocumentId, Principal};

/// Request header carrying a one-time code for one-shot step-up.
pub const OTP_HEADER: &str = "X-OTP-Code";

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Source of document descriptors.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Look up a document; `Ok(None)` if it does not exist.
    async fn descriptor(&self, id: DocumentId) -> anyhow::Result<Option<DocumentDescriptor>>;
}

/// Descriptor store backed by a map. Used by tests and the CLI.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: Arc<RwLock<HashMap<DocumentId, DocumentDescriptor>>>,
}

impl InMemoryDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a descriptor.
    pub async fn insert(&self, document: DocumentDescriptor) {
        self.documents.write().await.insert(document.id, document);
    }

    /// Remove a descriptor, returning it if present.
    pub async fn remove(&self, id: DocumentId) -> Option<DocumentDescriptor> {
        self.documents.write().await.remove(&id)
    }

    /// All descriptors, ordered by id.
    pub async fn list(&self) -> Vec<DocumentDescriptor> {
        let mut documents: Vec<_> = self.documents.read().await.values().copied().collect();
        documents.sort_by_key(|d| d.id);
        documents
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn descriptor(&self, id: DocumentId) -> anyhow::Result<Option<DocumentDescriptor>> {
        Ok(self.documents.read().await.get(&id).copied())
    }
}

/// Performs the underlying document operation once access is settled.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Carry out the authorized action.
    async fn execute(&self, authorization: Authorization) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Outcomes and errors
// ---------------------------------------------------------------------------

/// Permission to run one action on one document.
///
/// Not `Clone` and only constructed by [`AccessGate`]: each authorization
/// runs at most one action.
#[derive(Debug, PartialEq, Eq)]
pub struct Authorization {
    principal: Principal,
    document: DocumentDescriptor,
    action: Action,
    decision: Decision,
    stepped_up_at: Option<DateTime<Utc>>,
}

impl Authorization {
    /// Who may act.
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// The document as it was when access was decided.
    pub fn document(&self) -> &DocumentDescriptor {
        &self.document
    }

    /// The permitted action.
    pub fn action(&self) -> Action {
        self.action
    }

    /// The evaluator verdict behind this authorization.
    pub fn decision(&self) -> Decision {
        self.decision
    }

    /// When the OTP step-up was passed, if one was needed.
    pub fn stepped_up_at(&self) -> Option<DateTime<Utc>> {
        self.stepped_up_at
    }
}

/// Result of asking for access.
#[derive(Debug)]
pub enum AccessOutcome {
    /// The action may run now.
    Granted(Authorization),
    /// A code must be verified first; resume with [`AccessGate::resume`].
    StepUp(IssuedChallenge),
}

/// Why access was not granted.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// Role and ownership do not permit the action.
    #[error("not authorized: {reason}")]
    AuthorizationDenied {
        /// Evaluator reason.
        reason: DecisionReason,
    },

    /// The action needs a one-time code that was not supplied.
    #[error("one-time code required")]
    OtpRequired {
        /// Challenge to answer.
        challenge: IssuedChallenge,
    },

    /// The OTP state machine rejected the request.
    #[error(transparent)]
    Otp(#[from] OtpError),

    /// No such document.
    #[error("document {0} not found")]
    DocumentNotFound(DocumentId),

    /// The document store failed.
    #[error("document store error: {0:#}")]
    Store(anyhow::Error),
}

impl AccessError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AccessError::AuthorizationDenied { .. } => "AUTHORIZATION_DENIED",
            AccessError::OtpRequired { .. } => "OTP_REQUIRED",
            AccessError::Otp(e) => e.code(),
            AccessError::DocumentNotFound(_) => "DOCUMENT_NOT_FOUND",
            AccessError::Store(_) => "STORE_ERROR",
        }
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Evaluates, steps up and audits document access.
///
/// `Send + Sync`; share it through an `Arc`.
pub struct AccessGate {
    store: Arc<dyn DocumentStore>,
    audit: Arc<dyn AuditSink>,
    otp: OtpManager,
    clock: Arc<dyn Clock>,
}

impl AccessGate {
    /// Assemble a gate. The OTP manager reads time from the same clock.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        audit: Arc<dyn AuditSink>,
        otp_config: OtpConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            audit,
            otp: OtpManager::new(otp_config, Arc::clone(&clock)),
            clock,
        }
    }

    /// The underlying OTP manager.
    pub fn otp(&self) -> &OtpManager {
        &self.otp
    }

    async fn load(&self, id: DocumentId) -> Result<DocumentDescriptor, AccessError> {
        self.store
            .descriptor(id)
            .await
            .map_err(AccessError::Store)?
            .ok_or(AccessError::DocumentNotFound(id))
    }

    fn audit_decision(
        &self,
        principal: &Principal,
        document_id: Option<DocumentId>,
        action: Option<Action>,
        decision: Decision,
    ) {
        self.audit.record(&AuditEvent::decision(
            self.clock.now(),
            principal.id,
            document_id,
            action,
            decision,
        ));
    }

    fn audit_otp(
        &self,
        principal: &Principal,
        document_id: Option<DocumentId>,
        action: Option<Action>,
        outcome: OtpOutcome,
    ) {
        self.audit.record(&AuditEvent::otp(
            self.clock.now(),
            principal.id,
            document_id,
            action,
            outcome,
        ));
    }

    fn audit_otp_error(&self, principal: &Principal, pending: &PendingAction, error: &OtpError) {
        self.audit_otp(
            principal,
            Some(pending.document_id),
            Some(pending.action),
            OtpOutcome::from_error(error),
        );
    }

    /// Apply a decision: deny, grant, or open a challenge.
    fn settle(
        &self,
        principal: &Principal,
        document: DocumentDescriptor,
        action: Action,
        decision: Decision,
    ) -> Result<AccessOutcome, AccessError> {
        self.audit_decision(principal, Some(document.id), Some(action), decision);

        if !decision.permitted {
            debug!(
                user_id = %principal.id,
                document_id = %document.id,
                action = %action,
                reason = decision.reason.code(),
                "access denied"
            );
            return Err(AccessError::AuthorizationDenied {
                reason: decision.reason,
            });
        }

        if !decision.otp_required {
            return Ok(AccessOutcome::Granted(Authorization {
                principal: *principal,
                document,
                action,
                decision,
                stepped_up_at: None,
            }));
        }

        match self.otp.issue_challenge(principal.id, document.id, action) {
            Ok(issued) => {
                self.audit_otp(
                    principal,
                    Some(document.id),
                    Some(action),
                    OtpOutcome::ChallengeIssued {
                        challenge_id: issued.pending.challenge_id,
                    },
                );
                Ok(AccessOutcome::StepUp(issued))
            }
            Err(e) => {
                self.audit_otp(
                    principal,
                    Some(document.id),
                    Some(action),
                    OtpOutcome::from_error(&e),
                );
                Err(e.into())
            }
        }
    }

    /// Ask to perform `action` on `document_id`.
    ///
    /// # Errors
    ///
    /// - [`AccessError::DocumentNotFound`] / [`AccessError::Store`] on lookup failure.
    /// - [`AccessError::AuthorizationDenied`] if role and ownership do not allow it.
    /// - [`AccessError::Otp`] with [`OtpError::NotEnrolled`] if step-up is needed
    ///   but the principal has no authenticator.
    pub async fn request(
        &self,
        principal: &Principal,
        document_id: DocumentId,
        action: Action,
    ) -> Result<AccessOutcome, AccessError> {
        let document = self.load(document_id).await?;
        let decision = evaluate(principal, &document, action);
        self.settle(principal, document, action, decision)
    }

    /// Ask to move `document_id` to `new_level`. Step-up follows the edit rule.
    ///
    /// # Errors
    ///
    /// As for [`AccessGate::request`].
    pub async fn check_reclassification(
        &self,
        principal: &Principal,
        document_id: DocumentId,
        new_level: SecurityLevel,
    ) -> Result<AccessOutcome, AccessError> {
        let document = self.load(document_id).await?;
        let decision = evaluate_reclassification(principal, &document, new_level);
        self.settle(principal, document, Action::Edit, decision)
    }

    /// Check the creation rule for `level`.
    ///
    /// # Errors
    ///
    /// [`AccessError::AuthorizationDenied`] if the role may not create at `level`.
    pub fn check_creation(
        &self,
        principal: &Principal,
        level: SecurityLevel,
    ) -> Result<Decision, AccessError> {
        let decision = evaluate_creation(principal, level);
        self.audit_decision(principal, None, None, decision);
        if decision.permitted {
            Ok(decision)
        } else {
            Err(AccessError::AuthorizationDenied {
                reason: decision.reason,
            })
        }
    }

    /// Answer a step-up challenge and obtain the authorization it unlocks.
    ///
    /// The document is re-read and re-evaluated after the code is accepted,
    /// so a change of owner or level while the challenge was open is honored.
    ///
    /// # Errors
    ///
    /// [`AccessError::Otp`] for every verification failure, plus the lookup
    /// and denial errors of [`AccessGate::request`].
    pub async fn resume(
        &self,
        principal: &Principal,
        pending: &PendingAction,
        code: &str,
    ) -> Result<Authorization, AccessError> {
        let grant = match self.otp.verify(principal.id, pending, code) {
            Ok(grant) => grant,
            Err(e) => {
                self.audit_otp_error(principal, pending, &e);
                return Err(e.into());
            }
        };
        self.audit_otp(
            principal,
            Some(pending.document_id),
            Some(pending.action),
            OtpOutcome::Verified {
                challenge_id: pending.challenge_id,
            },
        );
        self.authorize_grant(principal, grant).await
    }

    async fn authorize_grant(
        &self,
        principal: &Principal,
        grant: StepUpGrant,
    ) -> Result<Authorization, AccessError> {
        let verified_at = grant.verified_at();
        let pending = grant.into_pending();
        let document = self.load(pending.document_id).await?;
        let decision = evaluate(principal, &document, pending.action);
        if !decision.permitted {
            self.audit_decision(principal, Some(document.id), Some(pending.action), decision);
            warn!(
                user_id = %principal.id,
                document_id = %document.id,
                "access revoked while step-up was pending"
            );
            return Err(AccessError::AuthorizationDenied {
                reason: decision.reason,
            });
        }
        Ok(Authorization {
            principal: *principal,
            document,
            action: pending.action,
            decision,
            stepped_up_at: Some(verified_at),
        })
    }

    /// Abandon a pending step-up. The action stays denied.
    ///
    /// # Errors
    ///
    /// [`AccessError::Otp`] if the challenge is no longer live.
    pub fn cancel(
        &self,
        principal: &Principal,
        pending: &PendingAction,
    ) -> Result<(), AccessError> {
        match self.otp.cancel(principal.id, pending) {
            Ok(()) => {
                self.audit_otp(
                    principal,
                    Some(pending.document_id),
                    Some(pending.action),
                    OtpOutcome::Cancelled,
                );
                Ok(())
            }
            Err(e) => {
                self.audit_otp_error(principal, pending, &e);
                Err(e.into())
            }
        }
    }

    /// One-shot access with the code supplied alongside the request, as in
    /// an [`OTP_HEADER`] header.
    ///
    /// When a code is needed and `otp_header` is absent or blank, the live
    /// challenge for the same document and action is returned in
    /// [`AccessError::OtpRequired`] (or a new one is opened). Retries
    /// therefore share one attempt budget.
    ///
    /// # Errors
    ///
    /// As for [`AccessGate::request`] and [`AccessGate::resume`], plus
    /// [`AccessError::OtpRequired`].
    pub async fn authorize_with_header(
        &self,
        principal: &Principal,
        document_id: DocumentId,
        action: Action,
        otp_header: Option<&str>,
    ) -> Result<Authorization, AccessError> {
        let document = self.load(document_id).await?;
        let decision = evaluate(principal, &document, action);
        self.audit_decision(principal, Some(document.id), Some(action), decision);

        if !decision.permitted {
            return Err(AccessError::AuthorizationDenied {
                reason: decision.reason,
            });
        }
        if !decision.otp_required {
            return Ok(Authorization {
                principal: *principal,
                document,
                action,
                decision,
                stepped_up_at: None,
            });
        }

        let ensured = self.otp.ensure_challenge(principal.id, document.id, action);
        let (issued, opened) = match ensured {
            Ok(ensured) => ensured,
            Err(e) => {
                let outcome = OtpOutcome::from_error(&e);
                self.audit_otp(principal, Some(document.id), Some(action), outcome);
                return Err(e.into());
            }
        };
        if opened {
            self.audit_otp(
                principal,
                Some(document.id),
                Some(action),
                OtpOutcome::ChallengeIssued {
                    challenge_id: issued.pending.challenge_id,
                },
            );
        }

        let Some(code) = otp_header.filter(|h| !h.trim().is_empty()) else {
            return Err(AccessError::OtpRequired { challenge: issued });
        };

        match self.otp.verify(principal.id, &issued.pending, code) {
            Ok(grant) => {
                self.audit_otp(
                    principal,
                    Some(document.id),
                    Some(action),
                    OtpOutcome::Verified {
                        challenge_id: issued.pending.challenge_id,
                    },
                );
                Ok(Authorization {
                    principal: *principal,
                    document,
                    action,
                    decision,
                    stepped_up_at: Some(grant.verified_at()),
                })
            }
            Err(e) => {
                self.audit_otp_error(principal, &issued.pending, &e);
                Err(e.into())
            }
        }
    }

    /// Hand an authorization to the executor.
    ///
    /// # Errors
    ///
    /// Whatever the executor reports.
    pub async fn dispatch(
        &self,
        executor: &dyn ActionExecutor,
        authorization: Authorization,
    ) -> anyhow::Result<()> {
        info!(
            user_id = %authorization.principal.id,
            document_id = %authorization.document.id,
            action = %authorization.action,
            stepped_up = authorization.stepped_up_at.is_some(),
            "dispatching authorized action"
        );
        executor.execute(authorization).await
    }

    // ------------------------------------------------------------------
    // Enrollment
    // ------------------------------------------------------------------

    /// Start authenticator enrollment for `principal`.
    ///
    /// # Errors
    ///
    /// [`AccessError::Otp`] with [`OtpError::AlreadyEnrolled`] if active.
    pub fn begin_enrollment(
        &self,
        principal: &Principal,
        account: &str,
    ) -> Result<EnrollmentArtifact, AccessError> {
        let artifact = self.otp.begin_enrollment(principal.id, account)?;
        self.audit_otp(principal, None, None, OtpOutcome::EnrollmentStarted);
        Ok(artifact)
    }

    /// Confirm enrollment with the first code from the authenticator.
    ///
    /// # Errors
    ///
    /// [`AccessError::Otp`] for any confirmation failure.
    pub fn confirm_enrollment(
        &self,
        principal: &Principal,
        code: &str,
    ) -> Result<EnrollmentStatus, AccessError> {
        match self.otp.confirm_enrollment(principal.id, code) {
            Ok(status) => {
                self.audit_otp(principal, None, None, OtpOutcome::EnrollmentConfirmed);
                Ok(status)
            }
            Err(e) => {
                let outcome = match &e {
                    OtpError::InvalidCode { attempts_remaining } => OtpOutcome::EnrollmentFailed {
                        attempts_remaining: *attempts_remaining,
                    },
                    other => OtpOutcome::from_error(other),
                };
                self.audit_otp(principal, None, None, outcome);
                Err(e.into())
            }
        }
    }

    /// Drop `principal`'s authenticator and any open challenge.
    ///
    /// The caller must already have authenticated the principal; no code is
    /// asked for.
    pub fn reset_enrollment(&self, principal: &Principal) -> bool {
        let cleared = self.otp.reset(principal.id);
        if cleared {
            self.audit_otp(principal, None, None, OtpOutcome::EnrollmentReset);
        }
        cleared
    }

    /// Enrollment state of `principal`.
    pub fn enrollment_status(&self, principal: &Principal) -> EnrollmentStatus {
        self.otp.status(principal.id)
    }
}
