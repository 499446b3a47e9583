//! Per-user OTP state: enrollment lifecycle and the single live challenge.
//!
//! Every mutation for one user runs under that user's mutex, so two
//! concurrent verifications of the same challenge cannot both succeed and
//! the attempt counter never skips a decrement. Different users never
//! contend beyond the brief lookup in the outer map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::challenge::{IssuedChallenge, OtpChallenge, PendingAction, StepUpGrant};
use super::code::OtpCode;
use super::enrollment::{EnrollmentArtifact, EnrollmentState, EnrollmentStatus, OtpEnrollment};
use super::totp::{self, OtpSeed};
use super::OtpError;
use crate::clock::{Clock, SystemClock};
use crate::config::OtpConfig;
use crate::types::{Action, DocumentId, UserId};

/// Everything the manager remembers about one user.
#[derive(Debug, Default)]
struct UserOtpState {
    enrollment: EnrollmentState,
    challenge: Option<OtpChallenge>,
}

impl UserOtpState {
    fn is_empty(&self) -> bool {
        matches!(self.enrollment, EnrollmentState::Unenrolled) && self.challenge.is_none()
    }
}

/// Owns OTP enrollments and step-up challenges for all users.
///
/// Uses sync [`Mutex`]es since every critical section is brief (no awaits,
/// no I/O).
pub struct OtpManager {
    users: Mutex<HashMap<UserId, Arc<Mutex<UserOtpState>>>>,
    config: OtpConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for OtpManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl OtpManager {
    /// Create a manager reading time from `clock`.
    pub fn new(config: OtpConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            config,
            clock,
        }
    }

    /// Create a manager on the wall clock.
    pub fn with_system_clock(config: OtpConfig) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }

    /// Active configuration.
    pub fn config(&self) -> &OtpConfig {
        &self.config
    }

    /// Fetch or create the user's slot. The outer lock is held only here.
    ///
    /// Slots are only cloned under the outer lock, so [`Self::purge_expired`]
    /// can tell from the strong count whether a caller still holds one.
    fn slot(&self, user: UserId) -> Arc<Mutex<UserOtpState>> {
        let mut users = lock(&self.users);
        Arc::clone(users.entry(user).or_default())
    }

    fn existing_slot(&self, user: UserId) -> Option<Arc<Mutex<UserOtpState>>> {
        lock(&self.users).get(&user).map(Arc::clone)
    }

    // ------------------------------------------------------------------
    // Enrollment
    // ------------------------------------------------------------------

    /// Issue a fresh pending seed for `user`.
    ///
    /// Restarting an unfinished enrollment replaces its seed and restores the
    /// attempt budget. `account` labels the entry in the authenticator app.
    ///
    /// # Errors
    ///
    /// [`OtpError::AlreadyEnrolled`] if a seed is active; reset first.
    pub fn begin_enrollment(
        &self,
        user: UserId,
        account: &str,
    ) -> Result<EnrollmentArtifact, OtpError> {
        let slot = self.slot(user);
        let mut state = lock(&slot);

        if state.enrollment.active().is_some() {
            debug!(user_id = %user, "enrollment requested while already enrolled");
            return Err(OtpError::AlreadyEnrolled);
        }

        let seed = OtpSeed::generate();
        let provisioning_uri = totp::provisioning_uri(
            &seed,
            account,
            &self.config.issuer,
            self.config.totp_params(),
        )?;
        let now = self.clock.now();
        let artifact = EnrollmentArtifact {
            secret_base32: seed.to_base32(),
            provisioning_uri,
            issued_at: now,
        };

        state.enrollment = EnrollmentState::Enrolling {
            pending_seed: seed,
            started_at: now,
            attempts_remaining: self.config.max_attempts,
        };

        info!(user_id = %user, "otp enrollment started");
        Ok(artifact)
    }

    /// Activate the pending seed if `raw_code` matches it.
    ///
    /// # Errors
    ///
    /// - [`OtpError::MalformedCode`] without consuming an attempt.
    /// - [`OtpError::NoPendingEnrollment`] unless enrollment is in progress.
    /// - [`OtpError::InvalidCode`] while attempts remain.
    /// - [`OtpError::AttemptsExhausted`] when the last attempt fails; the
    ///   pending seed is discarded.
    pub fn confirm_enrollment(
        &self,
        user: UserId,
        raw_code: &str,
    ) -> Result<EnrollmentStatus, OtpError> {
        let code = OtpCode::parse(raw_code)?;
        let slot = self.existing_slot(user).ok_or(OtpError::NoPendingEnrollment)?;
        let mut guard = lock(&slot);
        let state = &mut *guard;
        let now = self.clock.now();

        let EnrollmentState::Enrolling {
            pending_seed,
            attempts_remaining,
            ..
        } = &mut state.enrollment
        else {
            return Err(OtpError::NoPendingEnrollment);
        };

        let matched = totp::verify(pending_seed, &code, now, self.config.totp_params())?;
        if matched.is_some() {
            let enrollment = OtpEnrollment {
                seed: pending_seed.clone(),
                enrolled_at: now,
            };
            state.enrollment = EnrollmentState::Enrolled(enrollment);
            info!(user_id = %user, "otp enrollment confirmed");
            return Ok(state.enrollment.status());
        }

        *attempts_remaining = attempts_remaining.saturating_sub(1);
        if *attempts_remaining == 0 {
            state.enrollment = EnrollmentState::Unenrolled;
            warn!(user_id = %user, "otp enrollment attempts exhausted, pending seed discarded");
            return Err(OtpError::AttemptsExhausted);
        }

        debug!(
            user_id = %user,
            attempts_remaining = *attempts_remaining,
            "otp enrollment code rejected"
        );
        Err(OtpError::InvalidCode {
            attempts_remaining: *attempts_remaining,
        })
    }

    /// Drop the seed (active or pending) and any live challenge.
    ///
    /// Returns whether anything was cleared. Does not ask for a code: callers
    /// are expected to have authenticated the user already.
    pub fn reset(&self, user: UserId) -> bool {
        let Some(slot) = self.existing_slot(user) else {
            return false;
        };
        let mut state = lock(&slot);
        let had_state = !state.is_empty();
        *state = UserOtpState::default();
        if had_state {
            info!(user_id = %user, "otp enrollment reset");
        }
        had_state
    }

    /// Current enrollment state without key material.
    pub fn status(&self, user: UserId) -> EnrollmentStatus {
        let Some(slot) = self.existing_slot(user) else {
            return EnrollmentStatus::Unenrolled;
        };
        let state = lock(&slot);
        state.enrollment.status()
    }

    // ------------------------------------------------------------------
    // Challenges
    // ------------------------------------------------------------------

    /// Open a new challenge for `action` on `document_id`, replacing any
    /// previous one for this user.
    ///
    /// # Errors
    ///
    /// [`OtpError::NotEnrolled`] unless the user has an active seed.
    pub fn issue_challenge(
        &self,
        user: UserId,
        document_id: DocumentId,
        action: Action,
    ) -> Result<IssuedChallenge, OtpError> {
        let slot = self.slot(user);
        let mut state = lock(&slot);
        self.open_challenge(&mut state, user, document_id, action)
    }

    /// Return the live challenge for the same target, or open one.
    ///
    /// Lets one-shot callers retry a code without resetting the attempt
    /// budget on every request. The flag is `true` when a new challenge was
    /// opened.
    ///
    /// # Errors
    ///
    /// [`OtpError::NotEnrolled`] unless the user has an active seed.
    pub fn ensure_challenge(
        &self,
        user: UserId,
        document_id: DocumentId,
        action: Action,
    ) -> Result<(IssuedChallenge, bool), OtpError> {
        let slot = self.slot(user);
        let mut state = lock(&slot);
        let now = self.clock.now();
        if let Some(existing) = state
            .challenge
            .as_ref()
            .filter(|c| c.targets(document_id, action) && !c.is_expired(now))
        {
            return Ok((IssuedChallenge::from(existing), false));
        }
        let issued = self.open_challenge(&mut state, user, document_id, action)?;
        Ok((issued, true))
    }

    fn open_challenge(
        &self,
        state: &mut UserOtpState,
        user: UserId,
        document_id: DocumentId,
        action: Action,
    ) -> Result<IssuedChallenge, OtpError> {
        if state.enrollment.active().is_none() {
            debug!(user_id = %user, "step-up required but user is not enrolled");
            return Err(OtpError::NotEnrolled);
        }

        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(self.config.challenge_ttl())
            .unwrap_or(now);
        let challenge = OtpChallenge {
            id: Uuid::new_v4(),
            principal_id: user,
            document_id,
            action,
            issued_at: now,
            expires_at,
            attempts_remaining: self.config.max_attempts,
        };
        let issued = IssuedChallenge::from(&challenge);

        if let Some(previous) = state.challenge.replace(challenge) {
            debug!(
                user_id = %user,
                superseded = %previous.id,
                "previous challenge superseded"
            );
        }
        info!(
            user_id = %user,
            document_id = %document_id,
            action = %action,
            challenge_id = %issued.pending.challenge_id,
            "otp challenge issued"
        );
        Ok(issued)
    }

    /// Check `raw_code` against the challenge named by `pending`.
    ///
    /// On success the challenge is destroyed and a single-use grant returned;
    /// presenting the same token again yields [`OtpError::ChallengeNotFound`].
    ///
    /// # Errors
    ///
    /// - [`OtpError::InvalidToken`] if the token belongs to another user.
    /// - [`OtpError::MalformedCode`] without consuming an attempt.
    /// - [`OtpError::ChallengeNotFound`] if the challenge is gone or superseded.
    /// - [`OtpError::ChallengeExpired`] once past expiry; the challenge is dropped.
    /// - [`OtpError::InvalidCode`] while attempts remain.
    /// - [`OtpError::AttemptsExhausted`] on the failure that uses the last attempt.
    pub fn verify(
        &self,
        user: UserId,
        pending: &PendingAction,
        raw_code: &str,
    ) -> Result<StepUpGrant, OtpError> {
        if pending.principal_id != user {
            warn!(
                user_id = %user,
                token_owner = %pending.principal_id,
                "continuation token presented by another user"
            );
            return Err(OtpError::InvalidToken);
        }
        let code = OtpCode::parse(raw_code)?;

        let slot = self.existing_slot(user).ok_or(OtpError::ChallengeNotFound)?;
        let mut guard = lock(&slot);
        let state = &mut *guard;
        let now = self.clock.now();

        let Some(challenge) = state.challenge.as_mut().filter(|c| {
            c.id == pending.challenge_id && c.targets(pending.document_id, pending.action)
        }) else {
            return Err(OtpError::ChallengeNotFound);
        };

        if challenge.is_expired(now) {
            state.challenge = None;
            info!(user_id = %user, challenge_id = %pending.challenge_id, "otp challenge expired");
            return Err(OtpError::ChallengeExpired);
        }

        let Some(enrollment) = state.enrollment.active() else {
            state.challenge = None;
            return Err(OtpError::NotEnrolled);
        };

        let matched = totp::verify(&enrollment.seed, &code, now, self.config.totp_params())?;
        if matched.is_some() {
            state.challenge = None;
            info!(user_id = %user, challenge_id = %pending.challenge_id, "otp challenge verified");
            return Ok(StepUpGrant::new(pending.clone(), now));
        }

        challenge.attempts_remaining = challenge.attempts_remaining.saturating_sub(1);
        let attempts_remaining = challenge.attempts_remaining;
        if attempts_remaining == 0 {
            state.challenge = None;
            warn!(
                user_id = %user,
                challenge_id = %pending.challenge_id,
                "otp challenge attempts exhausted"
            );
            return Err(OtpError::AttemptsExhausted);
        }

        debug!(user_id = %user, attempts_remaining, "otp code rejected");
        Err(OtpError::InvalidCode { attempts_remaining })
    }

    /// Abandon the challenge named by `pending`.
    ///
    /// # Errors
    ///
    /// [`OtpError::ChallengeNotFound`] if it is no longer live.
    pub fn cancel(&self, user: UserId, pending: &PendingAction) -> Result<(), OtpError> {
        if pending.principal_id != user {
            return Err(OtpError::InvalidToken);
        }
        let slot = self.existing_slot(user).ok_or(OtpError::ChallengeNotFound)?;
        let mut state = lock(&slot);
        match state.challenge.as_ref() {
            Some(c) if c.id == pending.challenge_id => {
                state.challenge = None;
                info!(
                    user_id = %user,
                    challenge_id = %pending.challenge_id,
                    "otp challenge cancelled"
                );
                Ok(())
            }
            _ => Err(OtpError::ChallengeNotFound),
        }
    }

    /// The user's unexpired challenge, if any.
    pub fn active_challenge(&self, user: UserId) -> Option<IssuedChallenge> {
        let slot = self.existing_slot(user)?;
        let state = lock(&slot);
        let now = self.clock.now();
        state
            .challenge
            .as_ref()
            .filter(|c| !c.is_expired(now))
            .map(IssuedChallenge::from)
    }

    /// Drop expired challenges and forget users with no state left.
    ///
    /// A slot another caller has fetched but not yet written is kept even when
    /// empty. Returns the number of challenges removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut users = lock(&self.users);
        let mut purged: usize = 0;
        users.retain(|_, slot| {
            let in_use = Arc::strong_count(slot) > 1;
            let mut state = lock(slot);
            if state.challenge.as_ref().is_some_and(|c| c.is_expired(now)) {
                state.challenge = None;
                purged = purged.saturating_add(1);
            }
            in_use || !state.is_empty()
        });
        if purged > 0 {
            debug!(purged, "expired otp challenges purged");
        }
        purged
    }
}
