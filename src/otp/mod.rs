//! One-time-password step-up: enrollment, challenges and verification.
//!
//! [`OtpManager`] owns all per-user OTP state. Everything else in this
//! module is plain data plus the TOTP primitives.

pub mod challenge;
pub mod code;
pub mod enrollment;
pub mod manager;
pub mod totp;

use serde::Serialize;
use uuid::Uuid;

pub use challenge::{IssuedChallenge, OtpChallenge, PendingAction, StepUpGrant};
pub use code::OtpCode;
pub use enrollment::{EnrollmentArtifact, EnrollmentState, EnrollmentStatus};
pub use manager::OtpManager;
pub use totp::{OtpSeed, TotpParams};

use crate::audit::Severity;

/// Failures of the enrollment and challenge state machines.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OtpError {
    /// Input was not six digits. Does not consume an attempt.
    #[error("one-time code must be exactly 6 digits")]
    MalformedCode,

    /// Wrong code; the challenge or enrollment is still open.
    #[error("invalid one-time code ({attempts_remaining} attempts remaining)")]
    InvalidCode {
        /// Attempts left after this failure.
        attempts_remaining: u32,
    },

    /// The challenge passed its expiry and was discarded.
    #[error("one-time code challenge expired, request a new one")]
    ChallengeExpired,

    /// Too many invalid codes; the challenge or pending enrollment was discarded.
    #[error("too many invalid one-time codes")]
    AttemptsExhausted,

    /// Step-up requires an active enrollment.
    #[error("two-factor authentication is not enabled for this account")]
    NotEnrolled,

    /// No live challenge matches the presented token.
    #[error("no matching challenge, it may have been answered, cancelled or replaced")]
    ChallengeNotFound,

    /// The continuation token could not be decoded or names someone else.
    #[error("malformed continuation token")]
    InvalidToken,

    /// Enrollment was requested while already enrolled.
    #[error("two-factor authentication is already enabled, reset it first")]
    AlreadyEnrolled,

    /// Confirmation was attempted without a pending enrollment.
    #[error("no enrollment in progress")]
    NoPendingEnrollment,

    /// A seed could not be decoded or used.
    #[error("invalid OTP secret: {0}")]
    InvalidSeed(String),
}

impl OtpError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            OtpError::MalformedCode => "OTP_MALFORMED",
            OtpError::InvalidCode { .. } => "OTP_INVALID",
            OtpError::ChallengeExpired => "OTP_EXPIRED",
            OtpError::AttemptsExhausted => "OTP_EXHAUSTED",
            OtpError::NotEnrolled => "OTP_NOT_ENROLLED",
            OtpError::ChallengeNotFound => "OTP_CHALLENGE_NOT_FOUND",
            OtpError::InvalidToken => "OTP_INVALID_TOKEN",
            OtpError::AlreadyEnrolled => "OTP_ALREADY_ENROLLED",
            OtpError::NoPendingEnrollment => "OTP_NO_PENDING_ENROLLMENT",
            OtpError::InvalidSeed(_) => "OTP_INVALID_SEED",
        }
    }
}

/// What happened in the OTP state machines, as recorded in the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum OtpOutcome {
    /// A pending seed was issued.
    EnrollmentStarted,
    /// The pending seed became active.
    EnrollmentConfirmed,
    /// Confirmation code was wrong.
    EnrollmentFailed {
        /// Attempts left.
        attempts_remaining: u32,
    },
    /// The seed and any challenge were discarded.
    EnrollmentReset,
    /// A step-up challenge was issued.
    ChallengeIssued {
        /// Challenge identity.
        challenge_id: Uuid,
    },
    /// A challenge was answered correctly.
    Verified {
        /// Challenge identity.
        challenge_id: Uuid,
    },
    /// A challenge answer was wrong.
    InvalidCode {
        /// Attempts left.
        attempts_remaining: u32,
    },
    /// The challenge had expired.
    Expired,
    /// The attempt budget ran out.
    Exhausted,
    /// The user abandoned the challenge.
    Cancelled,
    /// Step-up was needed but the user is not enrolled.
    NotEnrolled,
    /// The submitted code was not six digits.
    MalformedCode,
    /// The token named no live challenge.
    ChallengeNotFound,
    /// Any other rejection, by error code.
    Rejected {
        /// [`OtpError::code`] of the failure.
        code: &'static str,
    },
}

impl OtpOutcome {
    /// Audit outcome for a failed verification or confirmation.
    pub fn from_error(error: &OtpError) -> Self {
        match error {
            OtpError::MalformedCode => OtpOutcome::MalformedCode,
            OtpError::InvalidCode { attempts_remaining } => OtpOutcome::InvalidCode {
                attempts_remaining: *attempts_remaining,
            },
            OtpError::ChallengeExpired => OtpOutcome::Expired,
            OtpError::AttemptsExhausted => OtpOutcome::Exhausted,
            OtpError::NotEnrolled => OtpOutcome::NotEnrolled,
            OtpError::ChallengeNotFound => OtpOutcome::ChallengeNotFound,
            other => OtpOutcome::Rejected { code: other.code() },
        }
    }

    /// Exhaustion is a signal of guessing and is flagged for review.
    pub fn severity(&self) -> Severity {
        match self {
            OtpOutcome::Exhausted => Severity::Elevated,
            _ => Severity::Info,
        }
    }
}
