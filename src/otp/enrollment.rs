//! Per-user authenticator enrollment: `Unenrolled -> Enrolling -> Enrolled`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::totp::OtpSeed;

/// An active enrollment. Created on successful confirmation, dropped on reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpEnrollment {
    /// Active shared secret.
    pub seed: OtpSeed,
    /// When the enrollment was confirmed.
    pub enrolled_at: DateTime<Utc>,
}

/// Enrollment lifecycle of one user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EnrollmentState {
    /// No seed, or the previous one was reset.
    #[default]
    Unenrolled,
    /// A seed was issued but not yet confirmed with a code. Not usable for
    /// step-up.
    Enrolling {
        /// Seed awaiting confirmation.
        pending_seed: OtpSeed,
        /// When enrollment began.
        started_at: DateTime<Utc>,
        /// Confirmation attempts left before the pending seed is discarded.
        attempts_remaining: u32,
    },
    /// Confirmed; the seed backs step-up challenges.
    Enrolled(OtpEnrollment),
}

impl EnrollmentState {
    /// Active enrollment, if any.
    pub fn active(&self) -> Option<&OtpEnrollment> {
        match self {
            EnrollmentState::Enrolled(enrollment) => Some(enrollment),
            _ => None,
        }
    }

    /// Secret-free view for callers.
    pub fn status(&self) -> EnrollmentStatus {
        match self {
            EnrollmentState::Unenrolled => EnrollmentStatus::Unenrolled,
            EnrollmentState::Enrolling {
                started_at,
                attempts_remaining,
                ..
            } => EnrollmentStatus::Enrolling {
                started_at: *started_at,
                attempts_remaining: *attempts_remaining,
            },
            EnrollmentState::Enrolled(enrollment) => EnrollmentStatus::Enrolled {
                enrolled_at: enrollment.enrolled_at,
            },
        }
    }
}

/// Enrollment state without key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum EnrollmentStatus {
    /// Nothing enrolled.
    Unenrolled,
    /// Waiting for the first code.
    Enrolling {
        /// When enrollment began.
        started_at: DateTime<Utc>,
        /// Confirmation attempts left.
        attempts_remaining: u32,
    },
    /// Step-up available.
    Enrolled {
        /// When enrollment was confirmed.
        enrolled_at: DateTime<Utc>,
    },
}

impl EnrollmentStatus {
    /// Whether step-up challenges can be issued.
    pub fn is_enabled(&self) -> bool {
        matches!(self, EnrollmentStatus::Enrolled { .. })
    }
}

/// What the transport shows the user when enrollment begins.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct EnrollmentArtifact {
    /// Base32 secret for manual entry.
    pub secret_base32: String,
    /// `otpauth://` URI to render as a QR code.
    pub provisioning_uri: String,
    /// When the pending seed was issued.
    pub issued_at: DateTime<Utc>,
}

impl fmt::Debug for EnrollmentArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnrollmentArtifact")
            .field("secret_base32", &"__REDACTED__")
            .field("provisioning_uri", &"__REDACTED__")
            .field("issued_at", &self.issued_at)
            .finish()
    }
}
