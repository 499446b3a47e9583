//! Enrollment lifecycle: begin, confirm, exhaust, reset.

use docguard::otp::{EnrollmentStatus, OtpError, OtpSeed};
use docguard::types::{Action, DocumentId};

use crate::common::{code_now, enroll, manager, window, wrong_code, USER};

#[test]
fn pending_seed_cannot_back_a_challenge() {
    let (manager, _clock) = manager();
    manager.begin_enrollment(USER, "ana").expect("begin");
    assert!(matches!(
        manager.status(USER),
        EnrollmentStatus::Enrolling {
            attempts_remaining: 3,
            ..
        }
    ));
    assert_eq!(
        manager.issue_challenge(USER, DocumentId(1), Action::Delete),
        Err(OtpError::NotEnrolled)
    );
}

#[test]
fn artifact_carries_secret_and_uri() {
    let (manager, _clock) = manager();
    let artifact = manager.begin_enrollment(USER, "ana@example.com").expect("begin");
    assert_eq!(artifact.secret_base32.len(), 32);
    assert!(artifact
        .provisioning_uri
        .starts_with("otpauth://totp/DocGuard:ana@example.com?"));
    assert!(artifact
        .provisioning_uri
        .contains(&format!("secret={}", artifact.secret_base32)));
    assert!(!format!("{artifact:?}").contains(&artifact.secret_base32));
}

#[test]
fn restarting_enrollment_replaces_the_seed() {
    let (manager, clock) = manager();
    let first = manager.begin_enrollment(USER, "ana").expect("begin");
    let second = manager.begin_enrollment(USER, "ana").expect("restart");
    assert_ne!(first.secret_base32, second.secret_base32);

    let seed = OtpSeed::from_base32(&second.secret_base32).expect("seed");
    let status = manager
        .confirm_enrollment(USER, &code_now(&seed, &clock))
        .expect("confirm with the latest seed");
    assert!(status.is_enabled());
}

#[test]
fn confirmation_without_enrollment_fails() {
    let (manager, _clock) = manager();
    assert_eq!(
        manager.confirm_enrollment(USER, "123456"),
        Err(OtpError::NoPendingEnrollment)
    );
}

#[test]
fn three_bad_confirmations_discard_the_pending_seed() {
    let (manager, clock) = manager();
    let artifact = manager.begin_enrollment(USER, "ana").expect("begin");
    let seed = OtpSeed::from_base32(&artifact.secret_base32).expect("seed");
    let wrong = wrong_code(&seed, &clock);

    for remaining in [2, 1] {
        assert_eq!(
            manager.confirm_enrollment(USER, &wrong),
            Err(OtpError::InvalidCode {
                attempts_remaining: remaining
            })
        );
    }
    assert_eq!(
        manager.confirm_enrollment(USER, &wrong),
        Err(OtpError::AttemptsExhausted)
    );
    assert_eq!(manager.status(USER), EnrollmentStatus::Unenrolled);
}

#[test]
fn reset_invalidates_the_old_seed() {
    let (manager, clock) = manager();
    let old_seed = enroll(&manager, &clock, USER);
    assert!(manager.reset(USER));
    assert_eq!(manager.status(USER), EnrollmentStatus::Unenrolled);

    let artifact = manager.begin_enrollment(USER, "ana").expect("begin again");
    let new_seed = OtpSeed::from_base32(&artifact.secret_base32).expect("seed");
    let old_code = code_now(&old_seed, &clock);
    // Astronomically unlikely, but a collision would make the assertion meaningless.
    if window(&new_seed, &clock).contains(&old_code) {
        return;
    }

    assert_eq!(
        manager.confirm_enrollment(USER, &old_code),
        Err(OtpError::InvalidCode {
            attempts_remaining: 2
        })
    );
    assert!(!manager.status(USER).is_enabled());
}

#[test]
fn reset_destroys_the_active_challenge() {
    let (manager, clock) = manager();
    let seed = enroll(&manager, &clock, USER);
    let issued = manager
        .issue_challenge(USER, DocumentId(1), Action::Delete)
        .expect("issue");

    assert!(manager.reset(USER));
    assert!(manager.active_challenge(USER).is_none());
    assert_eq!(
        manager.verify(USER, &issued.pending, &code_now(&seed, &clock)),
        Err(OtpError::ChallengeNotFound)
    );
    assert!(!manager.reset(USER));
}

#[test]
fn already_enrolled_must_reset_first() {
    let (manager, clock) = manager();
    enroll(&manager, &clock, USER);
    assert_eq!(
        manager.begin_enrollment(USER, "ana"),
        Err(OtpError::AlreadyEnrolled)
    );
}

#[test]
fn challenge_can_be_answered_in_the_confirmation_step() {
    let (manager, clock) = manager();
    let artifact = manager.begin_enrollment(USER, "ana").expect("begin");
    let seed = OtpSeed::from_base32(&artifact.secret_base32).expect("seed");
    manager
        .confirm_enrollment(USER, &code_now(&seed, &clock))
        .expect("confirm");

    clock.advance(chrono::Duration::seconds(5));
    let issued = manager
        .issue_challenge(USER, DocumentId(3), Action::Delete)
        .expect("issue");
    manager
        .verify(USER, &issued.pending, &code_now(&seed, &clock))
        .expect("same step still verifies");
}
