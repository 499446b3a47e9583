//! Challenge lifecycle: issue, verify, exhaust, expire, cancel, supersede.

use chrono::Duration;
use docguard::config::OtpConfig;
use docguard::otp::{OtpError, PendingAction};
use docguard::types::{Action, DocumentId, UserId};

use crate::common::{code_now, enroll, manager, manager_with, wrong_code, USER};

const DOC: DocumentId = DocumentId(300);

#[test]
fn third_invalid_code_exhausts_the_challenge() {
    let (manager, clock) = manager();
    let seed = enroll(&manager, &clock, USER);
    let issued = manager.issue_challenge(USER, DOC, Action::Delete).expect("issue");
    assert_eq!(issued.attempts_remaining, 3);
    let wrong = wrong_code(&seed, &clock);

    assert_eq!(
        manager.verify(USER, &issued.pending, &wrong),
        Err(OtpError::InvalidCode {
            attempts_remaining: 2
        })
    );
    assert_eq!(
        manager.verify(USER, &issued.pending, &wrong),
        Err(OtpError::InvalidCode {
            attempts_remaining: 1
        })
    );
    assert_eq!(
        manager.verify(USER, &issued.pending, &wrong),
        Err(OtpError::AttemptsExhausted)
    );
    // The challenge is gone; even the right code no longer helps.
    assert_eq!(
        manager.verify(USER, &issued.pending, &code_now(&seed, &clock)),
        Err(OtpError::ChallengeNotFound)
    );
}

#[test]
fn verified_challenge_authorizes_once() {
    let (manager, clock) = manager();
    let seed = enroll(&manager, &clock, USER);
    let issued = manager.issue_challenge(USER, DOC, Action::Download).expect("issue");
    let code = code_now(&seed, &clock);

    let grant = manager.verify(USER, &issued.pending, &code).expect("verified");
    assert_eq!(grant.pending().document_id, DOC);
    assert_eq!(grant.verified_at(), docguard::clock::Clock::now(clock.as_ref()));

    assert_eq!(
        manager.verify(USER, &issued.pending, &code),
        Err(OtpError::ChallengeNotFound)
    );
    assert!(manager.active_challenge(USER).is_none());
}

#[test]
fn expiry_is_checked_at_verification() {
    let (manager, clock) = manager();
    let seed = enroll(&manager, &clock, USER);
    let issued = manager.issue_challenge(USER, DOC, Action::Edit).expect("issue");

    clock.advance(Duration::seconds(299));
    assert!(manager.active_challenge(USER).is_some());

    clock.advance(Duration::seconds(1));
    assert_eq!(
        manager.verify(USER, &issued.pending, &code_now(&seed, &clock)),
        Err(OtpError::ChallengeExpired)
    );
    assert_eq!(
        manager.verify(USER, &issued.pending, &code_now(&seed, &clock)),
        Err(OtpError::ChallengeNotFound)
    );
}

#[test]
fn cancel_discards_the_challenge() {
    let (manager, clock) = manager();
    let seed = enroll(&manager, &clock, USER);
    let issued = manager.issue_challenge(USER, DOC, Action::Delete).expect("issue");

    manager.cancel(USER, &issued.pending).expect("cancel");
    assert_eq!(
        manager.cancel(USER, &issued.pending),
        Err(OtpError::ChallengeNotFound)
    );
    assert_eq!(
        manager.verify(USER, &issued.pending, &code_now(&seed, &clock)),
        Err(OtpError::ChallengeNotFound)
    );
}

#[test]
fn new_challenge_supersedes_old_one() {
    let (manager, clock) = manager();
    let seed = enroll(&manager, &clock, USER);
    let first = manager.issue_challenge(USER, DOC, Action::Delete).expect("issue");
    let second = manager
        .issue_challenge(USER, DocumentId(301), Action::Edit)
        .expect("issue");
    let code = code_now(&seed, &clock);

    assert_eq!(
        manager.verify(USER, &first.pending, &code),
        Err(OtpError::ChallengeNotFound)
    );
    let grant = manager.verify(USER, &second.pending, &code).expect("verify");
    assert_eq!(grant.into_pending().action, Action::Edit);
}

#[test]
fn ensure_challenge_reuses_live_challenge_for_same_target() {
    let (manager, clock) = manager();
    let seed = enroll(&manager, &clock, USER);
    let (first, opened) = manager.ensure_challenge(USER, DOC, Action::Delete).expect("issue");
    assert!(opened);
    manager
        .verify(USER, &first.pending, &wrong_code(&seed, &clock))
        .expect_err("wrong code");

    let (again, opened) = manager.ensure_challenge(USER, DOC, Action::Delete).expect("reuse");
    assert!(!opened);
    assert_eq!(again.pending.challenge_id, first.pending.challenge_id);
    assert_eq!(again.attempts_remaining, 2);

    let (other, opened) = manager.ensure_challenge(USER, DOC, Action::Edit).expect("new");
    assert!(opened);
    assert_ne!(other.pending.challenge_id, first.pending.challenge_id);
    assert_eq!(other.attempts_remaining, 3);
}

#[test]
fn token_survives_a_round_trip_between_processes() {
    let (manager, clock) = manager();
    let seed = enroll(&manager, &clock, USER);
    let issued = manager.issue_challenge(USER, DOC, Action::Delete).expect("issue");

    let token = issued.pending.encode().expect("encode");
    let decoded = PendingAction::decode(&token).expect("decode");
    manager
        .verify(USER, &decoded, &code_now(&seed, &clock))
        .expect("verify with decoded token");
}

#[test]
fn token_of_another_user_is_rejected() {
    let (manager, clock) = manager();
    let seed = enroll(&manager, &clock, USER);
    let issued = manager.issue_challenge(USER, DOC, Action::Delete).expect("issue");

    assert_eq!(
        manager.verify(UserId(8), &issued.pending, &code_now(&seed, &clock)),
        Err(OtpError::InvalidToken)
    );
    assert_eq!(
        manager.active_challenge(USER).map(|c| c.attempts_remaining),
        Some(3)
    );
}

#[test]
fn malformed_code_does_not_cost_an_attempt() {
    let (manager, clock) = manager();
    enroll(&manager, &clock, USER);
    let issued = manager.issue_challenge(USER, DOC, Action::Delete).expect("issue");
    for raw in ["", "12345", "abcdef", "1234567"] {
        assert_eq!(
            manager.verify(USER, &issued.pending, raw),
            Err(OtpError::MalformedCode)
        );
    }
    assert_eq!(
        manager.active_challenge(USER).map(|c| c.attempts_remaining),
        Some(3)
    );
}

#[test]
fn spaced_code_is_accepted() {
    let (manager, clock) = manager();
    let seed = enroll(&manager, &clock, USER);
    let issued = manager.issue_challenge(USER, DOC, Action::Delete).expect("issue");
    let code = code_now(&seed, &clock);
    let (head, tail) = code.split_at(3);
    manager
        .verify(USER, &issued.pending, &format!("{head} {tail}"))
        .expect("spaces are stripped");
}

#[test]
fn attempt_budget_and_ttl_are_configurable() {
    let config = OtpConfig {
        max_attempts: 5,
        challenge_ttl_seconds: 60,
        ..OtpConfig::default()
    };
    let (manager, clock) = manager_with(config);
    enroll(&manager, &clock, USER);
    let issued = manager.issue_challenge(USER, DOC, Action::Delete).expect("issue");
    assert_eq!(issued.attempts_remaining, 5);
    assert_eq!(
        issued.expires_at.signed_duration_since(issued.pending.requested_at),
        Duration::seconds(60)
    );
}

#[test]
fn purge_removes_only_expired_challenges() {
    let (manager, clock) = manager();
    enroll(&manager, &clock, USER);
    enroll(&manager, &clock, UserId(8));
    manager.issue_challenge(USER, DOC, Action::Delete).expect("issue");
    clock.advance(Duration::minutes(3));
    manager
        .issue_challenge(UserId(8), DOC, Action::Delete)
        .expect("issue");
    clock.advance(Duration::minutes(3));

    assert_eq!(manager.purge_expired(), 1);
    assert!(manager.active_challenge(USER).is_none());
    assert!(manager.active_challenge(UserId(8)).is_some());
}
