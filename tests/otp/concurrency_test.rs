//! Concurrent access to per-user OTP state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use docguard::otp::{EnrollmentStatus, OtpError};
use docguard::types::{Action, DocumentId, UserId};

use crate::common::{code_now, enroll, manager, wrong_code, USER};

#[test]
fn only_one_concurrent_verification_wins() {
    let (manager, clock) = manager();
    let seed = enroll(&manager, &clock, USER);
    let manager = Arc::new(manager);
    let issued = manager
        .issue_challenge(USER, DocumentId(5), Action::Delete)
        .expect("issue");
    let code = code_now(&seed, &clock);

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let pending = issued.pending.clone();
                let code = code.clone();
                s.spawn(move || manager.verify(USER, &pending, &code).is_ok())
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .collect()
    });

    assert_eq!(results.iter().filter(|ok| **ok).count(), 1);
}

#[test]
fn concurrent_failures_never_skip_a_decrement() {
    let (manager, clock) = manager();
    let seed = enroll(&manager, &clock, USER);
    let manager = Arc::new(manager);
    let issued = manager
        .issue_challenge(USER, DocumentId(5), Action::Delete)
        .expect("issue");
    let wrong = wrong_code(&seed, &clock);

    let mut results: Vec<OtpError> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..5)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let pending = issued.pending.clone();
                let wrong = wrong.clone();
                s.spawn(move || {
                    manager
                        .verify(USER, &pending, &wrong)
                        .expect_err("wrong code never verifies")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .collect()
    });
    results.sort_by_key(|e| e.code());

    let exhausted = results
        .iter()
        .filter(|e| **e == OtpError::AttemptsExhausted)
        .count();
    let not_found = results
        .iter()
        .filter(|e| **e == OtpError::ChallengeNotFound)
        .count();
    assert_eq!(exhausted, 1);
    assert_eq!(not_found, 2);
    assert!(results.contains(&OtpError::InvalidCode {
        attempts_remaining: 2
    }));
    assert!(results.contains(&OtpError::InvalidCode {
        attempts_remaining: 1
    }));
}

#[test]
fn concurrent_issuance_leaves_one_live_challenge() {
    let (manager, clock) = manager();
    let seed = enroll(&manager, &clock, USER);
    let manager = Arc::new(manager);

    let issued: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..6_i64)
            .map(|i| {
                let manager = Arc::clone(&manager);
                s.spawn(move || {
                    manager
                        .issue_challenge(USER, DocumentId(i), Action::Delete)
                        .expect("issue")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .collect()
    });

    let live = manager.active_challenge(USER).expect("one survives");
    let code = code_now(&seed, &clock);
    let mut wins = 0_usize;
    for challenge in &issued {
        if manager.verify(USER, &challenge.pending, &code).is_ok() {
            wins = wins.saturating_add(1);
            assert_eq!(challenge.pending.challenge_id, live.pending.challenge_id);
        }
    }
    assert_eq!(wins, 1);
}

#[test]
fn enrollment_survives_a_concurrent_purge() {
    let (manager, _clock) = manager();
    let manager = Arc::new(manager);
    let done = AtomicBool::new(false);

    let lost = std::thread::scope(|s| {
        let purger = {
            let manager = Arc::clone(&manager);
            let done = &done;
            s.spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    manager.purge_expired();
                }
            })
        };

        let mut lost = 0_usize;
        for id in 1_000..6_000_i64 {
            let user = UserId(id);
            manager.begin_enrollment(user, "load").expect("begin");
            if !matches!(manager.status(user), EnrollmentStatus::Enrolling { .. }) {
                lost = lost.saturating_add(1);
            }
        }
        done.store(true, Ordering::Relaxed);
        purger.join().expect("purger");
        lost
    });

    assert_eq!(lost, 0);
}
