//! One-shot requests carrying the code in the `X-OTP-Code` header.

use docguard::gate::{AccessError, OTP_HEADER};
use docguard::types::Action;

use crate::common::{Fixture, ADMIN, CONFIDENTIAL_DOC, OWNER, PUBLIC_DOC};

#[test]
fn header_name_is_stable() {
    assert_eq!(OTP_HEADER, "X-OTP-Code");
}

#[tokio::test]
async fn ungated_action_ignores_the_header() {
    let fx = Fixture::new().await;
    let auth = fx
        .gate
        .authorize_with_header(&OWNER, PUBLIC_DOC, Action::View, None)
        .await
        .expect("granted");
    assert!(auth.stepped_up_at().is_none());
}

#[tokio::test]
async fn missing_header_returns_the_challenge_to_answer() {
    let fx = Fixture::new().await;
    let seed = fx.enroll(&ADMIN);

    let err = fx
        .gate
        .authorize_with_header(&ADMIN, CONFIDENTIAL_DOC, Action::Download, None)
        .await
        .expect_err("code required");
    assert_eq!(err.code(), "OTP_REQUIRED");
    let AccessError::OtpRequired { challenge } = err else {
        panic!("expected OtpRequired");
    };

    let blank = fx
        .gate
        .authorize_with_header(&ADMIN, CONFIDENTIAL_DOC, Action::Download, Some("   "))
        .await
        .expect_err("blank header is missing");
    let AccessError::OtpRequired { challenge: again } = blank else {
        panic!("expected OtpRequired");
    };
    assert_eq!(again.pending.challenge_id, challenge.pending.challenge_id);

    let auth = fx
        .gate
        .authorize_with_header(
            &ADMIN,
            CONFIDENTIAL_DOC,
            Action::Download,
            Some(&fx.code(&seed)),
        )
        .await
        .expect("verified");
    assert!(auth.stepped_up_at().is_some());
}

#[tokio::test]
async fn retries_share_one_attempt_budget() {
    let fx = Fixture::new().await;
    let seed = fx.enroll(&OWNER);
    let wrong = fx.wrong_code(&seed);

    let mut codes = Vec::new();
    for _ in 0..3 {
        let err = fx
            .gate
            .authorize_with_header(&OWNER, PUBLIC_DOC, Action::Delete, Some(&wrong))
            .await
            .expect_err("wrong");
        codes.push(err.code());
    }
    assert_eq!(codes, vec!["OTP_INVALID", "OTP_INVALID", "OTP_EXHAUSTED"]);

    // Exhaustion destroyed the challenge; the next request opens a fresh one.
    let auth = fx
        .gate
        .authorize_with_header(&OWNER, PUBLIC_DOC, Action::Delete, Some(&fx.code(&seed)))
        .await
        .expect("fresh challenge verified");
    assert_eq!(auth.action(), Action::Delete);
}

#[tokio::test]
async fn malformed_header_is_rejected_without_cost() {
    let fx = Fixture::new().await;
    fx.enroll(&OWNER);
    let err = fx
        .gate
        .authorize_with_header(&OWNER, PUBLIC_DOC, Action::Delete, Some("12-34-56"))
        .await
        .expect_err("malformed");
    assert_eq!(err.code(), "OTP_MALFORMED");
    let live = fx.gate.otp().active_challenge(OWNER.id).expect("still live");
    assert_eq!(live.attempts_remaining, 3);
}
