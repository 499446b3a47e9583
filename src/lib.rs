//! DocGuard — access decisions for classified documents.
//!
//! Documents carry a security level (Public, Confidential, Secret) and users
//! a role (User, Supervisor, Admin). The evaluator decides whether an action
//! is permitted and whether it must first pass an OTP step-up challenge; the
//! gate drives that challenge and audits every outcome.
//!
//! See `DESIGN.md` for the decision tables and open-question decisions.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod access;
pub mod types;

pub mod clock;
pub mod config;
pub mod logging;

pub mod audit;
pub mod otp;

pub mod gate;
