//! Time-based one-time codes (RFC 6238, HMAC-SHA1, six digits).
//!
//! Parameters match what common authenticator apps assume when they scan a
//! provisioning URI without overrides: SHA-1, 30-second steps, six digits.

use std::fmt;

use chrono::{DateTime, Utc};
use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use subtle::ConstantTimeEq;
use url::Url;

use super::code::{OtpCode, CODE_DIGITS};
use super::OtpError;

type HmacSha1 = Hmac<Sha1>;

/// Seed length in bytes (160 bits, the RFC 4226 recommendation).
pub const SEED_LEN: usize = 20;

/// `10^CODE_DIGITS`.
const CODE_MODULUS: u32 = 1_000_000;

/// Shared secret between the server and the user's authenticator.
///
/// `Debug` output never includes the key material.
#[derive(Clone, PartialEq, Eq)]
pub struct OtpSeed(Vec<u8>);

impl OtpSeed {
    /// Generate a fresh random seed.
    pub fn generate() -> Self {
        let mut bytes = vec![0_u8; SEED_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Decode a base32 secret as shown to users.
    ///
    /// Case, spaces and trailing `=` padding are tolerated.
    ///
    /// # Errors
    ///
    /// Returns [`OtpError::InvalidSeed`] if the input is empty or not base32.
    pub fn from_base32(encoded: &str) -> Result<Self, OtpError> {
        let normalized: String = encoded
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '=')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        if normalized.is_empty() {
            return Err(OtpError::InvalidSeed("empty secret".to_owned()));
        }
        let bytes = BASE32_NOPAD
            .decode(normalized.as_bytes())
            .map_err(|e| OtpError::InvalidSeed(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Unpadded base32 rendering for manual entry into an authenticator.
    pub fn to_base32(&self) -> String {
        BASE32_NOPAD.encode(&self.0)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for OtpSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OtpSeed(__REDACTED__)")
    }
}

/// Step size and tolerance used when generating and checking codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotpParams {
    /// Length of one time step in seconds.
    pub step_seconds: u64,
    /// Number of steps accepted on either side of the current one.
    pub skew_steps: u32,
}

impl Default for TotpParams {
    fn default() -> Self {
        Self {
            step_seconds: 30,
            skew_steps: 1,
        }
    }
}

/// Time step counter containing `at`.
pub fn time_step(at: DateTime<Utc>, step_seconds: u64) -> u64 {
    let secs = u64::try_from(at.timestamp()).unwrap_or(0);
    secs.checked_div(step_seconds).unwrap_or(0)
}

/// Code for a specific time step counter.
///
/// # Errors
///
/// Returns [`OtpError::InvalidSeed`] if the HMAC cannot be keyed.
pub fn code_for_step(seed: &OtpSeed, step: u64) -> Result<String, OtpError> {
    let mut mac = HmacSha1::new_from_slice(seed.as_bytes())
        .map_err(|e| OtpError::InvalidSeed(e.to_string()))?;
    mac.update(&step.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // Dynamic truncation (RFC 4226 section 5.3).
    let last = digest.last().copied().unwrap_or(0);
    let offset = usize::from(last & 0x0f);
    let window: [u8; 4] = digest
        .get(offset..offset.saturating_add(4))
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| OtpError::InvalidSeed("digest too short".to_owned()))?;
    let value = u32::from_be_bytes(window) & 0x7fff_ffff;

    Ok(format!(
        "{:0width$}",
        value % CODE_MODULUS,
        width = CODE_DIGITS
    ))
}

/// Code valid at instant `at`.
///
/// # Errors
///
/// Returns [`OtpError::InvalidSeed`] if the HMAC cannot be keyed.
pub fn code_at(seed: &OtpSeed, at: DateTime<Utc>, params: TotpParams) -> Result<String, OtpError> {
    code_for_step(seed, time_step(at, params.step_seconds))
}

/// Check `candidate` against every step within the skew window around `at`.
///
/// Returns the matching step counter, or `None` if no step matches. All
/// steps in the window are compared so timing does not reveal which one hit.
///
/// # Errors
///
/// Returns [`OtpError::InvalidSeed`] if the HMAC cannot be keyed.
pub fn verify(
    seed: &OtpSeed,
    candidate: &OtpCode,
    at: DateTime<Utc>,
    params: TotpParams,
) -> Result<Option<u64>, OtpError> {
    let current = time_step(at, params.step_seconds);
    let skew = i64::from(params.skew_steps);
    let mut matched = None;
    for delta in skew.saturating_neg()..=skew {
        let Some(step) = current.checked_add_signed(delta) else {
            continue;
        };
        let expected = code_for_step(seed, step)?;
        if bool::from(expected.as_bytes().ct_eq(candidate.as_str().as_bytes())) {
            matched = Some(step);
        }
    }
    Ok(matched)
}

/// Build an `otpauth://totp/` URI for QR rendering by the transport layer.
///
/// # Errors
///
/// Returns [`OtpError::InvalidSeed`] if the URI cannot be assembled.
pub fn provisioning_uri(
    seed: &OtpSeed,
    account: &str,
    issuer: &str,
    params: TotpParams,
) -> Result<String, OtpError> {
    let mut uri = Url::parse("otpauth://totp/")
        .map_err(|e| OtpError::InvalidSeed(format!("provisioning uri: {e}")))?;
    uri.path_segments_mut()
        .map_err(|()| OtpError::InvalidSeed("provisioning uri has no path".to_owned()))?
        .clear()
        .push(&format!("{issuer}:{account}"));
    uri.query_pairs_mut()
        .append_pair("secret", &seed.to_base32())
        .append_pair("issuer", issuer)
        .append_pair("algorithm", "SHA1")
        .append_pair("digits", &CODE_DIGITS.to_string())
        .append_pair("period", &params.step_seconds.to_string());
    Ok(uri.into())
}
