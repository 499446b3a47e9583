//! Format validation for user-supplied one-time codes.

use std::fmt;

use super::OtpError;

/// Number of digits in every code.
pub const CODE_DIGITS: usize = 6;

/// Longest raw input accepted before whitespace is stripped.
const MAX_RAW_LEN: usize = 32;

/// A syntactically valid one-time code: exactly six ASCII digits.
///
/// Parsing only checks format. Whether the code is correct is decided by
/// TOTP verification against a seed.
#[derive(Clone, PartialEq, Eq)]
pub struct OtpCode(String);

impl OtpCode {
    /// Parse a code as typed by the user.
    ///
    /// Embedded whitespace (`"123 456"`) is removed before validation.
    ///
    /// # Errors
    ///
    /// Returns [`OtpError::MalformedCode`] unless exactly six digits remain.
    pub fn parse(raw: &str) -> Result<Self, OtpError> {
        if raw.len() > MAX_RAW_LEN {
            return Err(OtpError::MalformedCode);
        }
        let digits: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        if digits.len() != CODE_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(OtpError::MalformedCode);
        }
        Ok(Self(digits))
    }

    /// The six digits.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for OtpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OtpCode(******)")
    }
}
