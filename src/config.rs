//! Configuration loading and validation.
//!
//! Loaded from `--config`, `$DOCGUARD_CONFIG_PATH`, or
//! `~/.docguard/config.toml`. A missing file yields defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::otp::totp::TotpParams;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "DOCGUARD_CONFIG_PATH";

/// Upper bound on `otp.challenge_ttl_seconds`.
pub const MAX_CHALLENGE_TTL_SECONDS: u64 = 86_400;

/// Upper bound on `otp.skew_steps`: one step either side of now.
pub const MAX_SKEW_STEPS: u32 = 1;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Step-up and enrollment parameters.
    pub otp: OtpConfig,
    /// Audit sink settings.
    pub audit: AuditConfig,
    /// Log filter settings.
    pub logging: LoggingConfig,
}

/// Step-up and enrollment parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct OtpConfig {
    /// Issuer label shown by authenticator apps.
    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// TOTP time step in seconds.
    #[serde(default = "default_step_seconds")]
    pub step_seconds: u64,

    /// Steps tolerated on either side of the current one.
    #[serde(default = "default_skew_steps")]
    pub skew_steps: u32,

    /// Lifetime of a step-up challenge in seconds.
    #[serde(default = "default_challenge_ttl_seconds")]
    pub challenge_ttl_seconds: u64,

    /// Invalid codes tolerated per challenge or enrollment.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            step_seconds: default_step_seconds(),
            skew_steps: default_skew_steps(),
            challenge_ttl_seconds: default_challenge_ttl_seconds(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl OtpConfig {
    /// TOTP step and skew.
    pub fn totp_params(&self) -> TotpParams {
        TotpParams {
            step_seconds: self.step_seconds,
            skew_steps: self.skew_steps,
        }
    }

    /// Challenge lifetime as a chrono duration, clamped to one day.
    pub fn challenge_ttl(&self) -> chrono::Duration {
        let secs = self.challenge_ttl_seconds.min(MAX_CHALLENGE_TTL_SECONDS);
        chrono::Duration::try_seconds(i64::try_from(secs).unwrap_or(0))
            .unwrap_or_else(chrono::Duration::zero)
    }
}

/// Audit sink settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Whether decisions and OTP outcomes are recorded.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// JSON-lines file. Unset means events go to the `audit` tracing target.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

/// Log filter settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions for serde

fn default_issuer() -> String {
    "DocGuard".to_owned()
}
fn default_step_seconds() -> u64 {
    30
}
fn default_skew_steps() -> u32 {
    1
}
fn default_challenge_ttl_seconds() -> u64 {
    300
}
fn default_max_attempts() -> u32 {
    3
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_owned()
}

impl Config {
    /// Parse a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Apply environment overrides through `env`.
    ///
    /// Takes a resolver so tests never touch the process environment.
    /// Unparseable numeric values are ignored with a warning.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("DOCGUARD_OTP_ISSUER") {
            self.otp.issuer = v;
        }
        if let Some(v) = env("DOCGUARD_CHALLENGE_TTL_SECS") {
            match v.parse() {
                Ok(n) => self.otp.challenge_ttl_seconds = n,
                Err(_) => tracing::warn!(
                    var = "DOCGUARD_CHALLENGE_TTL_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("DOCGUARD_MAX_ATTEMPTS") {
            match v.parse() {
                Ok(n) => self.otp.max_attempts = n,
                Err(_) => tracing::warn!(
                    var = "DOCGUARD_MAX_ATTEMPTS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("DOCGUARD_AUDIT_LOG") {
            self.audit.path = Some(PathBuf::from(v));
        }
        if let Some(v) = env("DOCGUARD_LOG_LEVEL") {
            self.logging.level = v;
        }
    }

    /// Reject settings that would make step-up unusable.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.otp.issuer.trim().is_empty() {
            anyhow::bail!("otp.issuer must not be empty");
        }
        if self.otp.step_seconds == 0 {
            anyhow::bail!("otp.step_seconds must be greater than zero");
        }
        if self.otp.skew_steps > MAX_SKEW_STEPS {
            anyhow::bail!("otp.skew_steps must be at most {MAX_SKEW_STEPS}");
        }
        if self.otp.challenge_ttl_seconds == 0 {
            anyhow::bail!("otp.challenge_ttl_seconds must be greater than zero");
        }
        if self.otp.challenge_ttl_seconds > MAX_CHALLENGE_TTL_SECONDS {
            anyhow::bail!("otp.challenge_ttl_seconds must be at most {MAX_CHALLENGE_TTL_SECONDS}");
        }
        if self.otp.max_attempts == 0 {
            anyhow::bail!("otp.max_attempts must be greater than zero");
        }
        Ok(())
    }
}

/// Load configuration from a TOML file that must exist.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    Ok(config)
}

/// Resolve the default config directory (`~/.docguard/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".docguard"))
}

/// Pick the config file: explicit path, then `$DOCGUARD_CONFIG_PATH`, then
/// `~/.docguard/config.toml`.
///
/// # Errors
///
/// Returns an error if the home directory is needed but cannot be determined.
pub fn resolve_config_path(
    explicit: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = env(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }
    Ok(config_dir()?.join("config.toml"))
}

/// Load, override from the process environment, and validate.
///
/// A missing file yields defaults; any other read error is fatal.
///
/// # Errors
///
/// Returns an error if the file is unreadable, malformed, or invalid.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let env = |key: &str| std::env::var(key).ok();
    let path = resolve_config_path(explicit, env)?;
    let mut config = match std::fs::read_to_string(&path) {
        Ok(contents) => {
            tracing::debug!(path = %path.display(), "loading config from file");
            toml::from_str(&contents)
                .with_context(|| format!("failed to parse config at {}", path.display()))?
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && explicit.is_none() => {
            tracing::debug!(path = %path.display(), "no config file found, using defaults");
            Config::default()
        }
        Err(e) => {
            return Err(anyhow::anyhow!(
                "failed to read config at {}: {e}",
                path.display()
            ))
        }
    };
    config.apply_overrides(env);
    config.validate()?;
    Ok(config)
}
