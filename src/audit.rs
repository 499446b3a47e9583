//! Audit trail for access decisions and OTP outcomes.
//!
//! Sinks are fire-and-forget: a failed write is logged with `tracing::warn!`
//! and never changes the decision returned to the caller. Seeds and codes
//! never reach an audit event.

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::access::policy::Decision;
use crate::otp::OtpOutcome;
use crate::types::{Action, DocumentId, UserId};

/// Tracing target used by [`TracingAuditSink`].
pub const AUDIT_TARGET: &str = "audit";

/// How urgently an event deserves review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Routine.
    Info,
    /// Possible guessing or abuse.
    Elevated,
}

/// One audited occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Acting user.
    pub principal_id: UserId,
    /// Target document, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<DocumentId>,
    /// Requested action, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    /// Evaluator verdict, for decision events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    /// State machine result, for OTP events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp_outcome: Option<OtpOutcome>,
    /// Review priority.
    pub severity: Severity,
}

impl AuditEvent {
    /// Event for an evaluator verdict.
    pub fn decision(
        timestamp: DateTime<Utc>,
        principal_id: UserId,
        document_id: Option<DocumentId>,
        action: Option<Action>,
        decision: Decision,
    ) -> Self {
        Self {
            timestamp,
            principal_id,
            document_id,
            action,
            decision: Some(decision),
            otp_outcome: None,
            severity: Severity::Info,
        }
    }

    /// Event for an OTP state transition. Severity follows the outcome.
    pub fn otp(
        timestamp: DateTime<Utc>,
        principal_id: UserId,
        document_id: Option<DocumentId>,
        action: Option<Action>,
        outcome: OtpOutcome,
    ) -> Self {
        Self {
            timestamp,
            principal_id,
            document_id,
            action,
            decision: None,
            severity: outcome.severity(),
            otp_outcome: Some(outcome),
        }
    }
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    /// Record `event`. Must not fail the caller.
    fn record(&self, event: &AuditEvent);
}

// ---------------------------------------------------------------------------
// JSON lines
// ---------------------------------------------------------------------------

/// Appends one JSON object per line to a file or writer.
pub struct JsonlAuditSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonlAuditSink {
    /// Append to the file at `path`, creating it and its parent directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened for appending.
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!("failed to create audit dir {}: {e}", parent.display())
            })?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow::anyhow!("failed to open audit log {}: {e}", path.display()))?;
        Ok(Self {
            writer: Mutex::new(Box::new(file)),
        })
    }

    /// Write to an arbitrary writer (for testing).
    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    fn write_entry(&self, event: &AuditEvent) -> anyhow::Result<()> {
        let line = serde_json::to_string(event)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| anyhow::anyhow!("audit lock poisoned: {e}"))?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Err(e) = self.write_entry(event) {
            tracing::warn!(error = %e, principal_id = %event.principal_id, "audit write failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Emits each event on the `audit` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        let decision = event.decision.map(|d| d.outcome());
        let reason = event.decision.map(|d| d.reason.code());
        let otp_outcome = event
            .otp_outcome
            .as_ref()
            .and_then(|o| serde_json::to_string(o).ok());
        match event.severity {
            Severity::Elevated => tracing::warn!(
                target: AUDIT_TARGET,
                principal_id = %event.principal_id,
                document_id = ?event.document_id,
                action = ?event.action,
                decision = ?decision,
                reason = ?reason,
                otp_outcome = ?otp_outcome,
                "audit"
            ),
            Severity::Info => tracing::info!(
                target: AUDIT_TARGET,
                principal_id = %event.principal_id,
                document_id = ?event.document_id,
                action = ?event.action,
                decision = ?decision,
                reason = ?reason,
                otp_outcome = ?otp_outcome,
                "audit"
            ),
        }
    }
}

/// Discards everything. Used when auditing is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: &AuditEvent) {}
}

/// Build the sink described by the audit config.
///
/// # Errors
///
/// Returns an error if a configured file cannot be opened.
pub fn sink_from_config(
    config: &crate::config::AuditConfig,
) -> anyhow::Result<std::sync::Arc<dyn AuditSink>> {
    if !config.enabled {
        return Ok(std::sync::Arc::new(NullAuditSink));
    }
    match &config.path {
        Some(path) => Ok(std::sync::Arc::new(JsonlAuditSink::new(path)?)),
        None => Ok(std::sync::Arc::new(TracingAuditSink)),
    }
}
