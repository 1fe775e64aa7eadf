//! Audit trail for certificate operations.
//!
//! Recording is fire-and-forget: a failing log is reported through
//! `tracing` and never fails the operation being audited.
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    fmt,
    sync::{Arc, Mutex},
};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Upload,
    Sign,
    Revoke,
    ValidateFailed,
    ExpiryWarning,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuditAction::Upload => "certificate_upload",
            AuditAction::Sign => "invoice_sign",
            AuditAction::Revoke => "certificate_revoke",
            AuditAction::ValidateFailed => "certificate_validate_failed",
            AuditAction::ExpiryWarning => "certificate_expiry_warning",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub actor: String,
    pub action: AuditAction,
    pub outcome: AuditOutcome,
    /// Invoice reference or certificate serial the action applied to.
    pub target: Option<String>,
    /// Redacted detail: an error code and its user-facing text, never secrets.
    pub message: Option<String>,
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(actor: impl Into<String>, action: AuditAction, outcome: AuditOutcome) -> Self {
        Self {
            actor: actor.into(),
            action,
            outcome,
            target: None,
            message: None,
            at: Utc::now(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit log unavailable: {0}")]
    Unavailable(String),
}

pub trait AuditLog: Send + Sync {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

impl<T: AuditLog + ?Sized> AuditLog for Arc<T> {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        (**self).record(entry)
    }
}

/// Record `entry`, logging instead of propagating any failure.
pub fn record_best_effort<A: AuditLog + ?Sized>(log: &A, entry: AuditEntry) {
    let action = entry.action;
    if let Err(e) = log.record(entry) {
        tracing::warn!(%action, error = %e, "failed to write audit entry");
    }
}

/// Emits every entry as an `info` event on the `teif::audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLog;

impl AuditLog for TracingAuditLog {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        tracing::info!(
            target: "teif::audit",
            actor = %entry.actor,
            action = %entry.action,
            outcome = ?entry.outcome,
            target_ref = entry.target.as_deref().unwrap_or(""),
            message = entry.message.as_deref().unwrap_or(""),
            at = %entry.at.to_rfc3339(),
            "audit"
        );
        Ok(())
    }
}

/// Keeps entries in memory; used by tests and short-lived tools.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditLog for MemoryAuditLog {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        self.entries
            .lock()
            .map_err(|e| AuditError::Unavailable(e.to_string()))?
            .push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenLog;

    impl AuditLog for BrokenLog {
        fn record(&self, _entry: AuditEntry) -> Result<(), AuditError> {
            Err(AuditError::Unavailable("disk full".into()))
        }
    }

    #[test]
    fn best_effort_swallows_failures() {
        record_best_effort(
            &BrokenLog,
            AuditEntry::new("u", AuditAction::Sign, AuditOutcome::Failed),
        );
    }

    #[test]
    fn memory_log_keeps_order_through_arc() {
        let log = Arc::new(MemoryAuditLog::new());
        let shared = Arc::clone(&log);
        record_best_effort(
            &shared,
            AuditEntry::new("u", AuditAction::Upload, AuditOutcome::Success).with_target("01ab"),
        );
        record_best_effort(
            &shared,
            AuditEntry::new("u", AuditAction::Revoke, AuditOutcome::Success),
        );

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, AuditAction::Upload);
        assert_eq!(entries[0].target.as_deref(), Some("01ab"));
        assert_eq!(entries[1].action.to_string(), "certificate_revoke");
    }
}
