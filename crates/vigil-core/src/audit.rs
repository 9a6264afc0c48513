//! Append-only audit trail.
//!
//! Every loop phase, decision, and action outcome produces one
//! [`AuditLogEntry`]. Entries are written once and never updated; retention
//! and cleanup are external concerns. Sink failures are logged together with
//! the entry itself so nothing is ever silently dropped.

use crate::error::VigilError;
use crate::model::ActionOutcome;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::error;

/// Audit sink failures.
#[derive(Debug, Error)]
pub enum AuditError {
    /// IO error from a durable sink.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<AuditError> for VigilError {
    fn from(e: AuditError) -> Self {
        Self::Audit(e.to_string())
    }
}

/// Loop phase an audit entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditPhase {
    /// Querying remote systems.
    Observe,
    /// Folding observations into the world model.
    Orient,
    /// Running the decision policy.
    Decide,
    /// Executing decisions.
    Act,
}

impl AuditPhase {
    /// Stable string name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Observe => "observe",
            Self::Orient => "orient",
            Self::Decide => "decide",
            Self::Act => "act",
        }
    }
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// When the entry was written.
    pub timestamp: DateTime<Utc>,
    /// Loop phase that produced the entry.
    pub phase: AuditPhase,
    /// Collaborator that did the work, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    /// Action name, for Act-phase entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Parameters the action ran with, or phase summary data.
    pub params: serde_json::Value,
    /// Outcome of the phase or action.
    pub result: ActionOutcome,
    /// Failure detail when the result is not a success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Correlated deployment, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
    /// Correlated source commit, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_commit: Option<String>,
}

impl AuditLogEntry {
    /// Creates an entry for a phase with the given outcome.
    #[must_use]
    pub fn new(phase: AuditPhase, result: ActionOutcome) -> Self {
        Self {
            timestamp: Utc::now(),
            phase,
            worker: None,
            action: None,
            params: serde_json::Value::Null,
            result,
            error_message: None,
            deployment_id: None,
            source_commit: None,
        }
    }

    /// Sets the collaborator that did the work.
    #[must_use]
    pub fn with_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    /// Sets the action name.
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Sets the parameters or phase summary.
    #[must_use]
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// Sets the failure detail.
    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Correlates the entry with a deployment.
    #[must_use]
    pub fn with_deployment_id(mut self, id: impl Into<String>) -> Self {
        self.deployment_id = Some(id.into());
        self
    }

    /// Correlates the entry with a source commit.
    #[must_use]
    pub fn with_source_commit(mut self, commit: impl Into<String>) -> Self {
        self.source_commit = Some(commit.into());
        self
    }
}

/// Destination for audit entries.
///
/// Durable storage lives outside the core's process lifetime; implementations
/// here are the local defaults and test doubles.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Appends one entry.
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), AuditError>;
}

/// In-memory sink for tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditLogEntry>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded entries.
    #[must_use]
    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), AuditError> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

/// Append-only JSON-lines file sink.
pub struct JsonlAuditSink {
    file: Mutex<File>,
}

impl JsonlAuditSink {
    /// Opens (or creates) the file at `path` for appending.
    pub fn open(path: &Path) -> Result<Self, AuditError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file: Mutex::new(file) })
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), AuditError> {
        let line = serde_json::to_string(entry)?;
        let mut file = self.file.lock().unwrap();
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }
}

/// The audit trail used by the loop.
///
/// Wraps a sink and guarantees the loop never sees an append failure: a
/// failed append logs both the failure and the entry through tracing, which
/// acts as the local fallback sink.
#[derive(Clone)]
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
}

impl AuditTrail {
    /// Creates a trail writing to the given sink.
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Records one entry, absorbing sink failures.
    pub async fn record(&self, entry: AuditLogEntry) {
        if let Err(e) = self.sink.append(&entry).await {
            error!(error = %e, entry = ?entry, "Audit append failed, entry preserved in log output");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_sink_records_in_order() {
        let sink = MemoryAuditSink::new();
        sink.append(&AuditLogEntry::new(AuditPhase::Observe, ActionOutcome::Success))
            .await
            .unwrap();
        sink.append(
            &AuditLogEntry::new(AuditPhase::Act, ActionOutcome::Failure)
                .with_action("rollback")
                .with_error("remote rejected"),
        )
        .await
        .unwrap();

        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].phase, AuditPhase::Observe);
        assert_eq!(entries[1].action.as_deref(), Some("rollback"));
        assert_eq!(entries[1].result, ActionOutcome::Failure);
    }

    #[tokio::test]
    async fn test_jsonl_sink_appends_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = JsonlAuditSink::open(&path).unwrap();

        sink.append(
            &AuditLogEntry::new(AuditPhase::Act, ActionOutcome::Success)
                .with_action("deploy")
                .with_deployment_id("dep-1")
                .with_params(json!({ "environment": "production" })),
        )
        .await
        .unwrap();
        sink.append(&AuditLogEntry::new(AuditPhase::Decide, ActionOutcome::Success))
            .await
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: AuditLogEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.action.as_deref(), Some("deploy"));
        assert_eq!(first.deployment_id.as_deref(), Some("dep-1"));
    }

    #[tokio::test]
    async fn test_trail_absorbs_sink_failure() {
        struct FailingSink;

        #[async_trait]
        impl AuditSink for FailingSink {
            async fn append(&self, _entry: &AuditLogEntry) -> Result<(), AuditError> {
                Err(AuditError::Io(std::io::Error::other("disk full")))
            }
        }

        let trail = AuditTrail::new(Arc::new(FailingSink));
        // Must not panic or propagate.
        trail.record(AuditLogEntry::new(AuditPhase::Observe, ActionOutcome::Success)).await;
    }

    #[test]
    fn test_entry_serializes_without_empty_options() {
        let entry = AuditLogEntry::new(AuditPhase::Orient, ActionOutcome::Success);
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("worker").is_none());
        assert!(json.get("deployment_id").is_none());
        assert_eq!(json["phase"], "orient");
        assert_eq!(json["result"], "success");
    }
}
