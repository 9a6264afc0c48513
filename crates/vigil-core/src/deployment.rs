//! Deployment lifecycle tracking.
//!
//! A [`DeploymentRecord`] tracks one rollout through a forward-only state
//! machine. Records are never deleted: a rollback supersedes a failed record
//! with a fresh one rather than mutating it. [`DeploymentMonitor`] waits for
//! a rollout to reach a terminal state and raises a distinct timeout error
//! rather than stopping silently.

use crate::error::VigilError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Lifecycle state of one rollout.
///
/// `Active`, `Failed`, `Crashed` and `Removed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Rollout accepted, nothing started yet.
    Initializing,
    /// Build in progress.
    Building,
    /// Build artifacts being rolled out.
    Deploying,
    /// Rollout finished and serving.
    Active,
    /// Rollout failed before becoming active.
    Failed,
    /// Rollout became active and then crashed.
    Crashed,
    /// Rollout was removed.
    Removed,
}

impl DeploymentStatus {
    /// Position along the forward-only lifecycle. All terminal states share
    /// the final rank so no transition between them is legal.
    fn rank(self) -> u8 {
        match self {
            Self::Initializing => 0,
            Self::Building => 1,
            Self::Deploying => 2,
            Self::Active | Self::Failed | Self::Crashed | Self::Removed => 3,
        }
    }

    /// Returns true if no further transition is possible from this state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self.rank() == 3
    }

    /// Returns true only for `Active`.
    #[must_use]
    pub fn is_healthy(self) -> bool {
        self == Self::Active
    }

    /// Returns true if this state calls for an automatic rollback.
    #[must_use]
    pub fn should_rollback(self) -> bool {
        matches!(self, Self::Failed | Self::Crashed)
    }

    /// Checks whether the transition to `to` is legal.
    ///
    /// Status polling can miss intermediate states, so any strictly forward
    /// jump along the lifecycle is legal; terminal states accept none.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        !self.is_terminal() && to.rank() > self.rank()
    }

    /// Stable string name used in payloads and audit entries.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Building => "building",
            Self::Deploying => "deploying",
            Self::Active => "active",
            Self::Failed => "failed",
            Self::Crashed => "crashed",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(Self::Initializing),
            "building" => Ok(Self::Building),
            "deploying" => Ok(Self::Deploying),
            "active" => Ok(Self::Active),
            "failed" => Ok(Self::Failed),
            "crashed" => Ok(Self::Crashed),
            "removed" => Ok(Self::Removed),
            other => Err(VigilError::Persistent {
                reason: format!("unknown deployment status '{other}'"),
            }),
        }
    }
}

/// One tracked rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Unique rollout identifier.
    pub id: String,
    /// Current lifecycle state.
    pub status: DeploymentStatus,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record last changed state.
    pub updated_at: DateTime<Utc>,
    /// Arbitrary rollout metadata (commit, environment, trigger, ...).
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl DeploymentRecord {
    /// Creates a new record in `Initializing` with a fresh id.
    #[must_use]
    pub fn new(metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: DeploymentStatus::Initializing,
            created_at: now,
            updated_at: now,
            metadata,
        }
    }

    /// Creates a record that tracks an externally assigned deployment id.
    #[must_use]
    pub fn with_id(
        id: impl Into<String>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self { id: id.into(), ..Self::new(metadata) }
    }

    /// Applies a validated state transition.
    ///
    /// # Errors
    /// Returns `VigilError::InvalidTransition` and leaves the record
    /// unchanged if the transition is illegal, including any transition
    /// attempted from a terminal state.
    pub fn transition(&mut self, to: DeploymentStatus) -> Result<(), VigilError> {
        if !self.status.can_transition_to(to) {
            error!(
                deployment_id = %self.id,
                from = %self.status,
                to = %to,
                "Invalid deployment transition"
            );
            return Err(VigilError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }

        debug!(deployment_id = %self.id, from = %self.status, to = %to, "Deployment transition");
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Returns true only while the rollout is `Active`.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }

    /// Returns true if the rollout ended in a state that calls for rollback.
    #[must_use]
    pub fn should_rollback(&self) -> bool {
        self.status.should_rollback()
    }

    /// Produces the superseding record for a rollback of this rollout.
    ///
    /// The failed record is left untouched; the new record starts a fresh
    /// lifecycle and carries a `rolled_back_from` pointer in its metadata.
    #[must_use]
    pub fn superseded_by_rollback(&self) -> Self {
        let mut metadata = self.metadata.clone();
        metadata.insert("rolled_back_from".to_string(), serde_json::Value::String(self.id.clone()));
        Self::new(metadata)
    }
}

/// Polls a rollout's status until it reaches a terminal state or a deadline.
#[derive(Debug, Clone, Copy)]
pub struct DeploymentMonitor {
    poll_interval: Duration,
    timeout: Duration,
}

impl DeploymentMonitor {
    /// Creates a monitor with the given polling period and overall deadline.
    #[must_use]
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self { poll_interval, timeout }
    }

    /// Waits until `poll` reports a terminal status.
    ///
    /// Individual poll failures are logged and retried on the next tick;
    /// only the deadline ends the wait early.
    ///
    /// # Errors
    /// Returns `VigilError::MonitorTimeout` once the deadline elapses
    /// without a terminal status.
    pub async fn wait_for_terminal<F, Fut>(
        &self,
        mut poll: F,
    ) -> Result<DeploymentStatus, VigilError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<DeploymentStatus, VigilError>>,
    {
        let started = Instant::now();
        loop {
            match poll().await {
                Ok(status) if status.is_terminal() => {
                    debug!(status = %status, waited = ?started.elapsed(), "Deployment reached terminal state");
                    return Ok(status);
                }
                Ok(status) => {
                    debug!(status = %status, "Deployment not yet terminal");
                }
                Err(e) => {
                    warn!(error = %e, "Deployment status poll failed");
                }
            }

            if started.elapsed() + self.poll_interval >= self.timeout {
                return Err(VigilError::MonitorTimeout { waited: started.elapsed() });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
