//! Core data model for the Vigil orchestration platform.
//!
//! This crate holds the leaf components of the autonomous control loop: the
//! observation/world-model aggregate, the decision value type, the
//! deployment state machine, the append-only audit trail, the failure
//! taxonomy, and configuration. It has no knowledge of remote platforms or
//! of the loop itself.

pub mod audit;
pub mod config;
pub mod deployment;
pub mod error;
pub mod model;

pub use audit::{
    AuditError, AuditLogEntry, AuditPhase, AuditSink, AuditTrail, JsonlAuditSink, MemoryAuditSink,
};
pub use config::{
    BreakerConfig, BudgetConfig, BulkheadConfig, MonitorConfig, OrchestratorConfig, RetryConfig,
    WorldConfig,
};
pub use deployment::{DeploymentMonitor, DeploymentRecord, DeploymentStatus};
pub use error::{Result, VigilError};
pub use model::{Action, ActionOutcome, Decision, Observation, WorldModel};
