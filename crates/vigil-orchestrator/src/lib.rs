//! The Vigil autonomous orchestration core.
//!
//! Runs an Observe-Orient-Decide-Act loop over a set of remote
//! collaborators: observations fold into a world model, a pure decision
//! policy proposes actions, and the orchestrator executes them through
//! per-dependency resilience shields while writing an append-only audit
//! trail of everything it does.

pub mod collaborator;
pub mod orchestrator;
pub mod policy;
pub mod router;

pub use collaborator::{Collaborator, Notifier, SecretProvider, SecretString, Severity};
pub use orchestrator::Orchestrator;
pub use policy::{DecisionPolicy, PolicyConfig, StandardPolicy};
pub use router::ActionRouter;
