//! External collaborator contracts.
//!
//! Each remote platform (deployment, source control, workflow automation)
//! is wrapped by a thin client elsewhere and plugs into the loop through the
//! [`Collaborator`] trait: one observe function plus a set of action
//! handlers. Notification and secret retrieval have their own, narrower
//! contracts.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use vigil_core::error::VigilError;
use vigil_core::model::Action;

/// One remote system the loop observes and acts on.
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Unique source identifier, used for world-model keys, shields, and
    /// audit correlation.
    fn name(&self) -> &str;

    /// Takes one observation of the remote system.
    ///
    /// # Errors
    /// Raises on transport failure; the loop turns the failure into an
    /// error-carrying observation rather than letting it unwind.
    async fn observe(&self) -> Result<Value, VigilError>;

    /// Actions this collaborator can execute.
    fn supported_actions(&self) -> &[Action];

    /// Executes one action with the given parameters.
    ///
    /// Implementations should be idempotent-safe to retry where the remote
    /// API allows it.
    async fn execute(
        &self,
        action: Action,
        params: &serde_json::Map<String, Value>,
    ) -> Result<Value, VigilError>;
}

/// Urgency of an out-of-band notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Informational.
    Info,
    /// Needs attention soon.
    Warning,
    /// Needs attention now.
    Critical,
}

impl Severity {
    /// Stable string name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    /// Parses a severity name, defaulting unknown values to `Warning`.
    #[must_use]
    pub fn parse_or_warning(s: &str) -> Self {
        match s {
            "info" => Self::Info,
            "critical" => Self::Critical,
            _ => Self::Warning,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Out-of-band notification delivery (chat message, pager, ...).
///
/// Delivery failures are logged by the caller and never escalate into a
/// second alert loop.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one notification.
    async fn notify(
        &self,
        severity: Severity,
        title: &str,
        message: &str,
        context: &Value,
    ) -> Result<(), VigilError>;
}

/// A credential value that cannot leak through logging.
///
/// `Debug` and `Display` are redacted; only [`SecretString::expose`] yields
/// the underlying value, and the core never calls it.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    /// Wraps a secret value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The underlying secret value. For collaborator constructors only.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(****)")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

/// Supplies credentials to collaborators at construction time.
pub trait SecretProvider: Send + Sync {
    /// Retrieves the named secret.
    fn secret(&self, key: &str) -> Result<SecretString, VigilError>;
}
