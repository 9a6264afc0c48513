//! Core data model: observations, the world model, and decisions.
//!
//! The world model is the single aggregate the loop reasons over: the most
//! recent observation per source plus a bounded history. It is owned by the
//! orchestrator and read-only to the decision policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

/// One observation of a remote system. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Identifier of the remote system this observation came from.
    pub source: String,
    /// When the observation was taken.
    pub timestamp: DateTime<Utc>,
    /// Source-specific structured payload.
    pub payload: serde_json::Value,
    /// Failure that prevented a payload from being collected, if any.
    pub error: Option<String>,
}

impl Observation {
    /// Creates a successful observation for a source.
    #[must_use]
    pub fn ok(source: impl Into<String>, payload: serde_json::Value) -> Self {
        Self { source: source.into(), timestamp: Utc::now(), payload, error: None }
    }

    /// Creates a failed observation carrying the failure as data.
    #[must_use]
    pub fn failed(source: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            timestamp: Utc::now(),
            payload: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }

    /// Returns true if this observation carries an error instead of a payload.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// In-memory aggregate of the most recent known state of all observed systems.
///
/// Mutated only through [`WorldModel::update`]; everything else is read-only
/// access for the decision policy and diagnostics.
#[derive(Debug, Clone)]
pub struct WorldModel {
    /// Latest observation per source.
    latest: HashMap<String, Observation>,
    /// Bounded ordered history of all observations (oldest first).
    history: VecDeque<Observation>,
    /// Timestamp of the most recent update.
    last_update: Option<DateTime<Utc>>,
    /// Maximum number of history entries retained.
    max_history: usize,
    /// Maximum age of history entries retained.
    max_age: Duration,
}

impl WorldModel {
    /// Creates an empty world model with the given history bounds.
    #[must_use]
    pub fn new(max_history: usize, max_age: Duration) -> Self {
        Self {
            latest: HashMap::new(),
            history: VecDeque::new(),
            last_update: None,
            max_history,
            max_age,
        }
    }

    /// Folds one observation into the model.
    ///
    /// Replaces the latest entry for the observation's source, appends to
    /// history, and evicts history entries beyond the configured count or age.
    pub fn update(&mut self, observation: Observation) {
        self.last_update = Some(observation.timestamp);
        self.history.push_back(observation.clone());
        self.latest.insert(observation.source.clone(), observation);
        self.evict();
    }

    /// Latest observation for a source, if any has been recorded.
    #[must_use]
    pub fn latest(&self, source: &str) -> Option<&Observation> {
        self.latest.get(source)
    }

    /// Timestamp of the most recent update.
    #[must_use]
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    /// All known source identifiers, sorted for deterministic iteration.
    #[must_use]
    pub fn sources(&self) -> Vec<&str> {
        let mut sources: Vec<&str> = self.latest.keys().map(String::as_str).collect();
        sources.sort_unstable();
        sources
    }

    /// The most recent `limit` observations across all sources, newest first.
    #[must_use]
    pub fn get_recent(&self, limit: usize) -> Vec<&Observation> {
        self.history.iter().rev().take(limit).collect()
    }

    /// The most recent `limit` observations of one source, newest first.
    #[must_use]
    pub fn recent_for_source(&self, source: &str, limit: usize) -> Vec<&Observation> {
        self.history.iter().rev().filter(|o| o.source == source).take(limit).collect()
    }

    /// Number of history entries currently retained.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    fn evict(&mut self) {
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
        let now = Utc::now();
        while let Some(oldest) = self.history.front() {
            let too_old = (now - oldest.timestamp)
                .to_std()
                .map(|age| age > self.max_age)
                .unwrap_or(false);
            if too_old {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }
}

/// The closed set of actions the core can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Trigger a new deployment.
    Deploy,
    /// Roll a failed deployment back by creating a superseding one.
    Rollback,
    /// Open an issue on the source-control platform.
    CreateIssue,
    /// Merge an approved request on the source-control platform.
    MergeRequest,
    /// Deliver an out-of-band notification.
    Alert,
    /// Trigger a workflow on the automation platform.
    ExecuteWorkflow,
}

impl Action {
    /// All action variants, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Deploy,
        Self::Rollback,
        Self::CreateIssue,
        Self::MergeRequest,
        Self::Alert,
        Self::ExecuteWorkflow,
    ];

    /// Stable string name used in audit entries and routing.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deploy => "deploy",
            Self::Rollback => "rollback",
            Self::CreateIssue => "create_issue",
            Self::MergeRequest => "merge_request",
            Self::Alert => "alert",
            Self::ExecuteWorkflow => "execute_workflow",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One proposed unit of work, produced by the decision policy and consumed
/// once by the Act phase. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// The action to execute.
    pub action: Action,
    /// Human-readable justification.
    pub reasoning: String,
    /// Structured context backing the reasoning.
    pub context: serde_json::Value,
    /// Action-specific parameters handed to the collaborator.
    pub parameters: serde_json::Map<String, serde_json::Value>,
    /// Urgency; higher executes first.
    pub priority: u32,
    /// Critical decisions additionally notify out-of-band on completion.
    pub critical: bool,
}

impl Decision {
    /// Creates a decision with empty context and parameters.
    #[must_use]
    pub fn new(action: Action, reasoning: impl Into<String>, priority: u32) -> Self {
        Self {
            action,
            reasoning: reasoning.into(),
            context: serde_json::Value::Null,
            parameters: serde_json::Map::new(),
            priority,
            critical: false,
        }
    }

    /// Adds one action parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Attaches structured context.
    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    /// Marks the decision critical.
    #[must_use]
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

/// Outcome of one executed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    /// The action completed successfully.
    Success,
    /// The action failed.
    Failure,
    /// The action's monitoring wait exceeded its deadline.
    Timeout,
}

impl ActionOutcome {
    /// Stable string name used in audit entries.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
