//! The decision policy: pure rules from world state to proposed actions.
//!
//! Policies never perform I/O and never mutate the model, so the same model
//! always yields the same decisions. Sources are visited in sorted order and
//! decisions are stable-sorted by descending priority, which keeps the output
//! deterministic and replayable from the audit trail.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;
use vigil_core::deployment::DeploymentStatus;
use vigil_core::model::{Action, Decision, Observation, WorldModel};

/// Maps the current world model to a set of proposed actions.
pub trait DecisionPolicy: Send + Sync {
    /// Proposes actions for the current world state, sorted by descending
    /// priority.
    fn decide(&self, model: &WorldModel) -> Vec<Decision>;
}

/// Tuning knobs for [`StandardPolicy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Payload field holding the saturation metric.
    pub saturation_metric: String,
    /// Metric value at or above which a source counts as saturated.
    pub saturation_threshold: f64,
    /// Consecutive saturated observations required before alerting.
    pub saturation_samples: usize,
    /// Consecutive failed observations of one source that count as an outage.
    pub outage_threshold: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            saturation_metric: "cpu_percent".to_string(),
            saturation_threshold: 90.0,
            saturation_samples: 3,
            outage_threshold: 3,
        }
    }
}

/// The built-in rule set.
///
/// Per source, in order: a deployment observed in a terminal failure state
/// (or a monitor that timed out waiting for one) escalates to a critical
/// rollback plus an issue; sustained saturation raises an alert; a run of
/// failed observations raises an outage alert.
pub struct StandardPolicy {
    config: PolicyConfig,
}

impl StandardPolicy {
    /// Creates a policy with the given tuning.
    #[must_use]
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    fn failed_deployment(observation: &Observation) -> Option<DeploymentStatus> {
        let status = observation
            .payload
            .get("status")
            .and_then(Value::as_str)?
            .parse::<DeploymentStatus>()
            .ok()?;
        status.should_rollback().then_some(status)
    }

    fn monitor_timed_out(observation: &Observation) -> bool {
        observation.error.as_deref().is_some_and(|e| e.starts_with("monitor timeout"))
    }

    fn escalate_deployment(
        &self,
        source: &str,
        observation: &Observation,
        reason: &str,
        decisions: &mut Vec<Decision>,
    ) {
        let deployment_id =
            observation.payload.get("deployment_id").and_then(Value::as_str).unwrap_or("unknown");
        debug!(source = source, deployment_id = deployment_id, reason = reason, "Escalating failed deployment");

        decisions.push(
            Decision::new(Action::Rollback, format!("{reason} on '{source}'"), 100)
                .with_param("source", json!(source))
                .with_param("deployment_id", json!(deployment_id))
                .with_context(observation.payload.clone())
                .critical(),
        );
        decisions.push(
            Decision::new(
                Action::CreateIssue,
                format!("file incident issue: {reason} on '{source}'"),
                50,
            )
            .with_param("title", json!(format!("{reason} on '{source}'")))
            .with_param("deployment_id", json!(deployment_id))
            .with_context(observation.payload.clone()),
        );
    }

    fn is_saturated(&self, model: &WorldModel, source: &str) -> bool {
        let samples = model.recent_for_source(source, self.config.saturation_samples);
        samples.len() == self.config.saturation_samples
            && samples.iter().all(|o| {
                o.payload
                    .get(&self.config.saturation_metric)
                    .and_then(Value::as_f64)
                    .is_some_and(|v| v >= self.config.saturation_threshold)
            })
    }

    fn is_out(&self, model: &WorldModel, source: &str) -> bool {
        let recent = model.recent_for_source(source, self.config.outage_threshold);
        recent.len() == self.config.outage_threshold && recent.iter().all(|o| o.is_error())
    }
}

impl Default for StandardPolicy {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}

impl DecisionPolicy for StandardPolicy {
    fn decide(&self, model: &WorldModel) -> Vec<Decision> {
        let mut decisions = Vec::new();

        for source in model.sources() {
            let Some(latest) = model.latest(source) else { continue };

            if let Some(status) = Self::failed_deployment(latest) {
                self.escalate_deployment(
                    source,
                    latest,
                    &format!("deployment is {status}"),
                    &mut decisions,
                );
                continue;
            }
            if Self::monitor_timed_out(latest) {
                self.escalate_deployment(
                    source,
                    latest,
                    "deployment monitoring timed out",
                    &mut decisions,
                );
                continue;
            }

            if self.is_out(model, source) {
                decisions.push(
                    Decision::new(
                        Action::Alert,
                        format!(
                            "'{source}' unreachable for {} consecutive observations",
                            self.config.outage_threshold
                        ),
                        20,
                    )
                    .with_param("severity", json!("critical"))
                    .with_param("title", json!(format!("dependency outage: {source}")))
                    .with_context(json!({
                        "source": source,
                        "last_error": latest.error,
                    })),
                );
                continue;
            }

            if self.is_saturated(model, source) {
                decisions.push(
                    Decision::new(
                        Action::Alert,
                        format!(
                            "'{source}' {} at or above {} for {} observations",
                            self.config.saturation_metric,
                            self.config.saturation_threshold,
                            self.config.saturation_samples
                        ),
                        10,
                    )
                    .with_param("severity", json!("warning"))
                    .with_param("title", json!(format!("saturation: {source}")))
                    .with_context(latest.payload.clone()),
                );
            }
        }

        // Stable sort preserves per-source ordering within equal priorities.
        decisions.sort_by(|a, b| b.priority.cmp(&a.priority));
        decisions
    }
}
