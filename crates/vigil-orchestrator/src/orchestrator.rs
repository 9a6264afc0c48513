//! The Observe-Orient-Decide-Act control loop.
//!
//! One [`Orchestrator`] owns the world model, the deployment records, the
//! audit trail, and a shield per collaborator. Each iteration fans observe
//! calls out concurrently, folds the results into the world model, runs the
//! decision policy, and executes the resulting decisions in priority order.
//! A cancellation token acts as the killswitch: it stops new iterations and
//! new dispatches, while work already in flight runs to completion.

use crate::collaborator::{Collaborator, Notifier, Severity};
use crate::policy::DecisionPolicy;
use crate::router::ActionRouter;
use futures::FutureExt;
use futures::future::join_all;
use serde_json::{Value, json};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vigil_core::audit::{AuditLogEntry, AuditPhase, AuditSink, AuditTrail};
use vigil_core::config::OrchestratorConfig;
use vigil_core::deployment::{DeploymentMonitor, DeploymentRecord, DeploymentStatus};
use vigil_core::error::VigilError;
use vigil_core::model::{Action, ActionOutcome, Decision, Observation, WorldModel};
use vigil_resilience::ShieldRegistry;

#[derive(Default)]
struct Dispatch {
    worker: Option<String>,
    deployment_id: Option<String>,
}

/// The autonomous orchestration core.
pub struct Orchestrator {
    config: OrchestratorConfig,
    collaborators: Vec<Arc<dyn Collaborator>>,
    policy: Arc<dyn DecisionPolicy>,
    router: ActionRouter,
    notifier: Option<Arc<dyn Notifier>>,
    audit: AuditTrail,
    shields: Arc<ShieldRegistry>,
    world: WorldModel,
    deployments: Arc<Mutex<Vec<DeploymentRecord>>>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Assembles an orchestrator from its collaborators and policy.
    ///
    /// Builds the action routing table, one shield per collaborator, and an
    /// empty world model.
    ///
    /// # Errors
    /// Returns a configuration error when `config` fails validation.
    pub fn new(
        config: OrchestratorConfig,
        collaborators: Vec<Arc<dyn Collaborator>>,
        policy: Arc<dyn DecisionPolicy>,
        notifier: Option<Arc<dyn Notifier>>,
        audit_sink: Arc<dyn AuditSink>,
        shutdown: CancellationToken,
    ) -> Result<Self, VigilError> {
        config.validate()?;
        let router = ActionRouter::new(&collaborators);
        let shields = Arc::new(ShieldRegistry::new(
            &config,
            collaborators.iter().map(|c| c.name().to_string()),
        ));
        let world = WorldModel::new(config.world.max_history, config.world.max_age());

        Ok(Self {
            collaborators,
            policy,
            router,
            notifier,
            audit: AuditTrail::new(audit_sink),
            shields,
            world,
            deployments: Arc::new(Mutex::new(Vec::new())),
            shutdown,
            config,
        })
    }

    /// Read access to the world model, for diagnostics and tests.
    #[must_use]
    pub fn world(&self) -> &WorldModel {
        &self.world
    }

    /// Snapshot of all tracked deployment records.
    #[must_use]
    pub fn deployments(&self) -> Vec<DeploymentRecord> {
        self.deployments.lock().unwrap().clone()
    }

    /// Runs the control loop until the killswitch is raised.
    pub async fn run(&mut self) {
        info!(
            poll_interval = ?self.config.poll_interval(),
            collaborators = self.collaborators.len(),
            "Orchestrator started"
        );

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let backoff = match self.run_iteration().await {
                Ok(()) => self.config.poll_interval(),
                Err(e) => {
                    error!(error = %e, "Iteration failed, backing off");
                    self.audit
                        .record(
                            AuditLogEntry::new(AuditPhase::Act, ActionOutcome::Failure)
                                .with_error(e.to_string()),
                        )
                        .await;
                    self.config.error_backoff()
                }
            };

            tokio::select! {
                () = tokio::time::sleep(backoff) => {}
                () = self.shutdown.cancelled() => break,
            }
        }

        info!("Orchestrator stopped");
    }

    /// Runs one full Observe-Orient-Decide-Act iteration.
    ///
    /// Remote failures never surface here; they become error observations or
    /// audited action failures. A panic anywhere in the phases is caught and
    /// returned as [`VigilError::Internal`] so the loop never dies on one;
    /// [`Orchestrator::run`] answers it with a short backoff.
    pub async fn run_iteration(&mut self) -> Result<(), VigilError> {
        match AssertUnwindSafe(self.iteration_phases()).catch_unwind().await {
            Ok(()) => Ok(()),
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "iteration panicked".to_string());
                Err(VigilError::Internal { reason: format!("iteration panicked: {reason}") })
            }
        }
    }

    async fn iteration_phases(&mut self) {
        let observations = self.observe_phase().await;
        self.orient_phase(observations).await;
        let decisions = self.decide_phase().await;
        self.act_phase(decisions).await;
    }

    /// Queries every collaborator concurrently, one task per source.
    ///
    /// A failed or panicked observe becomes an error observation; the phase
    /// itself always yields one observation per collaborator.
    async fn observe_phase(&self) -> Vec<Observation> {
        let mut tasks = Vec::with_capacity(self.collaborators.len());
        for collaborator in &self.collaborators {
            let collaborator = Arc::clone(collaborator);
            let shield = self.shields.shield(collaborator.name());
            tasks.push(tokio::spawn(async move {
                let source = collaborator.name().to_string();
                let result = shield
                    .call(|| {
                        let collaborator = Arc::clone(&collaborator);
                        async move { collaborator.observe().await }
                    })
                    .await;
                match result {
                    Ok(payload) => Observation::ok(source, payload),
                    Err(e) => {
                        warn!(source = %source, error = %e, "Observe failed");
                        Observation::failed(source, e.to_string())
                    }
                }
            }));
        }

        let mut observations = Vec::with_capacity(tasks.len());
        for (task, collaborator) in tasks.into_iter().zip(&self.collaborators) {
            match task.await {
                Ok(observation) => observations.push(observation),
                Err(e) => observations
                    .push(Observation::failed(collaborator.name(), format!("observe task panicked: {e}"))),
            }
        }

        let failures = observations.iter().filter(|o| o.is_error()).count();
        self.audit
            .record(
                AuditLogEntry::new(AuditPhase::Observe, ActionOutcome::Success)
                    .with_params(json!({ "sources": observations.len(), "failures": failures })),
            )
            .await;
        observations
    }

    /// Folds observations into the world model and keeps deployment records
    /// in step with observed rollout status.
    async fn orient_phase(&mut self, observations: Vec<Observation>) {
        for observation in observations {
            self.track_deployment(&observation).await;
            self.world.update(observation);
        }
        self.audit
            .record(
                AuditLogEntry::new(AuditPhase::Orient, ActionOutcome::Success)
                    .with_params(json!({ "history": self.world.history_len() })),
            )
            .await;
    }

    async fn track_deployment(&self, observation: &Observation) {
        let Some(id) = observation.payload.get("deployment_id").and_then(Value::as_str) else {
            return;
        };
        let Some(status_str) = observation.payload.get("status").and_then(Value::as_str) else {
            return;
        };
        let status = match status_str.parse::<DeploymentStatus>() {
            Ok(status) => status,
            Err(e) => {
                warn!(source = %observation.source, error = %e, "Ignoring unparseable deployment status");
                return;
            }
        };

        // Apply the transition under the lock, audit after releasing it.
        let applied = {
            let mut deployments = self.deployments.lock().unwrap();
            if let Some(record) = deployments.iter_mut().find(|r| r.id == id) {
                if record.status == status {
                    None
                } else if record.status.is_terminal() {
                    // Observed drift past a terminal state is data, not a
                    // contract violation; the policy reacts to the payload.
                    debug!(
                        deployment_id = id,
                        recorded = %record.status,
                        observed = %status,
                        "Ignoring status drift on terminal deployment record"
                    );
                    None
                } else {
                    Some(record.transition(status))
                }
            } else {
                let mut metadata = serde_json::Map::new();
                metadata.insert("source".to_string(), json!(observation.source));
                let mut record = DeploymentRecord::with_id(id, metadata);
                let result = if status == DeploymentStatus::Initializing {
                    Ok(())
                } else {
                    record.transition(status)
                };
                deployments.push(record);
                Some(result)
            }
        };

        match applied {
            Some(Ok(())) if status.is_healthy() => {
                info!(deployment_id = id, "Deployment became active");
                self.audit
                    .record(
                        AuditLogEntry::new(AuditPhase::Orient, ActionOutcome::Success)
                            .with_action("deployment_complete")
                            .with_deployment_id(id),
                    )
                    .await;
            }
            Some(Err(e)) => {
                self.audit
                    .record(
                        AuditLogEntry::new(AuditPhase::Orient, ActionOutcome::Failure)
                            .with_deployment_id(id)
                            .with_error(e.to_string()),
                    )
                    .await;
            }
            _ => {}
        }
    }

    /// Runs the decision policy over the current world model.
    async fn decide_phase(&self) -> Vec<Decision> {
        let decisions = self.policy.decide(&self.world);
        debug!(count = decisions.len(), "Policy produced decisions");
        self.audit
            .record(
                AuditLogEntry::new(AuditPhase::Decide, ActionOutcome::Success)
                    .with_params(json!({ "decisions": decisions.len() })),
            )
            .await;
        decisions
    }

    /// Executes decisions in descending priority order.
    ///
    /// Equal-priority decisions are independent and run concurrently; a
    /// higher-priority group always completes before the next group starts.
    async fn act_phase(&self, mut decisions: Vec<Decision>) {
        decisions.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut start = 0;
        while start < decisions.len() {
            if self.shutdown.is_cancelled() {
                info!(remaining = decisions.len() - start, "Killswitch raised, dropping remaining decisions");
                break;
            }
            let priority = decisions[start].priority;
            let end = start
                + decisions[start..].iter().take_while(|d| d.priority == priority).count();
            join_all(decisions[start..end].iter().map(|d| self.execute_decision(d))).await;
            start = end;
        }
    }

    async fn execute_decision(&self, decision: &Decision) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!(
            action = decision.action.as_str(),
            priority = decision.priority,
            reasoning = %decision.reasoning,
            "Executing decision"
        );

        let dispatched = match decision.action {
            Action::Alert => self.dispatch_alert(decision).await.map(|()| Dispatch::default()),
            action => self.dispatch_remote(action, decision).await,
        };

        let outcome = match &dispatched {
            Ok(_) => ActionOutcome::Success,
            Err(VigilError::MonitorTimeout { .. }) => ActionOutcome::Timeout,
            Err(_) => ActionOutcome::Failure,
        };

        let mut entry = AuditLogEntry::new(AuditPhase::Act, outcome)
            .with_action(decision.action.as_str())
            .with_params(Value::Object(decision.parameters.clone()));
        match dispatched {
            Ok(dispatch) => {
                if let Some(worker) = dispatch.worker {
                    entry = entry.with_worker(worker);
                }
                if let Some(id) = dispatch.deployment_id {
                    entry = entry.with_deployment_id(id);
                }
            }
            Err(e) => {
                warn!(action = decision.action.as_str(), error = %e, "Action failed");
                entry = entry.with_error(e.to_string());
                if let Some(id) = decision.parameters.get("deployment_id").and_then(Value::as_str)
                {
                    entry = entry.with_deployment_id(id);
                }
            }
        }
        self.audit.record(entry).await;

        if decision.critical && decision.action != Action::Alert {
            self.notify_outcome(decision, outcome).await;
        }
    }

    /// Routes an action to its collaborator and runs it through the
    /// collaborator's shield.
    async fn dispatch_remote(
        &self,
        action: Action,
        decision: &Decision,
    ) -> Result<Dispatch, VigilError> {
        let collaborator = self.router.route(action)?;
        let shield = self.shields.shield(collaborator.name());
        let worker = collaborator.name().to_string();
        let params = decision.parameters.clone();

        let response = shield
            .call(|| {
                let collaborator = Arc::clone(&collaborator);
                let params = params.clone();
                async move { collaborator.execute(action, &params).await }
            })
            .await?;

        let deployment_id = match action {
            Action::Rollback => Some(self.record_rollback(decision)),
            Action::Deploy => self.track_new_deployment(&collaborator, &response),
            _ => None,
        };
        Ok(Dispatch { worker: Some(worker), deployment_id })
    }

    /// Delivers an alert, preferring a collaborator that claims the action
    /// and falling back to the out-of-band notifier.
    async fn dispatch_alert(&self, decision: &Decision) -> Result<(), VigilError> {
        if self.router.handles(Action::Alert) {
            return self.dispatch_remote(Action::Alert, decision).await.map(|_| ());
        }
        let Some(notifier) = &self.notifier else {
            return Err(VigilError::UnknownAction { action: Action::Alert.as_str().to_string() });
        };

        let severity = decision
            .parameters
            .get("severity")
            .and_then(Value::as_str)
            .map_or(Severity::Warning, Severity::parse_or_warning);
        let title = decision
            .parameters
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("orchestrator alert");
        notifier.notify(severity, title, &decision.reasoning, &decision.context).await
    }

    /// Supersedes the rolled-back record with a fresh one and returns the
    /// replacement's id. The failed record is kept for the audit trail.
    fn record_rollback(&self, decision: &Decision) -> String {
        let target = decision.parameters.get("deployment_id").and_then(Value::as_str);
        let mut deployments = self.deployments.lock().unwrap();

        let replacement = deployments
            .iter()
            .rev()
            .find(|r| target.map_or_else(|| r.should_rollback(), |id| r.id == id))
            .map_or_else(
                || {
                    // Rolling back a rollout the core never tracked.
                    let mut metadata = serde_json::Map::new();
                    if let Some(id) = target {
                        metadata.insert("rolled_back_from".to_string(), json!(id));
                    }
                    DeploymentRecord::new(metadata)
                },
                DeploymentRecord::superseded_by_rollback,
            );
        info!(
            replacement_id = %replacement.id,
            rolled_back = ?target,
            "Rollback superseded deployment record"
        );

        let id = replacement.id.clone();
        deployments.push(replacement);
        id
    }

    /// Starts tracking a freshly triggered rollout and spawns its monitor.
    fn track_new_deployment(
        &self,
        collaborator: &Arc<dyn Collaborator>,
        response: &Value,
    ) -> Option<String> {
        let id = response.get("deployment_id").and_then(Value::as_str)?;
        {
            let mut deployments = self.deployments.lock().unwrap();
            if !deployments.iter().any(|r| r.id == id) {
                let mut metadata = serde_json::Map::new();
                metadata.insert("source".to_string(), json!(collaborator.name()));
                deployments.push(DeploymentRecord::with_id(id, metadata));
            }
        }
        self.spawn_monitor(Arc::clone(collaborator), id.to_string());
        Some(id.to_string())
    }

    /// Watches one rollout in the background until it reaches a terminal
    /// state or the monitoring deadline elapses. Polls go through the
    /// collaborator's shield like every other outbound call, so an open
    /// circuit stops the monitor from hammering the dependency too.
    fn spawn_monitor(&self, collaborator: Arc<dyn Collaborator>, deployment_id: String) {
        let monitor = DeploymentMonitor::new(
            self.config.monitor.poll_interval(),
            self.config.monitor.timeout(),
        );
        let shield = self.shields.shield(collaborator.name());
        let audit = self.audit.clone();
        let notifier = self.notifier.clone();
        let deployments = Arc::clone(&self.deployments);

        tokio::spawn(async move {
            let poll_target = Arc::clone(&collaborator);
            let result = monitor
                .wait_for_terminal(|| {
                    let collaborator = Arc::clone(&poll_target);
                    let shield = Arc::clone(&shield);
                    async move {
                        let payload = shield
                            .call(|| {
                                let collaborator = Arc::clone(&collaborator);
                                async move { collaborator.observe().await }
                            })
                            .await?;
                        payload
                            .get("status")
                            .and_then(Value::as_str)
                            .ok_or_else(|| VigilError::Persistent {
                                reason: "deployment observation missing 'status'".to_string(),
                            })?
                            .parse()
                    }
                })
                .await;

            match result {
                Ok(status) => {
                    {
                        let mut deployments = deployments.lock().unwrap();
                        if let Some(record) =
                            deployments.iter_mut().find(|r| r.id == deployment_id)
                        {
                            if record.status != status && !record.status.is_terminal() {
                                let _ = record.transition(status);
                            }
                        }
                    }
                    if status.is_healthy() {
                        info!(deployment_id = %deployment_id, "Deployment became active");
                        audit
                            .record(
                                AuditLogEntry::new(AuditPhase::Act, ActionOutcome::Success)
                                    .with_action("deployment_complete")
                                    .with_deployment_id(deployment_id.clone()),
                            )
                            .await;
                    } else {
                        warn!(deployment_id = %deployment_id, status = %status, "Deployment ended unhealthy");
                        audit
                            .record(
                                AuditLogEntry::new(AuditPhase::Act, ActionOutcome::Failure)
                                    .with_action("deployment_complete")
                                    .with_deployment_id(deployment_id.clone())
                                    .with_error(format!("terminal status '{status}'")),
                            )
                            .await;
                    }
                }
                Err(e) => {
                    error!(deployment_id = %deployment_id, error = %e, "Deployment monitoring gave up");
                    audit
                        .record(
                            AuditLogEntry::new(AuditPhase::Act, ActionOutcome::Timeout)
                                .with_action("deployment_complete")
                                .with_deployment_id(deployment_id.clone())
                                .with_error(e.to_string()),
                        )
                        .await;
                    if let Some(notifier) = &notifier {
                        let message = format!(
                            "deployment '{deployment_id}' did not reach a terminal state: {e}"
                        );
                        let context = json!({ "deployment_id": deployment_id });
                        if let Err(e) = notifier
                            .notify(
                                Severity::Critical,
                                "deployment monitoring timed out",
                                &message,
                                &context,
                            )
                            .await
                        {
                            warn!(error = %e, "Alert delivery failed");
                        }
                    }
                }
            }
        });
    }

    /// Tells the notifier how a critical decision ended. Delivery failures
    /// are logged and dropped.
    async fn notify_outcome(&self, decision: &Decision, outcome: ActionOutcome) {
        let Some(notifier) = &self.notifier else { return };
        let severity = if outcome == ActionOutcome::Success {
            Severity::Info
        } else {
            Severity::Critical
        };
        let title = format!("{} {}", decision.action, outcome);
        if let Err(e) =
            notifier.notify(severity, &title, &decision.reasoning, &decision.context).await
        {
            warn!(error = %e, "Alert delivery failed");
        }
    }
}
