//! End-to-end loop scenarios driven through scripted collaborators.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vigil_core::audit::{AuditPhase, MemoryAuditSink};
use vigil_core::config::OrchestratorConfig;
use vigil_core::deployment::DeploymentStatus;
use vigil_core::error::VigilError;
use vigil_core::model::{Action, ActionOutcome, Decision, WorldModel};
use vigil_orchestrator::{
    Collaborator, DecisionPolicy, Notifier, Orchestrator, Severity, StandardPolicy,
};

/// A collaborator that replays a scripted sequence of observations; the last
/// one repeats. Executed actions are recorded for assertions.
struct ScriptedCollaborator {
    name: String,
    actions: Vec<Action>,
    observations: Mutex<VecDeque<Result<Value, VigilError>>>,
    observed: AtomicUsize,
    execute_response: Mutex<Value>,
    executed: Mutex<Vec<(Action, Map<String, Value>)>>,
}

impl ScriptedCollaborator {
    fn new(
        name: &str,
        actions: Vec<Action>,
        observations: Vec<Result<Value, VigilError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            actions,
            observations: Mutex::new(observations.into()),
            observed: AtomicUsize::new(0),
            execute_response: Mutex::new(json!({ "ok": true })),
            executed: Mutex::new(Vec::new()),
        })
    }

    fn set_execute_response(&self, response: Value) {
        *self.execute_response.lock().unwrap() = response;
    }

    fn observe_count(&self) -> usize {
        self.observed.load(Ordering::SeqCst)
    }

    fn executed(&self) -> Vec<(Action, Map<String, Value>)> {
        self.executed.lock().unwrap().clone()
    }

    fn executed_actions(&self) -> Vec<Action> {
        self.executed().into_iter().map(|(action, _)| action).collect()
    }
}

#[async_trait]
impl Collaborator for ScriptedCollaborator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn observe(&self) -> Result<Value, VigilError> {
        self.observed.fetch_add(1, Ordering::SeqCst);
        let mut observations = self.observations.lock().unwrap();
        if observations.len() > 1 {
            observations.pop_front().unwrap()
        } else {
            observations.front().cloned().unwrap_or_else(|| Ok(json!({})))
        }
    }

    fn supported_actions(&self) -> &[Action] {
        &self.actions
    }

    async fn execute(
        &self,
        action: Action,
        params: &Map<String, Value>,
    ) -> Result<Value, VigilError> {
        self.executed.lock().unwrap().push((action, params.clone()));
        Ok(self.execute_response.lock().unwrap().clone())
    }
}

/// A policy whose evaluation blows up, for panic-containment coverage.
struct PanickingPolicy;

impl DecisionPolicy for PanickingPolicy {
    fn decide(&self, _model: &WorldModel) -> Vec<Decision> {
        panic!("rule evaluation exploded")
    }
}

/// Proposes a single deployment on the first cycle, then nothing.
#[derive(Default)]
struct DeployOncePolicy {
    fired: AtomicBool,
}

impl DecisionPolicy for DeployOncePolicy {
    fn decide(&self, _model: &WorldModel) -> Vec<Decision> {
        if self.fired.swap(true, Ordering::SeqCst) {
            Vec::new()
        } else {
            vec![Decision::new(Action::Deploy, "scheduled release", 30)]
        }
    }
}

#[derive(Default)]
struct RecordingNotifier {
    notes: Mutex<Vec<(Severity, String)>>,
}

impl RecordingNotifier {
    fn notes(&self) -> Vec<(Severity, String)> {
        self.notes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        severity: Severity,
        title: &str,
        _message: &str,
        _context: &Value,
    ) -> Result<(), VigilError> {
        self.notes.lock().unwrap().push((severity, title.to_string()));
        Ok(())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config with no meaningful backoff so tests run in milliseconds.
fn fast_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.poll_interval_secs = 1;
    config.call_timeout_secs = 5;
    config.retry.max_attempts = 1;
    config.retry.base_delay_ms = 1;
    config.retry.jitter_ms = 1;
    config.breaker.failure_threshold = 100;
    config
}

fn build(
    collaborators: Vec<Arc<dyn Collaborator>>,
    notifier: Option<Arc<dyn Notifier>>,
    sink: Arc<MemoryAuditSink>,
    shutdown: CancellationToken,
) -> Orchestrator {
    init_tracing();
    Orchestrator::new(
        fast_config(),
        collaborators,
        Arc::new(StandardPolicy::default()),
        notifier,
        sink,
        shutdown,
    )
    .unwrap()
}

#[tokio::test]
async fn test_observed_rollout_completes_without_intervention() {
    let deploy = ScriptedCollaborator::new(
        "deploy-platform",
        vec![Action::Deploy, Action::Rollback],
        vec![
            Ok(json!({ "deployment_id": "dep-1", "status": "initializing" })),
            Ok(json!({ "deployment_id": "dep-1", "status": "building" })),
            Ok(json!({ "deployment_id": "dep-1", "status": "deploying" })),
            Ok(json!({ "deployment_id": "dep-1", "status": "active" })),
        ],
    );
    let git = ScriptedCollaborator::new(
        "source-control",
        vec![Action::CreateIssue, Action::MergeRequest],
        vec![Ok(json!({ "open_issues": 0 }))],
    );
    let sink = Arc::new(MemoryAuditSink::new());
    let collaborators: Vec<Arc<dyn Collaborator>> = vec![deploy.clone(), git.clone()];
    let mut orchestrator = build(collaborators, None, sink.clone(), CancellationToken::new());

    for _ in 0..4 {
        orchestrator.run_iteration().await.unwrap();
    }

    // A healthy rollout requires no actions at all.
    assert!(deploy.executed().is_empty());
    assert!(git.executed().is_empty());

    let completions: Vec<_> = sink
        .entries()
        .into_iter()
        .filter(|e| e.action.as_deref() == Some("deployment_complete"))
        .collect();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].result, ActionOutcome::Success);
    assert_eq!(completions[0].deployment_id.as_deref(), Some("dep-1"));

    let records = orchestrator.deployments();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "dep-1");
    assert_eq!(records[0].status, DeploymentStatus::Active);
}

#[tokio::test]
async fn test_failed_deployment_triggers_rollback_issue_and_notification() {
    let deploy = ScriptedCollaborator::new(
        "deploy-platform",
        vec![Action::Deploy, Action::Rollback],
        vec![Ok(json!({ "deployment_id": "dep-9", "status": "failed" }))],
    );
    let git = ScriptedCollaborator::new(
        "source-control",
        vec![Action::CreateIssue, Action::MergeRequest],
        vec![Ok(json!({}))],
    );
    let notifier = Arc::new(RecordingNotifier::default());
    let sink = Arc::new(MemoryAuditSink::new());
    let collaborators: Vec<Arc<dyn Collaborator>> = vec![deploy.clone(), git.clone()];
    let mut orchestrator =
        build(collaborators, Some(notifier.clone()), sink.clone(), CancellationToken::new());

    orchestrator.run_iteration().await.unwrap();

    // The platform rolled back; source control got the incident issue.
    assert_eq!(deploy.executed_actions(), vec![Action::Rollback]);
    assert_eq!(git.executed_actions(), vec![Action::CreateIssue]);

    // The higher-priority rollback is audited before the issue.
    let acts: Vec<_> = sink
        .entries()
        .into_iter()
        .filter(|e| e.phase == AuditPhase::Act && e.action.is_some())
        .collect();
    assert_eq!(acts.len(), 2);
    assert_eq!(acts[0].action.as_deref(), Some("rollback"));
    assert_eq!(acts[0].result, ActionOutcome::Success);
    assert_eq!(acts[1].action.as_deref(), Some("create_issue"));

    // The failed record is superseded, never mutated.
    let records = orchestrator.deployments();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id, "dep-9");
    assert_eq!(records[0].status, DeploymentStatus::Failed);
    assert_eq!(records[1].status, DeploymentStatus::Initializing);
    assert_eq!(records[1].metadata["rolled_back_from"], json!("dep-9"));

    // The critical rollback reported its outcome out-of-band.
    let notes = notifier.notes();
    assert!(notes.iter().any(|(severity, title)| {
        *severity == Severity::Info && title.contains("rollback")
    }));
}

#[tokio::test]
async fn test_unreachable_collaborator_becomes_error_observation() {
    let flaky = ScriptedCollaborator::new(
        "workflow",
        vec![Action::ExecuteWorkflow],
        vec![Err(VigilError::Transient { reason: "connection refused".to_string() })],
    );
    let git = ScriptedCollaborator::new(
        "source-control",
        vec![Action::CreateIssue],
        vec![Ok(json!({ "open_issues": 1 }))],
    );
    let sink = Arc::new(MemoryAuditSink::new());
    let collaborators: Vec<Arc<dyn Collaborator>> = vec![flaky.clone(), git.clone()];
    let mut orchestrator = build(collaborators, None, sink.clone(), CancellationToken::new());

    orchestrator.run_iteration().await.unwrap();

    // The failure is data in the world model, not a loop crash.
    let world = orchestrator.world();
    assert!(world.latest("workflow").unwrap().is_error());
    assert!(!world.latest("source-control").unwrap().is_error());

    // The iteration still ran every phase.
    let phases: Vec<AuditPhase> = sink.entries().iter().map(|e| e.phase).collect();
    assert!(phases.contains(&AuditPhase::Observe));
    assert!(phases.contains(&AuditPhase::Orient));
    assert!(phases.contains(&AuditPhase::Decide));
}

#[tokio::test]
async fn test_sustained_outage_alerts_through_notifier() {
    let flaky = ScriptedCollaborator::new(
        "workflow",
        Vec::new(),
        vec![Err(VigilError::Transient { reason: "connection refused".to_string() })],
    );
    let notifier = Arc::new(RecordingNotifier::default());
    let sink = Arc::new(MemoryAuditSink::new());
    let collaborators: Vec<Arc<dyn Collaborator>> = vec![flaky.clone()];
    let mut orchestrator =
        build(collaborators, Some(notifier.clone()), sink, CancellationToken::new());

    for _ in 0..3 {
        orchestrator.run_iteration().await.unwrap();
    }

    let notes = notifier.notes();
    assert!(notes.iter().any(|(severity, title)| {
        *severity == Severity::Critical && title == "dependency outage: workflow"
    }));
}

#[tokio::test]
async fn test_unroutable_action_fails_that_operation_only() {
    // The platform reports a crash but nobody claims the rollback action.
    let deploy = ScriptedCollaborator::new(
        "deploy-platform",
        vec![Action::Deploy],
        vec![Ok(json!({ "deployment_id": "dep-2", "status": "crashed" }))],
    );
    let git = ScriptedCollaborator::new(
        "source-control",
        vec![Action::CreateIssue],
        vec![Ok(json!({}))],
    );
    let sink = Arc::new(MemoryAuditSink::new());
    let collaborators: Vec<Arc<dyn Collaborator>> = vec![deploy.clone(), git.clone()];
    let mut orchestrator = build(collaborators, None, sink.clone(), CancellationToken::new());

    orchestrator.run_iteration().await.unwrap();

    let acts: Vec<_> = sink
        .entries()
        .into_iter()
        .filter(|e| e.phase == AuditPhase::Act && e.action.is_some())
        .collect();
    let rollback = acts.iter().find(|e| e.action.as_deref() == Some("rollback")).unwrap();
    assert_eq!(rollback.result, ActionOutcome::Failure);
    assert!(rollback.error_message.as_deref().unwrap().contains("unknown action"));

    // The lower-priority issue still went out.
    assert_eq!(git.executed_actions(), vec![Action::CreateIssue]);
}

#[tokio::test]
async fn test_policy_panic_is_contained_as_internal_error() {
    init_tracing();
    let deploy =
        ScriptedCollaborator::new("deploy-platform", vec![Action::Deploy], vec![Ok(json!({}))]);
    let sink = Arc::new(MemoryAuditSink::new());
    let collaborators: Vec<Arc<dyn Collaborator>> = vec![deploy];
    let mut orchestrator = Orchestrator::new(
        fast_config(),
        collaborators,
        Arc::new(PanickingPolicy),
        None,
        sink,
        CancellationToken::new(),
    )
    .unwrap();

    let err = orchestrator.run_iteration().await.unwrap_err();
    assert!(matches!(err, VigilError::Internal { .. }));
    assert!(err.to_string().contains("rule evaluation exploded"));

    // The orchestrator stays usable; the next cycle fails just as cleanly.
    let err = orchestrator.run_iteration().await.unwrap_err();
    assert!(matches!(err, VigilError::Internal { .. }));
}

#[tokio::test]
async fn test_monitor_polls_go_through_the_shield() {
    init_tracing();
    let deploy = ScriptedCollaborator::new(
        "deploy-platform",
        vec![Action::Deploy],
        vec![
            Ok(json!({})),
            Err(VigilError::Transient { reason: "connection reset".to_string() }),
        ],
    );
    deploy.set_execute_response(json!({ "deployment_id": "dep-5" }));

    let mut config = fast_config();
    config.breaker.failure_threshold = 1;
    config.monitor.poll_interval_secs = 0;
    config.monitor.timeout_secs = 1;
    let sink = Arc::new(MemoryAuditSink::new());
    let collaborators: Vec<Arc<dyn Collaborator>> = vec![deploy.clone()];
    let mut orchestrator = Orchestrator::new(
        config,
        collaborators,
        Arc::new(DeployOncePolicy::default()),
        None,
        sink.clone(),
        CancellationToken::new(),
    )
    .unwrap();

    orchestrator.run_iteration().await.unwrap();
    assert_eq!(deploy.executed_actions(), vec![Action::Deploy]);

    // Wait for the spawned monitor to give up at its deadline.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let timed_out = sink.entries().iter().any(|e| {
            e.action.as_deref() == Some("deployment_complete")
                && e.result == ActionOutcome::Timeout
        });
        if timed_out {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "monitor never gave up");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // One observe in the Observe phase plus the single failing poll that
    // opened the circuit; every later poll failed fast at the breaker
    // instead of reaching the remote.
    assert_eq!(deploy.observe_count(), 2);
}

#[tokio::test]
async fn test_killswitch_stops_loop_before_any_work() {
    let deploy = ScriptedCollaborator::new(
        "deploy-platform",
        vec![Action::Deploy],
        vec![Ok(json!({ "deployment_id": "dep-1", "status": "failed" }))],
    );
    let sink = Arc::new(MemoryAuditSink::new());
    let shutdown = CancellationToken::new();
    shutdown.cancel();
    let collaborators: Vec<Arc<dyn Collaborator>> = vec![deploy.clone()];
    let mut orchestrator = build(collaborators, None, sink.clone(), shutdown);

    orchestrator.run().await;

    assert!(deploy.executed().is_empty());
    assert!(sink.entries().is_empty());
}
