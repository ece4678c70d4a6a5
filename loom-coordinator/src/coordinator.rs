//! Execution coordinator
//!
//! Owns the execution table and drives each execution through its stages:
//! analyzing the intent, provisioning an instance, running the pipeline, and
//! tearing down. Component events arrive on an mpsc channel; observers get
//! coarse execution events on a broadcast channel.
//!
//! The coordinator is the only writer of execution records. Subordinate
//! components are addressed by id, so a terminal execution can always release
//! whatever its components still hold.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use loom_core::domain::execution::{Execution, ExecutionProgress, ExecutionStatus};
use loom_core::domain::instance::VmInstance;
use loom_core::domain::pipeline::{Pipeline, PipelineProgress};
use loom_core::event::{CoreEvent, ExecutionEvent, InstanceEvent, PipelineEvent};
use loom_pipeline::PipelineEngine;
use loom_provision::InstanceManager;
use loom_target::TargetRef;

use crate::error::CoordinatorError;
use crate::extraction::SpecGenerator;

/// Stage percentages. Task execution fills the range between the executing
/// base and completion.
const ANALYZING_PERCENT: u8 = 10;
const PROVISIONING_PERCENT: u8 = 30;
const EXECUTING_BASE_PERCENT: u8 = 60;
const EXECUTING_SPAN: u8 = 35;

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Deadline for requirement extraction
    pub extraction_timeout: Duration,

    /// Grace period between pipeline completion and instance termination
    pub termination_cooldown: Duration,

    /// Capacity of the outward broadcast channel
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            extraction_timeout: Duration::from_secs(30),
            termination_cooldown: Duration::from_secs(300),
            event_capacity: 256,
        }
    }
}

/// Point-in-time view of an execution and its components
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSnapshot {
    pub execution: Execution,
    pub instance: Option<VmInstance>,
    pub pipeline: Option<Pipeline>,
}

#[derive(Default)]
struct Routes {
    /// instance id -> execution id
    instances: HashMap<Uuid, Uuid>,
    /// pipeline id -> execution id
    pipelines: HashMap<Uuid, Uuid>,
}

struct CoordInner {
    executions: Mutex<HashMap<Uuid, Execution>>,
    routes: Mutex<Routes>,
    provisioner: InstanceManager,
    engine: PipelineEngine,
    generator: Arc<dyn SpecGenerator>,
    outward: broadcast::Sender<ExecutionEvent>,
    config: CoordinatorConfig,
}

/// Execution coordinator
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordInner>,
}

impl Coordinator {
    /// Builds the coordinator and starts consuming component events from
    /// `events`.
    pub fn new(
        provisioner: InstanceManager,
        engine: PipelineEngine,
        generator: Arc<dyn SpecGenerator>,
        events: mpsc::UnboundedReceiver<CoreEvent>,
        config: CoordinatorConfig,
    ) -> Self {
        let (outward, _) = broadcast::channel(config.event_capacity);
        let coordinator = Self {
            inner: Arc::new(CoordInner {
                executions: Mutex::new(HashMap::new()),
                routes: Mutex::new(Routes::default()),
                provisioner,
                engine,
                generator,
                outward,
                config,
            }),
        };

        let listener = coordinator.clone();
        tokio::spawn(async move {
            listener.event_loop(events).await;
        });

        coordinator
    }

    /// Subscribes to the outward execution event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.inner.outward.subscribe()
    }

    /// Begins a new execution for `intent`. Returns the record in Analyzing
    /// state; everything after that is observable through [`Self::status`]
    /// and the event stream.
    pub fn start_execution(&self, session_id: &str, user_id: &str, intent: &str) -> Execution {
        let now = Utc::now();
        let execution = Execution {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            intent: intent.to_string(),
            status: ExecutionStatus::Analyzing,
            spec: None,
            instance_id: None,
            pipeline_id: None,
            progress: ExecutionProgress::new("analyzing", ANALYZING_PERCENT),
            created_at: now,
            updated_at: now,
            finished_at: None,
        };

        self.inner
            .executions
            .lock()
            .unwrap()
            .insert(execution.id, execution.clone());

        info!(execution_id = %execution.id, "execution started");
        self.broadcast(ExecutionEvent::Started {
            execution_id: execution.id,
            intent: intent.to_string(),
        });

        let coordinator = self.clone();
        let id = execution.id;
        let intent = intent.to_string();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            coordinator.analyze(id, intent, session_id).await;
        });

        execution
    }

    /// Pauses a running execution's pipeline. Provisioning cannot be paused.
    pub fn pause(&self, id: Uuid) -> Result<bool, CoordinatorError> {
        let pipeline_id = self.executing_pipeline(id)?;
        Ok(self.inner.engine.pause(pipeline_id)?)
    }

    /// Resumes a paused execution's pipeline.
    pub fn resume(&self, id: Uuid) -> Result<bool, CoordinatorError> {
        let pipeline_id = self.executing_pipeline(id)?;
        Ok(self.inner.engine.resume(pipeline_id)?)
    }

    /// Cancels an execution: the pipeline stops scheduling new tasks and the
    /// instance is terminated. Returns false when the execution was already
    /// terminal, so repeated cancels are harmless.
    pub async fn cancel(&self, id: Uuid) -> Result<bool, CoordinatorError> {
        let (pipeline_id, instance_id) = {
            let mut executions = self.inner.executions.lock().unwrap();
            let execution = executions.get_mut(&id).ok_or(CoordinatorError::NotFound(id))?;
            if execution.status.is_terminal() {
                return Ok(false);
            }
            let now = Utc::now();
            execution.status = ExecutionStatus::Failed;
            execution.progress.stage = "cancelled".to_string();
            execution.progress.current_task = None;
            execution.finished_at = Some(now);
            execution.updated_at = now;
            (execution.pipeline_id, execution.instance_id)
        };

        info!(execution_id = %id, "execution cancelled");

        if let Some(pipeline_id) = pipeline_id {
            // Park the pipeline terminally so its target binding is released;
            // one that already finished on its own is fine
            if let Err(err) = self.inner.engine.abort(pipeline_id) {
                debug!(execution_id = %id, "pipeline abort on cancel: {err}");
            }
        }
        if let Some(instance_id) = instance_id {
            if let Err(err) = self.inner.provisioner.terminate(instance_id).await {
                warn!(execution_id = %id, "instance teardown on cancel failed: {err}");
            }
        }

        self.broadcast(ExecutionEvent::Cancelled { execution_id: id });
        Ok(true)
    }

    /// Current view of an execution together with its instance and pipeline.
    pub fn status(&self, id: Uuid) -> Option<ExecutionSnapshot> {
        let execution = self.inner.executions.lock().unwrap().get(&id).cloned()?;
        let instance = execution
            .instance_id
            .and_then(|instance_id| self.inner.provisioner.get_status(instance_id));
        let pipeline = execution
            .pipeline_id
            .and_then(|pipeline_id| self.inner.engine.get(pipeline_id));
        Some(ExecutionSnapshot {
            execution,
            instance,
            pipeline,
        })
    }

    /// All executions started under a session, newest first.
    pub fn list_for_session(&self, session_id: &str) -> Vec<Execution> {
        let mut executions: Vec<Execution> = self
            .inner
            .executions
            .lock()
            .unwrap()
            .values()
            .filter(|execution| execution.session_id == session_id)
            .cloned()
            .collect();
        executions.sort_by_key(|execution| std::cmp::Reverse(execution.created_at));
        executions
    }

    fn executing_pipeline(&self, id: Uuid) -> Result<Uuid, CoordinatorError> {
        let executions = self.inner.executions.lock().unwrap();
        let execution = executions.get(&id).ok_or(CoordinatorError::NotFound(id))?;
        match (execution.status, execution.pipeline_id) {
            (ExecutionStatus::Executing, Some(pipeline_id)) => Ok(pipeline_id),
            (status, _) => Err(CoordinatorError::InvalidState {
                id,
                status,
                expected: "executing",
            }),
        }
    }

    async fn analyze(&self, id: Uuid, intent: String, session_id: String) {
        let generated = tokio::time::timeout(
            self.inner.config.extraction_timeout,
            self.inner.generator.generate(&intent, &session_id),
        )
        .await;

        let spec = match generated {
            Err(_) => {
                self.fail(id, "requirement extraction timed out".to_string());
                return;
            }
            Ok(Err(err)) => {
                self.fail(id, format!("requirement extraction failed: {err}"));
                return;
            }
            Ok(Ok(None)) => {
                self.fail(
                    id,
                    "requirement extraction produced no specification".to_string(),
                );
                return;
            }
            Ok(Ok(Some(spec))) => spec,
        };

        let progress = {
            let mut executions = self.inner.executions.lock().unwrap();
            match executions.get_mut(&id) {
                Some(execution) if !execution.status.is_terminal() => {
                    execution.spec = Some(spec.clone());
                    execution.status = ExecutionStatus::Provisioning;
                    execution.progress =
                        ExecutionProgress::new("provisioning", PROVISIONING_PERCENT);
                    execution.updated_at = Utc::now();
                    Some(execution.progress.clone())
                }
                // Cancelled while analyzing
                _ => None,
            }
        };
        let Some(progress) = progress else { return };

        debug!(
            execution_id = %id,
            requirements = spec.requirements.len(),
            "specification extracted"
        );
        self.broadcast(ExecutionEvent::Progress {
            execution_id: id,
            progress,
        });

        let instance = self.inner.provisioner.create_for_project(&spec);

        let cancelled_meanwhile = {
            let mut executions = self.inner.executions.lock().unwrap();
            match executions.get_mut(&id) {
                Some(execution) if !execution.status.is_terminal() => {
                    execution.instance_id = Some(instance.id);
                    execution.updated_at = Utc::now();
                    false
                }
                _ => true,
            }
        };
        if cancelled_meanwhile {
            let _ = self.inner.provisioner.terminate(instance.id).await;
            return;
        }

        // The route must exist before bring-up can emit anything, or its
        // events would find no execution to land on.
        self.inner
            .routes
            .lock()
            .unwrap()
            .instances
            .insert(instance.id, id);
        if let Err(err) = self.inner.provisioner.start_bringup(instance.id) {
            // Terminated between the route insert and here; the cancel path
            // already tore the instance down.
            debug!(execution_id = %id, "bring-up not started: {err}");
        }
    }

    async fn event_loop(&self, mut events: mpsc::UnboundedReceiver<CoreEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                CoreEvent::Instance(event) => self.on_instance_event(event).await,
                CoreEvent::Pipeline(event) => self.on_pipeline_event(event).await,
            }
        }
        debug!("component event channel closed, coordinator loop exiting");
    }

    async fn on_instance_event(&self, event: InstanceEvent) {
        match event {
            // The coordinator created the instance itself; nothing to route
            InstanceEvent::ProvisioningStarted { .. } => {}
            InstanceEvent::StepCompleted { instance_id, step } => {
                self.on_bringup_step(instance_id, &step);
            }
            InstanceEvent::ProvisioningSucceeded { instance } => {
                self.begin_executing(instance).await;
            }
            InstanceEvent::ProvisioningFailed { instance, error } => {
                if let Some(execution_id) = self.execution_for_instance(instance.id) {
                    // Nothing was accomplished: the progress resets to zero
                    {
                        let mut executions = self.inner.executions.lock().unwrap();
                        if let Some(execution) = executions.get_mut(&execution_id) {
                            if !execution.status.is_terminal() {
                                execution.progress.percent = 0;
                                execution.progress.current_task = None;
                            }
                        }
                    }
                    self.fail(execution_id, format!("provisioning failed: {error}"));
                }
            }
            InstanceEvent::Terminated { instance_id, cost } => {
                debug!(%instance_id, cost, "instance terminated");
                self.inner.routes.lock().unwrap().instances.remove(&instance_id);
            }
        }
    }

    async fn on_pipeline_event(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::Created { .. }
            | PipelineEvent::Started { .. }
            | PipelineEvent::Paused { .. }
            | PipelineEvent::Resumed { .. } => {}
            PipelineEvent::TaskStarted { pipeline_id, .. }
            | PipelineEvent::TaskCompleted { pipeline_id, .. }
            | PipelineEvent::TaskFailed { pipeline_id, .. }
            | PipelineEvent::TaskBlocked { pipeline_id, .. } => {
                self.on_task_progress(pipeline_id);
            }
            PipelineEvent::Completed { pipeline_id, .. } => {
                self.complete(pipeline_id);
            }
            PipelineEvent::Failed { pipeline_id, reason } => {
                if let Some(execution_id) = self.execution_for_pipeline(pipeline_id) {
                    self.fail(execution_id, format!("pipeline failed: {reason}"));
                }
            }
        }
    }

    fn on_bringup_step(&self, instance_id: Uuid, step: &str) {
        let Some(execution_id) = self.execution_for_instance(instance_id) else {
            return;
        };
        let progress = {
            let mut executions = self.inner.executions.lock().unwrap();
            match executions.get_mut(&execution_id) {
                Some(execution) if execution.status == ExecutionStatus::Provisioning => {
                    execution.progress.current_task = Some(format!("bring-up: {step}"));
                    execution.updated_at = Utc::now();
                    Some(execution.progress.clone())
                }
                _ => None,
            }
        };
        if let Some(progress) = progress {
            self.broadcast(ExecutionEvent::Progress {
                execution_id,
                progress,
            });
        }
    }

    /// Transition into the executing stage once the instance is up: plan the
    /// pipeline, bind it to the instance, and start the run loop.
    async fn begin_executing(&self, instance: VmInstance) {
        let Some(execution_id) = self.execution_for_instance(instance.id) else {
            return;
        };

        let spec = {
            let executions = self.inner.executions.lock().unwrap();
            match executions.get(&execution_id) {
                Some(execution) if !execution.status.is_terminal() => execution.spec.clone(),
                _ => None,
            }
        };
        let Some(spec) = spec else { return };

        let Some(connection) = instance.connection else {
            self.fail(
                execution_id,
                "instance reported running without connection details".to_string(),
            );
            return;
        };

        let pipeline = match self.inner.engine.create_pipeline(&spec) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                self.fail(execution_id, format!("pipeline planning failed: {err}"));
                return;
            }
        };
        self.inner
            .routes
            .lock()
            .unwrap()
            .pipelines
            .insert(pipeline.id, execution_id);

        let eta = eta_minutes(&pipeline);
        let progress = {
            let mut executions = self.inner.executions.lock().unwrap();
            match executions.get_mut(&execution_id) {
                Some(execution) if !execution.status.is_terminal() => {
                    execution.status = ExecutionStatus::Executing;
                    execution.pipeline_id = Some(pipeline.id);
                    execution.progress =
                        ExecutionProgress::new("executing", EXECUTING_BASE_PERCENT);
                    execution.progress.eta_minutes = eta;
                    execution.updated_at = Utc::now();
                    Some(execution.progress.clone())
                }
                // Cancelled while provisioning finished; cancel already
                // terminated the instance, and the pipeline never starts.
                _ => None,
            }
        };
        let Some(progress) = progress else { return };

        self.broadcast(ExecutionEvent::Progress {
            execution_id,
            progress,
        });

        let target = TargetRef {
            instance_id: instance.id,
            address: connection.address,
            port: connection.port,
        };
        if let Err(err) = self.inner.engine.start(pipeline.id, target) {
            self.fail(execution_id, format!("pipeline start failed: {err}"));
        }
    }

    fn on_task_progress(&self, pipeline_id: Uuid) {
        let Some(execution_id) = self.execution_for_pipeline(pipeline_id) else {
            return;
        };
        let Some(pipeline) = self.inner.engine.get(pipeline_id) else {
            return;
        };

        let percent = executing_percent(&pipeline.progress());
        let eta = eta_minutes(&pipeline);
        let progress = {
            let mut executions = self.inner.executions.lock().unwrap();
            match executions.get_mut(&execution_id) {
                Some(execution) if execution.status == ExecutionStatus::Executing => {
                    execution.progress.percent = percent;
                    execution.progress.current_task = pipeline.current_task.clone();
                    execution.progress.eta_minutes = eta;
                    execution.updated_at = Utc::now();
                    Some(execution.progress.clone())
                }
                _ => None,
            }
        };
        if let Some(progress) = progress {
            self.broadcast(ExecutionEvent::Progress {
                execution_id,
                progress,
            });
        }
    }

    fn complete(&self, pipeline_id: Uuid) {
        let Some(execution_id) = self.execution_for_pipeline(pipeline_id) else {
            return;
        };

        let done = {
            let mut executions = self.inner.executions.lock().unwrap();
            match executions.get_mut(&execution_id) {
                Some(execution) if !execution.status.is_terminal() => {
                    let now = Utc::now();
                    execution.status = ExecutionStatus::Completed;
                    execution.progress = ExecutionProgress::new("done", 100);
                    execution.finished_at = Some(now);
                    execution.updated_at = now;
                    Some((execution.progress.clone(), execution.instance_id))
                }
                _ => None,
            }
        };
        let Some((progress, instance_id)) = done else {
            return;
        };

        info!(execution_id = %execution_id, "execution completed");
        self.broadcast(ExecutionEvent::Progress {
            execution_id,
            progress,
        });
        self.broadcast(ExecutionEvent::Completed { execution_id });

        // Keep the instance around for a grace period so artifacts and logs
        // can still be pulled, then tear it down.
        if let Some(instance_id) = instance_id {
            let coordinator = self.clone();
            let cooldown = self.inner.config.termination_cooldown;
            tokio::spawn(async move {
                tokio::time::sleep(cooldown).await;
                if let Err(err) = coordinator.inner.provisioner.terminate(instance_id).await {
                    warn!(%instance_id, "post-completion teardown failed: {err}");
                }
            });
        }
    }

    /// Marks the execution failed and tears down its instance.
    fn fail(&self, id: Uuid, error: String) {
        let instance_id = {
            let mut executions = self.inner.executions.lock().unwrap();
            match executions.get_mut(&id) {
                Some(execution) if !execution.status.is_terminal() => {
                    let now = Utc::now();
                    execution.status = ExecutionStatus::Failed;
                    execution.finished_at = Some(now);
                    execution.updated_at = now;
                    Some(execution.instance_id)
                }
                _ => None,
            }
        };
        let Some(instance_id) = instance_id else {
            return;
        };

        warn!(execution_id = %id, %error, "execution failed");
        self.broadcast(ExecutionEvent::Failed {
            execution_id: id,
            error,
        });

        if let Some(instance_id) = instance_id {
            let coordinator = self.clone();
            tokio::spawn(async move {
                let _ = coordinator.inner.provisioner.terminate(instance_id).await;
            });
        }
    }

    fn execution_for_instance(&self, instance_id: Uuid) -> Option<Uuid> {
        self.inner.routes.lock().unwrap().instances.get(&instance_id).copied()
    }

    fn execution_for_pipeline(&self, pipeline_id: Uuid) -> Option<Uuid> {
        self.inner.routes.lock().unwrap().pipelines.get(&pipeline_id).copied()
    }

    fn broadcast(&self, event: ExecutionEvent) {
        // No subscribers is fine
        let _ = self.inner.outward.send(event);
    }
}

fn executing_percent(progress: &PipelineProgress) -> u8 {
    let total = progress.total.max(1);
    let span = usize::from(EXECUTING_SPAN);
    EXECUTING_BASE_PERCENT + (span * progress.completed / total) as u8
}

fn eta_minutes(pipeline: &Pipeline) -> Option<u64> {
    let remaining: Duration = pipeline
        .tasks
        .iter()
        .filter(|task| !task.status.is_terminal())
        .map(|task| task.estimated)
        .sum();
    Some(remaining.as_secs().div_ceil(60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_core::domain::instance::InstanceStatus;
    use loom_core::domain::pipeline::PipelineStatus;
    use loom_pipeline::EngineConfig;
    use loom_provision::ProvisionConfig;
    use loom_target::{SimulatedBackend, SimulatedExecutor, SimulatedFault};

    use crate::extraction::HeuristicSpecGenerator;

    fn fast_provision_config() -> ProvisionConfig {
        ProvisionConfig::default()
            .with_step_timeout(Duration::from_millis(500))
            .with_step_retries(0)
    }

    fn fast_coordinator_config() -> CoordinatorConfig {
        CoordinatorConfig {
            extraction_timeout: Duration::from_secs(5),
            termination_cooldown: Duration::from_millis(50),
            event_capacity: 256,
        }
    }

    fn coordinator_with(
        backend: SimulatedBackend,
        executor: SimulatedExecutor,
        config: CoordinatorConfig,
    ) -> Coordinator {
        let (tx, rx) = mpsc::unbounded_channel();
        let executor = Arc::new(executor);
        let provisioner = InstanceManager::new(
            Arc::new(backend),
            executor.clone(),
            tx.clone(),
            fast_provision_config(),
        );
        let engine = PipelineEngine::new(executor, tx, EngineConfig::default());
        Coordinator::new(
            provisioner,
            engine,
            Arc::new(HeuristicSpecGenerator::new()),
            rx,
            config,
        )
    }

    async fn wait_status(
        coordinator: &Coordinator,
        id: Uuid,
        status: ExecutionStatus,
    ) -> ExecutionSnapshot {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let Some(snapshot) = coordinator.status(id) {
                    if snapshot.execution.status == status {
                        return snapshot;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("execution never reached {status:?}"))
    }

    #[tokio::test]
    async fn test_execution_runs_end_to_end() {
        let coordinator = coordinator_with(
            SimulatedBackend::new().with_latency(Duration::from_millis(1)),
            SimulatedExecutor::new().with_latency(Duration::from_millis(1)),
            fast_coordinator_config(),
        );

        let execution = coordinator.start_execution(
            "session-1",
            "user-1",
            "Build a simple website with login and deploy it",
        );
        assert_eq!(execution.status, ExecutionStatus::Analyzing);

        let done = wait_status(&coordinator, execution.id, ExecutionStatus::Completed).await;
        assert_eq!(done.execution.progress.percent, 100);
        assert_eq!(done.execution.progress.stage, "done");
        assert!(done.execution.spec.is_some());
        assert!(done.execution.finished_at.is_some());

        let pipeline = done.pipeline.expect("pipeline snapshot");
        assert_eq!(pipeline.status, PipelineStatus::Completed);
        assert_eq!(pipeline.completed_tasks, pipeline.total_tasks());

        // Cooldown elapses and the instance is torn down
        let instance_id = done.execution.instance_id.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match coordinator.inner.provisioner.get_status(instance_id) {
                    Some(instance) if instance.status == InstanceStatus::Terminated => break,
                    _ => tokio::time::sleep(Duration::from_millis(10)).await,
                }
            }
        })
        .await
        .expect("instance was never terminated");
    }

    #[tokio::test]
    async fn test_empty_intent_fails_analysis() {
        let coordinator = coordinator_with(
            SimulatedBackend::new().with_latency(Duration::from_millis(1)),
            SimulatedExecutor::new().with_latency(Duration::from_millis(1)),
            fast_coordinator_config(),
        );
        let mut events = coordinator.subscribe();

        let execution = coordinator.start_execution("session-1", "user-1", "   ");
        let failed = wait_status(&coordinator, execution.id, ExecutionStatus::Failed).await;
        assert!(failed.execution.instance_id.is_none());

        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if let ExecutionEvent::Failed { error, .. } = event {
                assert!(error.contains("extraction"));
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn test_provisioning_failure_fails_execution() {
        let coordinator = coordinator_with(
            SimulatedBackend::new()
                .with_latency(Duration::from_millis(1))
                .failing(SimulatedFault::Create),
            SimulatedExecutor::new().with_latency(Duration::from_millis(1)),
            fast_coordinator_config(),
        );
        let mut events = coordinator.subscribe();

        let execution = coordinator.start_execution("session-1", "user-1", "a simple api");
        let failed = wait_status(&coordinator, execution.id, ExecutionStatus::Failed).await;
        // No pipeline is ever created and the progress resets
        assert!(failed.execution.pipeline_id.is_none());
        assert_eq!(failed.execution.progress.percent, 0);

        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if let ExecutionEvent::Failed { error, .. } = event {
                assert!(error.contains("provisioning"));
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn test_instant_provisioning_failure_still_fails_execution() {
        // A backend that fails with no latency emits ProvisioningFailed as
        // soon as bring-up starts. The instance route is registered before
        // bring-up begins, so the failure always finds its execution.
        let coordinator = coordinator_with(
            SimulatedBackend::new()
                .with_latency(Duration::ZERO)
                .failing(SimulatedFault::Create),
            SimulatedExecutor::new(),
            fast_coordinator_config(),
        );

        let execution = coordinator.start_execution("session-1", "user-1", "a simple api");
        let failed = wait_status(&coordinator, execution.id, ExecutionStatus::Failed).await;
        assert!(failed.execution.instance_id.is_some());
        assert!(failed.execution.pipeline_id.is_none());
        assert_eq!(failed.execution.progress.percent, 0);
    }

    #[tokio::test]
    async fn test_cancel_terminates_instance() {
        // Slow tasks keep the pipeline busy long enough to cancel mid-run
        let coordinator = coordinator_with(
            SimulatedBackend::new().with_latency(Duration::from_millis(1)),
            SimulatedExecutor::new().with_latency(Duration::from_millis(50)),
            fast_coordinator_config(),
        );
        let mut events = coordinator.subscribe();

        let execution =
            coordinator.start_execution("session-1", "user-1", "a website with login and an api");
        wait_status(&coordinator, execution.id, ExecutionStatus::Executing).await;

        assert!(coordinator.cancel(execution.id).await.unwrap());
        // Second cancel is a no-op
        assert!(!coordinator.cancel(execution.id).await.unwrap());

        let snapshot = coordinator.status(execution.id).unwrap();
        assert_eq!(snapshot.execution.status, ExecutionStatus::Failed);
        assert_eq!(snapshot.execution.progress.stage, "cancelled");
        let instance = snapshot.instance.expect("instance snapshot");
        assert_eq!(instance.status, InstanceStatus::Terminated);
        // The pipeline is parked terminally, not left paused
        let pipeline = snapshot.pipeline.expect("pipeline snapshot");
        assert!(pipeline.status.is_terminal());

        let mut cancelled = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ExecutionEvent::Cancelled { .. }) {
                cancelled += 1;
            }
        }
        assert_eq!(cancelled, 1);
    }

    #[tokio::test]
    async fn test_cancel_unknown_execution() {
        let coordinator = coordinator_with(
            SimulatedBackend::new().with_latency(Duration::from_millis(1)),
            SimulatedExecutor::new().with_latency(Duration::from_millis(1)),
            fast_coordinator_config(),
        );
        let err = coordinator.cancel(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let coordinator = coordinator_with(
            SimulatedBackend::new().with_latency(Duration::from_millis(1)),
            SimulatedExecutor::new().with_latency(Duration::from_millis(30)),
            fast_coordinator_config(),
        );

        let execution =
            coordinator.start_execution("session-1", "user-1", "a website with login and an api");

        // Pausing before the pipeline exists is rejected
        assert!(coordinator.pause(execution.id).is_err());

        wait_status(&coordinator, execution.id, ExecutionStatus::Executing).await;
        // Give the run loop a moment to actually start
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(coordinator.pause(execution.id).unwrap());
        assert!(!coordinator.pause(execution.id).unwrap());
        assert!(coordinator.resume(execution.id).unwrap());

        let done = wait_status(&coordinator, execution.id, ExecutionStatus::Completed).await;
        assert_eq!(done.execution.progress.percent, 100);
    }

    #[tokio::test]
    async fn test_progress_percent_is_monotonic() {
        let coordinator = coordinator_with(
            SimulatedBackend::new().with_latency(Duration::from_millis(1)),
            SimulatedExecutor::new().with_latency(Duration::from_millis(1)),
            fast_coordinator_config(),
        );
        let mut events = coordinator.subscribe();

        let execution = coordinator.start_execution(
            "session-1",
            "user-1",
            "a website with login, an api and a database, then deploy it",
        );
        wait_status(&coordinator, execution.id, ExecutionStatus::Completed).await;

        let mut last_percent = 0;
        let mut completed = false;
        while let Ok(event) = events.try_recv() {
            match event {
                ExecutionEvent::Progress { progress, .. } => {
                    assert!(
                        progress.percent >= last_percent,
                        "percent went backwards: {} -> {}",
                        last_percent,
                        progress.percent
                    );
                    last_percent = progress.percent;
                }
                ExecutionEvent::Completed { .. } => completed = true,
                _ => {}
            }
        }
        assert!(completed);
        assert_eq!(last_percent, 100);
    }

    #[tokio::test]
    async fn test_list_for_session() {
        let coordinator = coordinator_with(
            SimulatedBackend::new().with_latency(Duration::from_millis(1)),
            SimulatedExecutor::new().with_latency(Duration::from_millis(1)),
            fast_coordinator_config(),
        );

        let first = coordinator.start_execution("session-a", "user-1", "a simple api");
        let _other = coordinator.start_execution("session-b", "user-1", "a simple api");

        let listed = coordinator.list_for_session("session-a");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, first.id);
    }
}
