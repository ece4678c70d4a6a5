//! Pipeline engine
//!
//! Owns the pipeline table and drives one run loop per started pipeline.
//! The run loop selects the next pending task whose dependencies all
//! completed, dispatches its payload to the bound compute target, records the
//! outcome, and repeats until every task is terminal. Pausing is observed
//! between tasks; an in-flight dispatch always finishes and is recorded.
//!
//! State transitions happen under the table lock; only task dispatch awaits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use loom_core::domain::pipeline::{Pipeline, PipelineStatus};
use loom_core::domain::spec::ProjectSpec;
use loom_core::domain::task::{TaskPayload, TaskResult, TaskStatus};
use loom_core::event::{CoreEvent, PipelineEvent};
use loom_target::{ExecRequest, TargetExecutor, TargetRef};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::EngineError;
use crate::planner;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline for a single task dispatch
    pub task_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Default)]
struct Bindings {
    /// pipeline id -> bound target
    targets: HashMap<Uuid, TargetRef>,
    /// instance id -> pipeline holding it
    instances: HashMap<Uuid, Uuid>,
}

struct EngineInner {
    pipelines: Mutex<HashMap<Uuid, Pipeline>>,
    bindings: Mutex<Bindings>,
    /// Current run-loop generation per pipeline. A loop whose generation no
    /// longer matches has been superseded by a resume and must exit.
    generations: Mutex<HashMap<Uuid, u64>>,
    executor: Arc<dyn TargetExecutor>,
    events: UnboundedSender<CoreEvent>,
    config: EngineConfig,
}

/// Task pipeline engine
#[derive(Clone)]
pub struct PipelineEngine {
    inner: Arc<EngineInner>,
}

impl PipelineEngine {
    pub fn new(
        executor: Arc<dyn TargetExecutor>,
        events: UnboundedSender<CoreEvent>,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                pipelines: Mutex::new(HashMap::new()),
                bindings: Mutex::new(Bindings::default()),
                generations: Mutex::new(HashMap::new()),
                executor,
                events,
                config,
            }),
        }
    }

    /// Builds a pipeline from a specification.
    ///
    /// Dependency problems (unknown ids, cycles) fail here; no pipeline
    /// record is created for an invalid graph.
    pub fn create_pipeline(&self, spec: &ProjectSpec) -> Result<Pipeline, EngineError> {
        let pipeline_id = Uuid::new_v4();
        let tasks = planner::plan(pipeline_id, spec)?;

        let pipeline = Pipeline {
            id: pipeline_id,
            project: spec.name.clone(),
            status: PipelineStatus::Initializing,
            tasks,
            instance_id: None,
            completed_tasks: 0,
            failed_tasks: 0,
            current_task: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
        };

        info!(
            "created pipeline {} for '{}' with {} task(s)",
            pipeline.id,
            pipeline.project,
            pipeline.total_tasks()
        );

        self.inner
            .pipelines
            .lock()
            .unwrap()
            .insert(pipeline.id, pipeline.clone());
        self.emit(PipelineEvent::Created {
            pipeline_id: pipeline.id,
            total_tasks: pipeline.total_tasks(),
        });

        Ok(pipeline)
    }

    /// Marks the pipeline running, binds it to `target`, and begins the run
    /// loop. A target already bound to another pipeline is rejected.
    pub fn start(&self, pipeline_id: Uuid, target: TargetRef) -> Result<(), EngineError> {
        {
            let mut bindings = self.inner.bindings.lock().unwrap();
            if let Some(holder) = bindings.instances.get(&target.instance_id) {
                if *holder != pipeline_id {
                    return Err(EngineError::TargetInUse(target.instance_id));
                }
            }

            let mut pipelines = self.inner.pipelines.lock().unwrap();
            let pipeline = pipelines
                .get_mut(&pipeline_id)
                .ok_or(EngineError::NotFound(pipeline_id))?;
            if pipeline.status != PipelineStatus::Initializing {
                return Err(EngineError::InvalidState {
                    id: pipeline_id,
                    status: pipeline.status,
                    expected: "initializing",
                });
            }

            pipeline.status = PipelineStatus::Running;
            pipeline.instance_id = Some(target.instance_id);
            pipeline.started_at = Some(chrono::Utc::now());

            bindings.instances.insert(target.instance_id, pipeline_id);
            bindings.targets.insert(pipeline_id, target.clone());
        }

        info!(
            "starting pipeline {} against instance {}",
            pipeline_id, target.instance_id
        );
        self.emit(PipelineEvent::Started {
            pipeline_id,
            instance_id: target.instance_id,
        });

        let generation =
            bump_generation(&mut self.inner.generations.lock().unwrap(), pipeline_id);
        self.spawn_run_loop(pipeline_id, target, generation);
        Ok(())
    }

    /// Pauses a running pipeline. Returns `false` if it was already paused.
    ///
    /// An in-flight task dispatch is not interrupted; the run loop exits
    /// after recording its result.
    pub fn pause(&self, pipeline_id: Uuid) -> Result<bool, EngineError> {
        let mut pipelines = self.inner.pipelines.lock().unwrap();
        let pipeline = pipelines
            .get_mut(&pipeline_id)
            .ok_or(EngineError::NotFound(pipeline_id))?;
        match pipeline.status {
            PipelineStatus::Running => {
                pipeline.status = PipelineStatus::Paused;
                drop(pipelines);
                info!("paused pipeline {}", pipeline_id);
                self.emit(PipelineEvent::Paused { pipeline_id });
                Ok(true)
            }
            PipelineStatus::Paused => Ok(false),
            status => Err(EngineError::InvalidState {
                id: pipeline_id,
                status,
                expected: "running",
            }),
        }
    }

    /// Resumes a paused pipeline by re-entering its run loop.
    pub fn resume(&self, pipeline_id: Uuid) -> Result<bool, EngineError> {
        let target = {
            let bindings = self.inner.bindings.lock().unwrap();
            bindings
                .targets
                .get(&pipeline_id)
                .cloned()
                .ok_or(EngineError::NotFound(pipeline_id))?
        };

        let generation = {
            // Generations before pipelines, matching next_step. Bumping the
            // generation together with the status flip means a superseded
            // loop can never see the resumed status against its stale
            // generation and dispatch alongside the new loop.
            let mut generations = self.inner.generations.lock().unwrap();
            let mut pipelines = self.inner.pipelines.lock().unwrap();
            let pipeline = pipelines
                .get_mut(&pipeline_id)
                .ok_or(EngineError::NotFound(pipeline_id))?;
            match pipeline.status {
                PipelineStatus::Paused => {}
                PipelineStatus::Running => return Ok(false),
                status => {
                    return Err(EngineError::InvalidState {
                        id: pipeline_id,
                        status,
                        expected: "paused",
                    });
                }
            }
            pipeline.status = PipelineStatus::Running;
            bump_generation(&mut generations, pipeline_id)
        };

        info!("resumed pipeline {}", pipeline_id);
        self.emit(PipelineEvent::Resumed { pipeline_id });
        self.spawn_run_loop(pipeline_id, target, generation);
        Ok(true)
    }

    /// Terminally parks a pipeline and releases its target binding, whatever
    /// state it is in. Returns `false` if it was already terminal, so
    /// repeated aborts are harmless. An in-flight dispatch still gets its
    /// outcome recorded, but nothing new is scheduled.
    pub fn abort(&self, pipeline_id: Uuid) -> Result<bool, EngineError> {
        {
            let mut pipelines = self.inner.pipelines.lock().unwrap();
            let pipeline = pipelines
                .get_mut(&pipeline_id)
                .ok_or(EngineError::NotFound(pipeline_id))?;
            if pipeline.status.is_terminal() {
                return Ok(false);
            }
            pipeline.status = PipelineStatus::Failed;
            pipeline.finished_at = Some(chrono::Utc::now());
            pipeline.current_task = None;
        }

        info!("aborted pipeline {}", pipeline_id);
        release_bindings(&self.inner, pipeline_id);
        Ok(true)
    }

    /// Snapshot of a pipeline
    pub fn get(&self, pipeline_id: Uuid) -> Option<Pipeline> {
        self.inner.pipelines.lock().unwrap().get(&pipeline_id).cloned()
    }

    fn emit(&self, event: PipelineEvent) {
        let _ = self.inner.events.send(event.into());
    }

    fn spawn_run_loop(&self, pipeline_id: Uuid, target: TargetRef, generation: u64) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_loop(inner, pipeline_id, target, generation).await;
        });
    }

    #[cfg(test)]
    pub(crate) fn insert_for_test(&self, pipeline: Pipeline) {
        self.inner.pipelines.lock().unwrap().insert(pipeline.id, pipeline);
    }
}

enum LoopStep {
    /// Dispatch this task next
    Dispatch {
        task_id: Uuid,
        title: String,
        payload: TaskPayload,
        estimated: Duration,
    },
    /// A dispatch from a superseded loop is still in flight; poll again once
    /// its outcome has been recorded
    Wait,
    /// Pipeline left the running state or reached a terminal state
    Exit,
}

/// Poll interval while waiting out a superseded loop's in-flight dispatch
const IN_FLIGHT_POLL: Duration = Duration::from_millis(10);

async fn run_loop(inner: Arc<EngineInner>, pipeline_id: Uuid, target: TargetRef, generation: u64) {
    loop {
        let step = next_step(&inner, pipeline_id, generation);

        let (task_id, title, payload, estimated) = match step {
            LoopStep::Exit => return,
            LoopStep::Wait => {
                tokio::time::sleep(IN_FLIGHT_POLL).await;
                continue;
            }
            LoopStep::Dispatch {
                task_id,
                title,
                payload,
                estimated,
            } => (task_id, title, payload, estimated),
        };

        debug!("pipeline {}: dispatching task '{}'", pipeline_id, title);
        let _ = inner.events.send(
            PipelineEvent::TaskStarted {
                pipeline_id,
                task_id,
                title: title.clone(),
            }
            .into(),
        );

        // Per-task deadline: generous for long estimates, but never beyond
        // the configured ceiling.
        let timeout = estimated.min(inner.config.task_timeout);
        let request = ExecRequest {
            commands: payload.commands,
            files: payload.files,
            timeout,
        };

        let outcome = inner.executor.execute(&target, request).await;
        record_outcome(&inner, pipeline_id, task_id, outcome);
    }
}

/// Runs the blocked cascade, checks for completion or a stuck graph, and
/// selects the next runnable task. All under the table lock.
fn next_step(inner: &Arc<EngineInner>, pipeline_id: Uuid, generation: u64) -> LoopStep {
    // Held across the status check so a concurrent resume's generation bump
    // and status flip stay atomic with respect to this loop.
    let generations = inner.generations.lock().unwrap();
    if generations.get(&pipeline_id).copied() != Some(generation) {
        debug!("pipeline {}: run loop superseded, exiting", pipeline_id);
        return LoopStep::Exit;
    }

    let mut pipelines = inner.pipelines.lock().unwrap();
    let Some(pipeline) = pipelines.get_mut(&pipeline_id) else {
        return LoopStep::Exit;
    };

    if pipeline.status != PipelineStatus::Running {
        debug!(
            "pipeline {}: run loop exiting in state {:?}",
            pipeline_id, pipeline.status
        );
        return LoopStep::Exit;
    }

    cascade_blocked(pipeline, &inner.events);

    if pipeline.all_tasks_terminal() {
        pipeline.status = PipelineStatus::Completed;
        pipeline.finished_at = Some(chrono::Utc::now());
        pipeline.current_task = None;
        let progress = pipeline.progress();
        info!(
            "pipeline {} completed: {}/{} task(s) succeeded, {} failed or blocked",
            pipeline_id, progress.completed, progress.total, progress.failed
        );
        let _ = inner.events.send(
            PipelineEvent::Completed {
                pipeline_id,
                progress,
            }
            .into(),
        );
        drop(pipelines);
        drop(generations);
        release_bindings(inner, pipeline_id);
        return LoopStep::Exit;
    }

    match select_runnable(pipeline) {
        Some(idx) => {
            let task = &mut pipeline.tasks[idx];
            task.status = TaskStatus::Running;
            task.started_at = Some(chrono::Utc::now());
            let title = task.title.clone();
            let step = LoopStep::Dispatch {
                task_id: task.id,
                title: title.clone(),
                payload: task.payload.clone(),
                estimated: task.estimated,
            };
            pipeline.current_task = Some(title);
            step
        }
        None => {
            // A task still running belongs to a dispatch started before a
            // pause; its outcome will unblock dependents, so this is not a
            // stuck graph.
            if pipeline
                .tasks
                .iter()
                .any(|t| t.status == TaskStatus::Running)
            {
                return LoopStep::Wait;
            }

            // No runnable task but work remains: the graph is stuck. Surface
            // it as a pipeline failure rather than hanging.
            let outstanding = pipeline.progress().outstanding();
            pipeline.status = PipelineStatus::Failed;
            pipeline.finished_at = Some(chrono::Utc::now());
            pipeline.current_task = None;
            let reason = format!("no runnable task but {outstanding} task(s) remain incomplete");
            warn!("pipeline {} stuck: {}", pipeline_id, reason);
            let _ = inner
                .events
                .send(PipelineEvent::Failed { pipeline_id, reason }.into());
            drop(pipelines);
            drop(generations);
            release_bindings(inner, pipeline_id);
            LoopStep::Exit
        }
    }
}

/// Marks pending tasks blocked when any dependency reached a terminal state
/// other than completed. Runs to fixpoint so chains of dependents collapse in
/// one pass of the scheduler.
fn cascade_blocked(pipeline: &mut Pipeline, events: &UnboundedSender<CoreEvent>) {
    loop {
        let statuses: HashMap<Uuid, TaskStatus> =
            pipeline.tasks.iter().map(|t| (t.id, t.status)).collect();

        let mut changed = false;
        for task in &mut pipeline.tasks {
            if task.status != TaskStatus::Pending {
                continue;
            }
            let failed_dep = task.depends_on.iter().copied().find(|dep| {
                matches!(
                    statuses.get(dep),
                    Some(TaskStatus::Failed) | Some(TaskStatus::Blocked)
                )
            });
            if let Some(failed_dependency) = failed_dep {
                task.status = TaskStatus::Blocked;
                task.completed_at = Some(chrono::Utc::now());
                task.result = Some(TaskResult {
                    success: false,
                    output: String::new(),
                    artifacts: vec![],
                    errors: vec![format!("dependency {failed_dependency} did not complete")],
                });
                pipeline.failed_tasks += 1;
                changed = true;
                let _ = events.send(
                    PipelineEvent::TaskBlocked {
                        pipeline_id: pipeline.id,
                        task_id: task.id,
                        failed_dependency,
                    }
                    .into(),
                );
            }
        }

        if !changed {
            return;
        }
    }
}

/// Lowest-priority pending task whose dependencies all completed, with
/// topological position as the tie-break.
fn select_runnable(pipeline: &Pipeline) -> Option<usize> {
    let statuses: HashMap<Uuid, TaskStatus> =
        pipeline.tasks.iter().map(|t| (t.id, t.status)).collect();

    pipeline
        .tasks
        .iter()
        .enumerate()
        .filter(|(_, t)| t.status == TaskStatus::Pending)
        .filter(|(_, t)| {
            t.depends_on
                .iter()
                .all(|dep| statuses.get(dep) == Some(&TaskStatus::Completed))
        })
        .min_by_key(|(idx, t)| (t.priority, *idx))
        .map(|(idx, _)| idx)
}

fn record_outcome(
    inner: &Arc<EngineInner>,
    pipeline_id: Uuid,
    task_id: Uuid,
    outcome: loom_target::Result<loom_target::ExecOutcome>,
) {
    let mut pipelines = inner.pipelines.lock().unwrap();
    let Some(pipeline) = pipelines.get_mut(&pipeline_id) else {
        return;
    };
    let Some(task) = pipeline.task_mut(task_id) else {
        return;
    };

    let (succeeded, error) = match outcome {
        Ok(result) => {
            task.actual = Some(result.duration);
            let error = result.error.clone();
            task.result = Some(TaskResult {
                success: result.success,
                output: result.output,
                artifacts: result.artifacts,
                errors: error.clone().into_iter().collect(),
            });
            (result.success, error)
        }
        Err(err) => {
            task.result = Some(TaskResult {
                success: false,
                output: String::new(),
                artifacts: vec![],
                errors: vec![err.to_string()],
            });
            (false, Some(err.to_string()))
        }
    };

    task.status = if succeeded {
        TaskStatus::Completed
    } else {
        TaskStatus::Failed
    };
    task.completed_at = Some(chrono::Utc::now());

    pipeline.current_task = None;
    if succeeded {
        pipeline.completed_tasks += 1;
        let progress = pipeline.progress();
        debug!(
            "pipeline {}: task {} completed ({}/{})",
            pipeline_id, task_id, progress.completed, progress.total
        );
        let _ = inner.events.send(
            PipelineEvent::TaskCompleted {
                pipeline_id,
                task_id,
                progress,
            }
            .into(),
        );
    } else {
        pipeline.failed_tasks += 1;
        let error = error.unwrap_or_else(|| "task execution failed".to_string());
        warn!("pipeline {}: task {} failed: {}", pipeline_id, task_id, error);
        let _ = inner.events.send(
            PipelineEvent::TaskFailed {
                pipeline_id,
                task_id,
                error,
                progress: pipeline.progress(),
            }
            .into(),
        );
    }
}

fn bump_generation(generations: &mut HashMap<Uuid, u64>, pipeline_id: Uuid) -> u64 {
    let slot = generations.entry(pipeline_id).or_insert(0);
    *slot += 1;
    *slot
}

fn release_bindings(inner: &Arc<EngineInner>, pipeline_id: Uuid) {
    {
        let mut bindings = inner.bindings.lock().unwrap();
        if let Some(target) = bindings.targets.remove(&pipeline_id) {
            bindings.instances.remove(&target.instance_id);
        }
    }
    inner.generations.lock().unwrap().remove(&pipeline_id);
}
