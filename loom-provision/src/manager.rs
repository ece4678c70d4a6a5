//! Instance lifecycle management
//!
//! The manager owns the instance table and the mapping from instance records
//! to backend handles. Bring-up runs on a spawned task so callers get a
//! Provisioning record back immediately and follow progress through events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use loom_core::domain::instance::{InstanceStatus, VmInstance};
use loom_core::domain::spec::ProjectSpec;
use loom_core::event::{CoreEvent, InstanceEvent};
use loom_target::{BackendHandle, ComputeBackend, TargetExecutor};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::bringup;
use crate::config::{ProvisionConfig, derive_instance_config};
use crate::error::ProvisionError;

#[derive(Clone)]
pub struct InstanceManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    instances: Mutex<HashMap<Uuid, VmInstance>>,
    handles: Mutex<HashMap<Uuid, BackendHandle>>,
    backend: Arc<dyn ComputeBackend>,
    executor: Arc<dyn TargetExecutor>,
    events: UnboundedSender<CoreEvent>,
    config: ProvisionConfig,
}

impl InstanceManager {
    pub fn new(
        backend: Arc<dyn ComputeBackend>,
        executor: Arc<dyn TargetExecutor>,
        events: UnboundedSender<CoreEvent>,
        config: ProvisionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                instances: Mutex::new(HashMap::new()),
                handles: Mutex::new(HashMap::new()),
                backend,
                executor,
                events,
                config,
            }),
        }
    }

    /// Creates an instance record for the project and starts bring-up in the
    /// background. Returns the record in Provisioning state.
    pub fn provision_for_project(&self, spec: &ProjectSpec) -> VmInstance {
        let instance = self.create_for_project(spec);
        // A freshly created record is always eligible for bring-up
        let _ = self.start_bringup(instance.id);
        instance
    }

    /// Creates an instance record without starting bring-up. Callers that
    /// route instance events elsewhere register the new id first, then call
    /// [`Self::start_bringup`], so no bring-up event can precede the route.
    pub fn create_for_project(&self, spec: &ProjectSpec) -> VmInstance {
        let config = derive_instance_config(&self.inner.config, spec);
        let id = Uuid::new_v4();
        let name = format!("loom-{}-{}", slug(&spec.name), &id.to_string()[..8]);

        let instance = VmInstance {
            id,
            name,
            status: InstanceStatus::Provisioning,
            config,
            connection: None,
            project: spec.name.clone(),
            created_at: Utc::now(),
            started_at: None,
            terminated_at: None,
            accrued_cost: 0.0,
            last_error: None,
        };

        self.inner
            .instances.lock().unwrap()
            .insert(id, instance.clone());

        info!(instance_id = %id, tier = ?instance.config.tier, "provisioning instance");
        self.emit(InstanceEvent::ProvisioningStarted {
            instance: instance.clone(),
        });

        instance
    }

    /// Spawns bring-up for a previously created record. Rejects records that
    /// already left the Provisioning state, e.g. terminated before bring-up
    /// was requested.
    pub fn start_bringup(&self, id: Uuid) -> Result<(), ProvisionError> {
        let snapshot = {
            let instances = self.inner.instances.lock().unwrap();
            let record = instances.get(&id).ok_or(ProvisionError::NotFound(id))?;
            if record.status != InstanceStatus::Provisioning {
                return Err(ProvisionError::InvalidState {
                    id,
                    status: record.status,
                    expected: "provisioning",
                });
            }
            record.clone()
        };

        let manager = self.clone();
        tokio::spawn(async move {
            manager.bring_up(snapshot).await;
        });
        Ok(())
    }

    async fn bring_up(&self, instance: VmInstance) {
        let id = instance.id;
        let on_step = |step: crate::bringup::BringupStep| {
            self.emit(InstanceEvent::StepCompleted {
                instance_id: id,
                step: step.name().to_string(),
            });
        };

        let result = bringup::run(
            self.inner.backend.as_ref(),
            self.inner.executor.as_ref(),
            &self.inner.config,
            &instance,
            on_step,
        )
        .await;

        match result {
            Ok(outcome) => {
                let (event, stale_handle) = {
                    let mut instances = self
                        .inner
                        .instances
                        .lock()
                        .unwrap();
                    match instances.get_mut(&id) {
                        Some(record) if record.status == InstanceStatus::Provisioning => {
                            record.status = InstanceStatus::Running;
                            record.started_at = Some(Utc::now());
                            record.connection = Some(outcome.connection);
                            self.inner
                                .handles
                                .lock()
                                .unwrap()
                                .insert(id, outcome.handle);
                            (
                                Some(InstanceEvent::ProvisioningSucceeded {
                                    instance: record.clone(),
                                }),
                                None,
                            )
                        }
                        // Terminated or removed while bring-up was in flight
                        _ => (None, Some(outcome.handle)),
                    }
                };

                if let Some(handle) = stale_handle {
                    warn!(instance_id = %id, "instance terminated during bring-up, releasing resource");
                    let _ = self.inner.backend.terminate(&handle).await;
                } else if let Some(event) = event {
                    info!(instance_id = %id, "instance running");
                    self.emit(event);
                }
            }
            Err(err) => {
                error!(instance_id = %id, error = %err, "bring-up failed");
                let event = {
                    let mut instances = self
                        .inner
                        .instances
                        .lock()
                        .unwrap();
                    instances.get_mut(&id).map(|record| {
                        record.status = InstanceStatus::Error;
                        record.last_error = Some(err.to_string());
                        InstanceEvent::ProvisioningFailed {
                            instance: record.clone(),
                            error: err.to_string(),
                        }
                    })
                };
                if let Some(event) = event {
                    self.emit(event);
                }
            }
        }
    }

    /// Terminates an instance. Returns false when the instance is already
    /// terminated, so repeated calls are harmless.
    pub async fn terminate(&self, id: Uuid) -> Result<bool, ProvisionError> {
        let (cost, handle) = {
            let mut instances = self
                .inner
                .instances
                .lock()
                .unwrap();
            let record = instances.get_mut(&id).ok_or(ProvisionError::NotFound(id))?;

            match record.status {
                InstanceStatus::Terminated => return Ok(false),
                InstanceStatus::Provisioning
                | InstanceStatus::Running
                | InstanceStatus::Stopped
                | InstanceStatus::Error => {}
            }

            let now = Utc::now();
            record.status = InstanceStatus::Terminated;
            record.terminated_at = Some(now);
            if let Some(started_at) = record.started_at {
                record.accrued_cost = record.cost_for(now - started_at);
            }

            let handle = self
                .inner
                .handles
                .lock()
                .unwrap()
                .remove(&id);
            (record.accrued_cost, handle)
        };

        if let Some(handle) = handle {
            if let Err(err) = self.inner.backend.terminate(&handle).await {
                warn!(instance_id = %id, error = %err, "backend terminate failed");
            }
        }

        info!(instance_id = %id, cost, "instance terminated");
        self.emit(InstanceEvent::Terminated {
            instance_id: id,
            cost,
        });

        // Keep the record queryable for a while, then drop it
        let manager = self.clone();
        let retention = self.inner.config.retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            manager
                .inner
                .instances
                .lock()
                .unwrap()
                .remove(&id);
        });

        Ok(true)
    }

    pub fn get_status(&self, id: Uuid) -> Option<VmInstance> {
        self.inner
            .instances.lock().unwrap()
            .get(&id)
            .cloned()
    }

    pub fn list_by_project(&self, project: &str) -> Vec<VmInstance> {
        self.inner
            .instances.lock().unwrap()
            .values()
            .filter(|instance| instance.project == project)
            .cloned()
            .collect()
    }

    fn emit(&self, event: InstanceEvent) {
        let _ = self.inner.events.send(CoreEvent::Instance(event));
    }
}

fn slug(name: &str) -> String {
    let slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    slug.trim_matches('-').chars().take(24).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use loom_core::domain::spec::DeploymentTarget;
    use loom_target::{SimulatedBackend, SimulatedExecutor, SimulatedFault};
    use tokio::sync::mpsc;

    fn demo_spec() -> ProjectSpec {
        ProjectSpec {
            name: "Demo App".to_string(),
            description: String::new(),
            architecture: String::new(),
            technologies: vec!["node".to_string()],
            deployment_target: DeploymentTarget::Cloud,
            estimated_hours: 4.0,
            requirements: vec![],
        }
    }

    fn fast_config() -> ProvisionConfig {
        ProvisionConfig::default()
            .with_step_timeout(Duration::from_millis(500))
            .with_step_retries(0)
            .with_retention(Duration::from_secs(60))
    }

    fn manager_with(
        backend: SimulatedBackend,
        config: ProvisionConfig,
    ) -> (InstanceManager, mpsc::UnboundedReceiver<CoreEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = InstanceManager::new(
            Arc::new(backend),
            Arc::new(SimulatedExecutor::new()),
            tx,
            config,
        );
        (manager, rx)
    }

    async fn wait_for_status(
        manager: &InstanceManager,
        id: Uuid,
        status: InstanceStatus,
    ) -> VmInstance {
        for _ in 0..100 {
            if let Some(instance) = manager.get_status(id) {
                if instance.status == status {
                    return instance;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("instance never reached {status:?}");
    }

    #[tokio::test]
    async fn test_provision_happy_path() {
        let (manager, mut rx) = manager_with(SimulatedBackend::new(), fast_config());

        let instance = manager.provision_for_project(&demo_spec());
        assert_eq!(instance.status, InstanceStatus::Provisioning);
        assert!(instance.name.starts_with("loom-demo-app-"));

        let running = wait_for_status(&manager, instance.id, InstanceStatus::Running).await;
        assert!(running.connection.is_some());
        assert!(running.started_at.is_some());

        // Started, one StepCompleted per step, then Succeeded
        let mut steps = Vec::new();
        let mut succeeded = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                CoreEvent::Instance(InstanceEvent::StepCompleted { step, .. }) => steps.push(step),
                CoreEvent::Instance(InstanceEvent::ProvisioningSucceeded { .. }) => {
                    succeeded = true
                }
                _ => {}
            }
        }
        assert_eq!(
            steps,
            vec!["acquire", "reachability", "software", "agent", "verify"]
        );
        assert!(succeeded);
    }

    #[tokio::test]
    async fn test_backend_fault_marks_instance_error() {
        let backend = SimulatedBackend::new().failing(SimulatedFault::Create);
        let (manager, mut rx) = manager_with(backend, fast_config());

        let instance = manager.provision_for_project(&demo_spec());
        let failed = wait_for_status(&manager, instance.id, InstanceStatus::Error).await;
        assert!(failed.last_error.is_some());

        let mut saw_failure = false;
        while let Ok(event) = rx.try_recv() {
            if let CoreEvent::Instance(InstanceEvent::ProvisioningFailed { error, .. }) = event {
                assert!(error.contains("acquire"));
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn test_software_install_failure_marks_instance_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let executor = SimulatedExecutor::new()
            .with_latency(Duration::from_millis(1))
            .failing_commands(vec!["apt-get install".to_string()]);
        let manager = InstanceManager::new(
            Arc::new(SimulatedBackend::new().with_latency(Duration::from_millis(1))),
            Arc::new(executor),
            tx,
            fast_config(),
        );

        let instance = manager.provision_for_project(&demo_spec());
        let failed = wait_for_status(&manager, instance.id, InstanceStatus::Error).await;
        let error = failed.last_error.unwrap();
        assert!(error.contains("software"), "unexpected error: {error}");
    }

    #[tokio::test]
    async fn test_unreachable_instance_times_out() {
        let backend = SimulatedBackend::new().failing(SimulatedFault::NeverReachable);
        let config = fast_config().with_step_timeout(Duration::from_millis(50));
        let (manager, _rx) = manager_with(backend, config);

        let instance = manager.provision_for_project(&demo_spec());
        let failed = wait_for_status(&manager, instance.id, InstanceStatus::Error).await;
        let error = failed.last_error.unwrap();
        assert!(error.contains("reachability"), "unexpected error: {error}");
    }

    #[tokio::test]
    async fn test_bringup_waits_for_explicit_start() {
        let backend = SimulatedBackend::new().with_latency(Duration::from_millis(1));
        let (manager, _rx) = manager_with(backend, fast_config());

        let instance = manager.create_for_project(&demo_spec());
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Nothing happens until bring-up is requested
        assert_eq!(
            manager.get_status(instance.id).unwrap().status,
            InstanceStatus::Provisioning
        );

        manager.start_bringup(instance.id).unwrap();
        wait_for_status(&manager, instance.id, InstanceStatus::Running).await;
    }

    #[tokio::test]
    async fn test_bringup_rejected_for_ineligible_record() {
        let (manager, _rx) = manager_with(SimulatedBackend::new(), fast_config());

        let instance = manager.create_for_project(&demo_spec());
        manager.terminate(instance.id).await.unwrap();

        let err = manager.start_bringup(instance.id).unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidState { .. }));

        let err = manager.start_bringup(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, ProvisionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let backend = SimulatedBackend::new();
        let (manager, _rx) = manager_with(backend, fast_config());

        let instance = manager.provision_for_project(&demo_spec());
        wait_for_status(&manager, instance.id, InstanceStatus::Running).await;

        assert!(manager.terminate(instance.id).await.unwrap());
        assert!(!manager.terminate(instance.id).await.unwrap());

        let record = manager.get_status(instance.id).unwrap();
        assert_eq!(record.status, InstanceStatus::Terminated);
        assert!(record.terminated_at.is_some());
        assert!(record.accrued_cost >= 0.0);
    }

    #[tokio::test]
    async fn test_terminate_unknown_instance() {
        let (manager, _rx) = manager_with(SimulatedBackend::new(), fast_config());
        let err = manager.terminate(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ProvisionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_record_removed_after_retention() {
        let config = fast_config().with_retention(Duration::from_millis(50));
        let (manager, _rx) = manager_with(SimulatedBackend::new(), config);

        let instance = manager.provision_for_project(&demo_spec());
        wait_for_status(&manager, instance.id, InstanceStatus::Running).await;
        manager.terminate(instance.id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(manager.get_status(instance.id).is_none());
    }
}
