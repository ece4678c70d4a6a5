//! Compute-backend provisioning contract
//!
//! The backend is the provider-facing surface of provisioning: create a
//! resource, start/stop it, tear it down, and read usage stats. Reachability
//! is modeled as a poll for connection details, which stay `None` until the
//! resource answers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use loom_core::domain::instance::{ConnectionInfo, InstanceConfig};

use crate::error::{Result, TargetError};

/// Provider-side identifier for a created compute resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendHandle {
    pub id: String,
}

/// Usage statistics for a running resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendStats {
    pub cpu_percent: f64,
    pub memory_mb: u64,
    pub uptime: Duration,
}

/// Provisioning surface of a compute provider
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Allocates a resource matching `config`. The resource is not yet running.
    async fn create(&self, config: &InstanceConfig, name: &str) -> Result<BackendHandle>;

    async fn start(&self, handle: &BackendHandle) -> Result<()>;

    async fn stop(&self, handle: &BackendHandle) -> Result<()>;

    /// Destroys the resource. Safe to call on an already-destroyed handle.
    async fn terminate(&self, handle: &BackendHandle) -> Result<()>;

    async fn stats(&self, handle: &BackendHandle) -> Result<BackendStats>;

    /// Connection details, or `None` while the resource is still coming up
    async fn address(&self, handle: &BackendHandle) -> Result<Option<ConnectionInfo>>;
}

/// Fault injected into [`SimulatedBackend`] operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedFault {
    Create,
    Start,
    /// `address` never reports connection details
    NeverReachable,
}

struct SimResource {
    name: String,
    running: bool,
    polls: u32,
    started: Instant,
}

/// In-memory compute backend with configurable latency and injectable faults
pub struct SimulatedBackend {
    resources: Mutex<HashMap<String, SimResource>>,
    latency: Duration,
    /// Number of `address` polls before the resource reports as reachable
    reachable_after: u32,
    fault: Option<SimulatedFault>,
    terminate_calls: AtomicUsize,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self {
            resources: Mutex::new(HashMap::new()),
            latency: Duration::from_millis(5),
            reachable_after: 2,
            fault: None,
            terminate_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn reachable_after(mut self, polls: u32) -> Self {
        self.reachable_after = polls;
        self
    }

    pub fn failing(mut self, fault: SimulatedFault) -> Self {
        self.fault = Some(fault);
        self
    }

    /// How many times `terminate` was invoked, across all handles
    pub fn terminate_call_count(&self) -> usize {
        self.terminate_calls.load(Ordering::SeqCst)
    }

    fn check_fault(&self, fault: SimulatedFault, what: &str) -> Result<()> {
        if self.fault == Some(fault) {
            return Err(TargetError::Backend(format!("injected {what} failure")));
        }
        Ok(())
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ComputeBackend for SimulatedBackend {
    async fn create(&self, config: &InstanceConfig, name: &str) -> Result<BackendHandle> {
        tokio::time::sleep(self.latency).await;
        self.check_fault(SimulatedFault::Create, "create")?;

        let id = format!("sim-{}", Uuid::new_v4());
        info!(
            "created simulated resource {} ({:?}, {} vCPU, {} MB)",
            id, config.tier, config.vcpus, config.memory_mb
        );

        self.resources.lock().unwrap().insert(
            id.clone(),
            SimResource {
                name: name.to_string(),
                running: false,
                polls: 0,
                started: Instant::now(),
            },
        );

        Ok(BackendHandle { id })
    }

    async fn start(&self, handle: &BackendHandle) -> Result<()> {
        tokio::time::sleep(self.latency).await;
        self.check_fault(SimulatedFault::Start, "start")?;

        let mut resources = self.resources.lock().unwrap();
        let resource = resources
            .get_mut(&handle.id)
            .ok_or_else(|| TargetError::UnknownHandle(handle.id.clone()))?;
        resource.running = true;
        resource.started = Instant::now();
        debug!("started simulated resource {} ({})", handle.id, resource.name);
        Ok(())
    }

    async fn stop(&self, handle: &BackendHandle) -> Result<()> {
        tokio::time::sleep(self.latency).await;
        let mut resources = self.resources.lock().unwrap();
        let resource = resources
            .get_mut(&handle.id)
            .ok_or_else(|| TargetError::UnknownHandle(handle.id.clone()))?;
        resource.running = false;
        Ok(())
    }

    async fn terminate(&self, handle: &BackendHandle) -> Result<()> {
        tokio::time::sleep(self.latency).await;
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        if self.resources.lock().unwrap().remove(&handle.id).is_some() {
            info!("terminated simulated resource {}", handle.id);
        }
        Ok(())
    }

    async fn stats(&self, handle: &BackendHandle) -> Result<BackendStats> {
        tokio::time::sleep(self.latency).await;
        let resources = self.resources.lock().unwrap();
        let resource = resources
            .get(&handle.id)
            .ok_or_else(|| TargetError::UnknownHandle(handle.id.clone()))?;
        Ok(BackendStats {
            cpu_percent: 3.5,
            memory_mb: 512,
            uptime: resource.started.elapsed(),
        })
    }

    async fn address(&self, handle: &BackendHandle) -> Result<Option<ConnectionInfo>> {
        tokio::time::sleep(self.latency).await;
        if self.fault == Some(SimulatedFault::NeverReachable) {
            return Ok(None);
        }

        let mut resources = self.resources.lock().unwrap();
        let resource = resources
            .get_mut(&handle.id)
            .ok_or_else(|| TargetError::UnknownHandle(handle.id.clone()))?;

        if !resource.running {
            return Ok(None);
        }
        resource.polls += 1;
        if resource.polls < self.reachable_after {
            return Ok(None);
        }

        Ok(Some(ConnectionInfo {
            address: format!("10.64.{}.{}", resource.polls % 256, handle.id.len() % 256),
            credential_ref: format!("cred/{}", handle.id),
            port: 2222,
        }))
    }
}
