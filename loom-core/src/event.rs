//! Typed events passed between components
//!
//! The provisioner and pipeline engine publish `CoreEvent`s on an mpsc
//! channel whose receiver the coordinator owns. The coordinator re-publishes
//! coarse `ExecutionEvent`s on a broadcast channel for UI and telemetry
//! consumers. Events carry ids and snapshots, never live references, so no
//! ownership cycles form between components.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::execution::ExecutionProgress;
use crate::domain::instance::VmInstance;
use crate::domain::pipeline::PipelineProgress;

/// Event published by the provisioning state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InstanceEvent {
    ProvisioningStarted {
        instance: VmInstance,
    },
    /// One bring-up step finished; emitted for per-step observability
    StepCompleted {
        instance_id: Uuid,
        step: String,
    },
    ProvisioningSucceeded {
        instance: VmInstance,
    },
    ProvisioningFailed {
        instance: VmInstance,
        error: String,
    },
    Terminated {
        instance_id: Uuid,
        cost: f64,
    },
}

/// Event published by the task pipeline engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    Created {
        pipeline_id: Uuid,
        total_tasks: usize,
    },
    Started {
        pipeline_id: Uuid,
        instance_id: Uuid,
    },
    TaskStarted {
        pipeline_id: Uuid,
        task_id: Uuid,
        title: String,
    },
    TaskCompleted {
        pipeline_id: Uuid,
        task_id: Uuid,
        progress: PipelineProgress,
    },
    TaskFailed {
        pipeline_id: Uuid,
        task_id: Uuid,
        error: String,
        progress: PipelineProgress,
    },
    /// A task was blocked because a dependency failed or was itself blocked
    TaskBlocked {
        pipeline_id: Uuid,
        task_id: Uuid,
        failed_dependency: Uuid,
    },
    Paused {
        pipeline_id: Uuid,
    },
    Resumed {
        pipeline_id: Uuid,
    },
    Completed {
        pipeline_id: Uuid,
        progress: PipelineProgress,
    },
    /// Terminal failure of the pipeline itself, e.g. a stuck dependency graph
    Failed {
        pipeline_id: Uuid,
        reason: String,
    },
}

/// Union of subordinate component events, consumed by the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CoreEvent {
    Instance(InstanceEvent),
    Pipeline(PipelineEvent),
}

impl From<InstanceEvent> for CoreEvent {
    fn from(event: InstanceEvent) -> Self {
        Self::Instance(event)
    }
}

impl From<PipelineEvent> for CoreEvent {
    fn from(event: PipelineEvent) -> Self {
        Self::Pipeline(event)
    }
}

/// Coarse execution event broadcast to outside observers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionEvent {
    Started {
        execution_id: Uuid,
        intent: String,
    },
    Progress {
        execution_id: Uuid,
        progress: ExecutionProgress,
    },
    Completed {
        execution_id: Uuid,
    },
    Failed {
        execution_id: Uuid,
        error: String,
    },
    Cancelled {
        execution_id: Uuid,
    },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> Uuid {
        match self {
            Self::Started { execution_id, .. }
            | Self::Progress { execution_id, .. }
            | Self::Completed { execution_id }
            | Self::Failed { execution_id, .. }
            | Self::Cancelled { execution_id } => *execution_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}
