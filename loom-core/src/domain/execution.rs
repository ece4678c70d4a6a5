//! Execution domain types
//!
//! An execution is the top-level record tying a user session to a project
//! specification, at most one VM instance, and at most one pipeline. It is
//! mutated exclusively by the coordinator and never deleted, only marked
//! terminal.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::spec::ProjectSpec;

/// One end-to-end run from user intent to completion or failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub session_id: String,
    pub user_id: String,
    pub intent: String,
    pub status: ExecutionStatus,
    /// Specification stored after extraction succeeds
    pub spec: Option<ProjectSpec>,
    pub instance_id: Option<Uuid>,
    pub pipeline_id: Option<Uuid>,
    pub progress: ExecutionProgress,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Analyzing,
    Provisioning,
    Executing,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Human-readable progress descriptor for an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionProgress {
    pub stage: String,
    pub percent: u8,
    pub current_task: Option<String>,
    pub eta_minutes: Option<u64>,
}

impl ExecutionProgress {
    pub fn new(stage: impl Into<String>, percent: u8) -> Self {
        Self {
            stage: stage.into(),
            percent,
            current_task: None,
            eta_minutes: None,
        }
    }
}
