//! Task domain types
//!
//! A task is one atomic unit of work within a pipeline. Tasks reference their
//! predecessors by id; the dependency graph is validated at planning time.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// A unit of work within a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    /// Originating requirement id; `None` for synthetic setup/deploy tasks
    pub requirement_id: Option<String>,
    pub title: String,
    pub description: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    /// Scheduling priority, lower is more urgent
    pub priority: u32,
    /// Ids of tasks in the same pipeline that must reach a terminal state first
    pub depends_on: Vec<Uuid>,
    pub estimated: Duration,
    /// Wall-clock duration, set on terminal transition
    pub actual: Option<Duration>,
    pub payload: TaskPayload,
    pub result: Option<TaskResult>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    Setup,
    Development,
    Testing,
    Deployment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// A dependency reached a terminal state other than `Completed`,
    /// so this task can never run
    Blocked,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Blocked)
    }
}

/// What executing a task means: files to apply, commands to run, and the
/// observable outputs the task is expected to produce
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPayload {
    pub commands: Vec<String>,
    pub files: Vec<FilePatch>,
    pub expected_outputs: Vec<String>,
}

/// A file to be written on the compute target before any commands run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePatch {
    pub path: String,
    pub contents: String,
}

/// Outcome recorded on a task's terminal transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub output: String,
    pub artifacts: Vec<String>,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Blocked.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }
}
