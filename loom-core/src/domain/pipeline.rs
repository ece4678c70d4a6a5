//! Pipeline domain types
//!
//! A pipeline is the ordered task graph derived from one project
//! specification. Tasks are stored in topological order; total count is fixed
//! at creation time.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::{Task, TaskStatus};

/// The ordered collection of tasks for one project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub project: String,
    pub status: PipelineStatus,
    /// Tasks in dependency-respecting (topological) order
    pub tasks: Vec<Task>,
    /// Compute target the pipeline runs against, bound at start
    pub instance_id: Option<Uuid>,
    pub completed_tasks: usize,
    /// Failed or blocked tasks
    pub failed_tasks: usize,
    pub current_task: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStatus {
    Initializing,
    Running,
    Paused,
    Completed,
    Failed,
}

impl PipelineStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl Pipeline {
    pub fn total_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn task(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: Uuid) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// True once every task has reached a terminal state
    pub fn all_tasks_terminal(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    pub fn progress(&self) -> PipelineProgress {
        PipelineProgress {
            total: self.tasks.len(),
            completed: self.completed_tasks,
            failed: self.failed_tasks,
            current_task: self.current_task.clone(),
        }
    }
}

/// Derived progress summary for a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub current_task: Option<String>,
}

impl PipelineProgress {
    /// Tasks not yet in a terminal state
    pub fn outstanding(&self) -> usize {
        self.total - self.completed - self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::{TaskKind, TaskPayload};
    use std::time::Duration;

    fn task(pipeline_id: Uuid, status: TaskStatus) -> Task {
        Task {
            id: Uuid::new_v4(),
            pipeline_id,
            requirement_id: None,
            title: "t".to_string(),
            description: String::new(),
            kind: TaskKind::Setup,
            status,
            priority: 0,
            depends_on: vec![],
            estimated: Duration::from_secs(60),
            actual: None,
            payload: TaskPayload::default(),
            result: None,
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_progress_counts() {
        let id = Uuid::new_v4();
        let pipeline = Pipeline {
            id,
            project: "demo".to_string(),
            status: PipelineStatus::Running,
            tasks: vec![
                task(id, TaskStatus::Completed),
                task(id, TaskStatus::Failed),
                task(id, TaskStatus::Pending),
            ],
            instance_id: None,
            completed_tasks: 1,
            failed_tasks: 1,
            current_task: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
        };

        let progress = pipeline.progress();
        assert_eq!(progress.total, 3);
        assert_eq!(progress.outstanding(), 1);
        assert!(!pipeline.all_tasks_terminal());
    }
}
