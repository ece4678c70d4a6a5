//! Error types for the coordinator

use loom_core::domain::execution::ExecutionStatus;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("execution not found: {0}")]
    NotFound(Uuid),

    #[error("execution {id} is {status:?}, expected {expected}")]
    InvalidState {
        id: Uuid,
        status: ExecutionStatus,
        expected: &'static str,
    },

    #[error(transparent)]
    Engine(#[from] loom_pipeline::EngineError),
}
