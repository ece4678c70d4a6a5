//! Error types for the pipeline engine

use loom_core::domain::pipeline::PipelineStatus;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while constructing a pipeline from a specification
#[derive(Debug, Error)]
pub enum PlanError {
    /// A requirement declares a dependency on a requirement id that does not
    /// exist in the specification
    #[error("requirement '{requirement}' depends on unknown requirement '{dependency}'")]
    UnknownDependency {
        requirement: String,
        dependency: String,
    },

    /// The requirement dependency graph contains a cycle
    #[error("dependency cycle detected involving task '{task}'")]
    DependencyCycle { task: String },

    /// A task references a dependency id outside its own pipeline
    #[error("task '{task}' references a dependency outside its pipeline")]
    ForeignDependency { task: String },
}

/// Errors raised by pipeline engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("pipeline not found: {0}")]
    NotFound(Uuid),

    #[error("pipeline {id} is {status:?}, expected {expected}")]
    InvalidState {
        id: Uuid,
        status: PipelineStatus,
        expected: &'static str,
    },

    /// The compute target is already bound to another running pipeline
    #[error("target {0} is already in use by another pipeline")]
    TargetInUse(Uuid),

    #[error(transparent)]
    Plan(#[from] PlanError),
}
