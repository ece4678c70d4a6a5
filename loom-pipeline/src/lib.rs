//! Loom Task Pipeline Engine
//!
//! Turns a project specification into a dependency graph of tasks and drives
//! them to completion against a provisioned compute target:
//!
//! - Planner: synthesizes setup/development/testing/deployment tasks from the
//!   specification's requirements and orders them with a cycle-rejecting
//!   topological sort
//! - Engine: owns the pipeline table and the per-pipeline run loop, with
//!   pause/resume, blocked-task cascade and stuck detection
//!
//! Task failures are local: a failed task is recorded and counted, its
//! dependents are blocked, and the pipeline still runs every independent task
//! to a terminal state.

pub mod engine;
pub mod error;
pub mod planner;

pub use engine::{EngineConfig, PipelineEngine};
pub use error::{EngineError, PlanError};
