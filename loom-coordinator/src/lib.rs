//! Loom Execution Coordinator
//!
//! The coordinator ties the pieces together: it turns a natural-language
//! intent into a project specification, provisions a compute target for it,
//! plans and runs a task pipeline against that target, and publishes coarse
//! progress events for outside observers. It owns the execution table and the
//! receiving end of the component event channel.

pub mod coordinator;
pub mod error;
pub mod extraction;

pub use coordinator::{Coordinator, CoordinatorConfig, ExecutionSnapshot};
pub use error::CoordinatorError;
pub use extraction::{HeuristicSpecGenerator, SpecGenerator};
