//! Loom compute-target collaborators
//!
//! Contracts for talking to the compute target a pipeline runs against:
//!
//! - [`TargetExecutor`]: dispatch a command/file payload to a target and
//!   collect its output, with an enforced timeout
//! - [`ComputeBackend`]: the provisioning surface of the underlying compute
//!   provider (create/start/stop/terminate/stats)
//!
//! Both traits ship simulated implementations with configurable latency and
//! injectable faults, so the whole system runs end-to-end offline and tests
//! can exercise every failure path.

pub mod backend;
pub mod error;
pub mod executor;

pub use backend::{BackendHandle, BackendStats, ComputeBackend, SimulatedBackend, SimulatedFault};
pub use error::{Result, TargetError};
pub use executor::{ExecOutcome, ExecRequest, SimulatedExecutor, TargetExecutor, TargetRef};
