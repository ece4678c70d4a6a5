//! Loom Provisioning State Machine
//!
//! Owns the lifecycle of compute targets:
//!
//! - Configuration derivation: scale tier, memory, vCPU and storage from the
//!   project specification's requirement count, estimated effort and
//!   technology stack
//! - Bring-up: an ordered sequence of cancellable, independently-retryable
//!   steps (acquire, reachability, software, agent, verify), each with its
//!   own timeout
//! - Termination: cost accrual from elapsed running time, with the record
//!   retained for late status queries and removed after a retention window
//!
//! Lifecycle events are published on the coordinator's channel.

pub mod bringup;
pub mod config;
pub mod error;
pub mod manager;

pub use bringup::BringupStep;
pub use config::{ProvisionConfig, derive_instance_config};
pub use error::ProvisionError;
pub use manager::InstanceManager;
