//! Core domain types
//!
//! This module contains the core domain structures used across Loom components.
//! Entities are owned by exactly one component (executions by the coordinator,
//! pipelines by the engine, instances by the provisioner) and reference each
//! other only by id.

pub mod execution;
pub mod instance;
pub mod pipeline;
pub mod spec;
pub mod task;
