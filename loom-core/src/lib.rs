//! Loom Core
//!
//! Core types for the Loom execution orchestrator.
//!
//! This crate contains:
//! - Domain types: Core business entities (Execution, Pipeline, Task, VmInstance)
//! - Event types: Typed messages passed between components over channels

pub mod domain;
pub mod event;
