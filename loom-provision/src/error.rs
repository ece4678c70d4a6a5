//! Error types for the provisioner

use loom_core::domain::instance::InstanceStatus;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("instance not found: {0}")]
    NotFound(Uuid),

    #[error("instance {id} is {status:?}, expected {expected}")]
    InvalidState {
        id: Uuid,
        status: InstanceStatus,
        expected: &'static str,
    },

    /// A bring-up step failed after exhausting its retries
    #[error("bring-up step '{step}' failed: {message}")]
    Step { step: &'static str, message: String },
}
