//! VM instance domain types
//!
//! A `VmInstance` is one provisioned compute target. Cost accrues from
//! elapsed running time at a rate determined by the instance tier.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A provisioned compute target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmInstance {
    pub id: Uuid,
    pub name: String,
    pub status: InstanceStatus,
    pub config: InstanceConfig,
    /// Populated once the target is reachable
    pub connection: Option<ConnectionInfo>,
    pub project: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub terminated_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Accrued cost in currency units, computed at termination
    pub accrued_cost: f64,
    /// Error text recorded when bring-up fails
    pub last_error: Option<String>,
}

impl VmInstance {
    /// Cost accrued for the given running time at this instance's tier rate
    pub fn cost_for(&self, running: chrono::Duration) -> f64 {
        let hours = running.num_seconds().max(0) as f64 / 3600.0;
        hours * self.config.tier.hourly_rate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    Provisioning,
    Running,
    Stopped,
    Terminated,
    Error,
}

impl InstanceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Error)
    }
}

/// Configuration snapshot derived from the project specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub provider: String,
    pub region: String,
    pub tier: InstanceTier,
    pub image: String,
    pub disk_gb: u32,
    pub memory_mb: u32,
    pub vcpus: u32,
    pub open_ports: Vec<u16>,
    /// Software installed during bring-up
    pub software: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceTier {
    Small,
    Medium,
    Large,
}

impl InstanceTier {
    pub fn hourly_rate(self) -> f64 {
        match self {
            Self::Small => 0.05,
            Self::Medium => 0.10,
            Self::Large => 0.20,
        }
    }
}

/// Connection details for a reachable instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub address: String,
    /// Reference to a credential held elsewhere, never the secret itself
    pub credential_ref: String,
    pub port: u16,
}
