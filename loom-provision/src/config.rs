//! Provisioner configuration and instance sizing
//!
//! Instance configurations are derived from the project specification:
//! requirement count and estimated effort pick the tier, and heavyweight
//! technologies (containers, databases) force a floor on memory and storage
//! regardless of tier.

use std::time::Duration;

use loom_core::domain::instance::{InstanceConfig, InstanceTier};
use loom_core::domain::spec::ProjectSpec;

/// Tier step-up thresholds
const MEDIUM_REQUIREMENTS: usize = 10;
const MEDIUM_HOURS: f64 = 48.0;
const LARGE_REQUIREMENTS: usize = 20;
const LARGE_HOURS: f64 = 100.0;

/// Floors applied when the stack includes container or database technologies
const HEAVY_MEMORY_MB: u32 = 8192;
const HEAVY_DISK_GB: u32 = 100;

/// Provisioner configuration
///
/// All timeouts and windows are configurable so tests can shrink them.
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    pub provider: String,
    pub region: String,

    /// Deadline for one attempt of one bring-up step
    pub step_timeout: Duration,

    /// Retries per bring-up step after the first attempt
    pub step_retries: u32,

    /// Base delay between retry attempts, grows linearly per attempt
    pub retry_backoff: Duration,

    /// Interval between reachability polls
    pub reachability_poll: Duration,

    /// How long a terminated instance record stays queryable
    pub retention: Duration,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            provider: "simulated".to_string(),
            region: "local-1".to_string(),
            step_timeout: Duration::from_secs(30),
            step_retries: 2,
            retry_backoff: Duration::from_millis(250),
            reachability_poll: Duration::from_millis(100),
            retention: Duration::from_secs(600),
        }
    }
}

impl ProvisionConfig {
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn with_step_retries(mut self, retries: u32) -> Self {
        self.step_retries = retries;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.provider.is_empty() {
            anyhow::bail!("provider cannot be empty");
        }
        if self.step_timeout.is_zero() {
            anyhow::bail!("step_timeout must be greater than 0");
        }
        if self.reachability_poll.is_zero() {
            anyhow::bail!("reachability_poll must be greater than 0");
        }
        Ok(())
    }
}

/// Derives the instance configuration for a project specification
pub fn derive_instance_config(config: &ProvisionConfig, spec: &ProjectSpec) -> InstanceConfig {
    let tier = tier_for(spec);

    let (vcpus, mut memory_mb, mut disk_gb) = match tier {
        InstanceTier::Small => (2, 4096, 50),
        InstanceTier::Medium => (4, 8192, 100),
        InstanceTier::Large => (8, 16384, 200),
    };

    if has_heavy_stack(spec) {
        memory_mb = memory_mb.max(HEAVY_MEMORY_MB);
        disk_gb = disk_gb.max(HEAVY_DISK_GB);
    }

    InstanceConfig {
        provider: config.provider.clone(),
        region: config.region.clone(),
        tier,
        image: "ubuntu-24.04".to_string(),
        disk_gb,
        memory_mb,
        vcpus,
        open_ports: open_ports(spec),
        software: software_for(spec),
    }
}

fn tier_for(spec: &ProjectSpec) -> InstanceTier {
    let requirements = spec.requirements.len();
    if requirements > LARGE_REQUIREMENTS || spec.estimated_hours > LARGE_HOURS {
        InstanceTier::Large
    } else if requirements > MEDIUM_REQUIREMENTS || spec.estimated_hours > MEDIUM_HOURS {
        InstanceTier::Medium
    } else {
        InstanceTier::Small
    }
}

fn has_heavy_stack(spec: &ProjectSpec) -> bool {
    const HEAVY: &[&str] = &[
        "docker",
        "kubernetes",
        "container",
        "postgres",
        "postgresql",
        "mysql",
        "mongodb",
        "database",
        "redis",
    ];
    spec.technologies.iter().any(|tech| {
        let tech = tech.to_lowercase();
        HEAVY.iter().any(|heavy| tech.contains(heavy))
    })
}

fn software_for(spec: &ProjectSpec) -> Vec<String> {
    let mut software = vec!["git".to_string(), "curl".to_string(), "build-essential".to_string()];

    for tech in &spec.technologies {
        let tech = tech.to_lowercase();
        let package = if tech.contains("node") || tech.contains("react") {
            Some("nodejs")
        } else if tech.contains("python") {
            Some("python3")
        } else if tech.contains("rust") {
            Some("rustup")
        } else if tech.contains("docker") || tech.contains("container") {
            Some("docker")
        } else if tech.contains("postgres") {
            Some("postgresql")
        } else if tech.contains("mysql") {
            Some("mysql-server")
        } else if tech.contains("mongo") {
            Some("mongodb")
        } else if tech.contains("redis") {
            Some("redis")
        } else {
            None
        };
        if let Some(package) = package {
            let package = package.to_string();
            if !software.contains(&package) {
                software.push(package);
            }
        }
    }

    software
}

fn open_ports(spec: &ProjectSpec) -> Vec<u16> {
    let mut ports = vec![22, 80, 443];
    let stack = spec.technologies.join(" ").to_lowercase();
    if stack.contains("node") || stack.contains("react") {
        ports.push(3000);
    }
    if stack.contains("postgres") {
        ports.push(5432);
    }
    ports
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_core::domain::spec::{
        DeploymentTarget, Priority, Requirement, RequirementKind,
    };

    fn spec(requirements: usize, hours: f64, technologies: Vec<&str>) -> ProjectSpec {
        ProjectSpec {
            name: "demo".to_string(),
            description: String::new(),
            architecture: String::new(),
            technologies: technologies.into_iter().map(String::from).collect(),
            deployment_target: DeploymentTarget::Cloud,
            estimated_hours: hours,
            requirements: (0..requirements)
                .map(|i| Requirement {
                    id: format!("req-{i}"),
                    title: format!("Requirement {i}"),
                    description: String::new(),
                    kind: RequirementKind::Backend,
                    priority: Priority::Medium,
                    estimated_hours: hours / requirements.max(1) as f64,
                    depends_on: vec![],
                    acceptance_criteria: vec![],
                })
                .collect(),
        }
    }

    #[test]
    fn test_tier_thresholds() {
        let config = ProvisionConfig::default();

        let small = derive_instance_config(&config, &spec(5, 20.0, vec![]));
        assert_eq!(small.tier, InstanceTier::Small);

        // Requirement count steps the tier up
        let medium = derive_instance_config(&config, &spec(11, 20.0, vec![]));
        assert_eq!(medium.tier, InstanceTier::Medium);

        // So does estimated duration
        let medium = derive_instance_config(&config, &spec(5, 49.0, vec![]));
        assert_eq!(medium.tier, InstanceTier::Medium);

        let large = derive_instance_config(&config, &spec(21, 20.0, vec![]));
        assert_eq!(large.tier, InstanceTier::Large);

        let large = derive_instance_config(&config, &spec(5, 101.0, vec![]));
        assert_eq!(large.tier, InstanceTier::Large);
    }

    #[test]
    fn test_heavy_stack_forces_floors() {
        let config = ProvisionConfig::default();

        let plain = derive_instance_config(&config, &spec(3, 10.0, vec!["node"]));
        assert_eq!(plain.tier, InstanceTier::Small);
        assert_eq!(plain.memory_mb, 4096);

        let docker = derive_instance_config(&config, &spec(3, 10.0, vec!["docker"]));
        assert_eq!(docker.tier, InstanceTier::Small);
        assert_eq!(docker.memory_mb, 8192);
        assert_eq!(docker.disk_gb, 100);

        let db = derive_instance_config(&config, &spec(3, 10.0, vec!["PostgreSQL"]));
        assert_eq!(db.memory_mb, 8192);

        // Floors never shrink a larger tier
        let large = derive_instance_config(&config, &spec(25, 200.0, vec!["docker"]));
        assert_eq!(large.memory_mb, 16384);
        assert_eq!(large.disk_gb, 200);
    }

    #[test]
    fn test_software_derived_from_stack() {
        let config = ProvisionConfig::default();
        let derived = derive_instance_config(&config, &spec(3, 10.0, vec!["Node.js", "PostgreSQL"]));
        assert!(derived.software.contains(&"nodejs".to_string()));
        assert!(derived.software.contains(&"postgresql".to_string()));
        assert!(derived.software.contains(&"git".to_string()));
        assert!(derived.open_ports.contains(&3000));
        assert!(derived.open_ports.contains(&5432));
    }

    #[test]
    fn test_config_validation() {
        assert!(ProvisionConfig::default().validate().is_ok());

        let mut config = ProvisionConfig::default();
        config.step_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
