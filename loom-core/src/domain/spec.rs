//! Project specification types
//!
//! A `ProjectSpec` is the structured output of requirement extraction: the
//! bridge between a natural-language intent and an executable pipeline.

use serde::{Deserialize, Serialize};

/// Structured project specification extracted from a user intent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSpec {
    pub name: String,
    pub description: String,
    pub architecture: String,
    pub technologies: Vec<String>,
    pub deployment_target: DeploymentTarget,
    /// Total estimated effort across all requirements, in hours
    pub estimated_hours: f64,
    pub requirements: Vec<Requirement>,
}

impl ProjectSpec {
    /// Looks up a requirement by its declared id
    pub fn requirement(&self, id: &str) -> Option<&Requirement> {
        self.requirements.iter().find(|r| r.id == id)
    }
}

/// One structured feature or work item within a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    pub id: String,
    pub title: String,
    pub description: String,
    pub kind: RequirementKind,
    pub priority: Priority,
    pub estimated_hours: f64,
    /// Ids of requirements whose development must complete first
    pub depends_on: Vec<String>,
    pub acceptance_criteria: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequirementKind {
    Frontend,
    Backend,
    Fullstack,
    Api,
    Database,
    Deployment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Where the finished project is expected to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentTarget {
    Cloud,
    Container,
    Serverless,
    StaticSite,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirement_lookup() {
        let spec = ProjectSpec {
            name: "demo".to_string(),
            description: String::new(),
            architecture: String::new(),
            technologies: vec![],
            deployment_target: DeploymentTarget::Cloud,
            estimated_hours: 4.0,
            requirements: vec![Requirement {
                id: "req-1".to_string(),
                title: "Login".to_string(),
                description: String::new(),
                kind: RequirementKind::Backend,
                priority: Priority::High,
                estimated_hours: 4.0,
                depends_on: vec![],
                acceptance_criteria: vec![],
            }],
        };

        assert!(spec.requirement("req-1").is_some());
        assert!(spec.requirement("req-2").is_none());
    }
}
