//! Requirement extraction
//!
//! Turns a free-form intent into a structured [`ProjectSpec`]. The trait
//! keeps the coordinator independent of how the analysis happens; the
//! heuristic implementation here is keyword-driven and fully deterministic,
//! which is what tests and the demo CLI want.

use async_trait::async_trait;
use tracing::debug;

use loom_core::domain::spec::{
    DeploymentTarget, Priority, ProjectSpec, Requirement, RequirementKind,
};

/// Produces a project specification from a natural-language intent.
///
/// Returns `Ok(None)` when no specification can be derived, which the
/// coordinator treats as an analysis failure.
#[async_trait]
pub trait SpecGenerator: Send + Sync {
    async fn generate(&self, intent: &str, session_id: &str)
    -> anyhow::Result<Option<ProjectSpec>>;
}

/// Keyword-based spec generator
#[derive(Debug, Default)]
pub struct HeuristicSpecGenerator;

impl HeuristicSpecGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SpecGenerator for HeuristicSpecGenerator {
    async fn generate(
        &self,
        intent: &str,
        _session_id: &str,
    ) -> anyhow::Result<Option<ProjectSpec>> {
        let intent = intent.trim();
        if intent.is_empty() {
            return Ok(None);
        }

        let lower = intent.to_lowercase();
        let hours = base_hours(&lower);
        let mut requirements = Vec::new();

        let wants_auth = contains_any(&lower, &["login", "auth", "sign in", "signin", "account"]);
        let wants_api = contains_any(&lower, &["api", "endpoint", "rest", "graphql"]);
        let wants_data = contains_any(&lower, &["database", "store", "persist", "storage"]);
        let wants_ui = contains_any(
            &lower,
            &["page", "ui", "frontend", "layout", "style", "design", "website", "dashboard"],
        );
        let wants_deploy = contains_any(&lower, &["deploy", "launch", "production", "host"]);

        if wants_data {
            requirements.push(Requirement {
                id: "req-data".to_string(),
                title: "Data storage".to_string(),
                description: "Set up the data model and persistence layer".to_string(),
                kind: RequirementKind::Database,
                priority: Priority::Medium,
                estimated_hours: hours,
                depends_on: vec![],
                acceptance_criteria: vec!["schema migrates cleanly".to_string()],
            });
        }

        if wants_auth {
            requirements.push(Requirement {
                id: "req-auth".to_string(),
                title: "User authentication".to_string(),
                description: "Account registration and session handling".to_string(),
                kind: RequirementKind::Backend,
                priority: Priority::Medium,
                estimated_hours: hours,
                depends_on: if wants_data {
                    vec!["req-data".to_string()]
                } else {
                    vec![]
                },
                acceptance_criteria: vec![
                    "users can register and sign in".to_string(),
                    "invalid credentials are rejected".to_string(),
                ],
            });
        }

        if wants_api {
            let mut depends_on = Vec::new();
            if wants_data {
                depends_on.push("req-data".to_string());
            }
            requirements.push(Requirement {
                id: "req-api".to_string(),
                title: "Service API".to_string(),
                description: "Public API surface for the application".to_string(),
                kind: RequirementKind::Api,
                priority: Priority::Medium,
                estimated_hours: hours,
                depends_on,
                acceptance_criteria: vec!["endpoints respond with expected payloads".to_string()],
            });
        }

        if wants_ui {
            let mut depends_on = Vec::new();
            if wants_auth {
                depends_on.push("req-auth".to_string());
            }
            if wants_api {
                depends_on.push("req-api".to_string());
            }
            requirements.push(Requirement {
                id: "req-ui".to_string(),
                title: "User interface".to_string(),
                description: "Pages, layout and styling".to_string(),
                kind: RequirementKind::Frontend,
                priority: Priority::Medium,
                estimated_hours: hours,
                depends_on,
                acceptance_criteria: vec!["pages render without errors".to_string()],
            });
        }

        if wants_deploy {
            requirements.push(Requirement {
                id: "req-release".to_string(),
                title: "Release preparation".to_string(),
                description: "Production configuration and release checks".to_string(),
                kind: RequirementKind::Deployment,
                priority: Priority::Low,
                estimated_hours: hours / 2.0,
                depends_on: vec![],
                acceptance_criteria: vec!["release checklist passes".to_string()],
            });
        }

        // Nothing matched: treat the whole intent as one piece of work
        if requirements.is_empty() {
            requirements.push(Requirement {
                id: "req-main".to_string(),
                title: "Core functionality".to_string(),
                description: intent.to_string(),
                kind: RequirementKind::Fullstack,
                priority: Priority::High,
                estimated_hours: hours,
                depends_on: vec![],
                acceptance_criteria: vec!["described behavior works end to end".to_string()],
            });
        } else {
            requirements[0].priority = Priority::High;
        }

        let estimated_hours = requirements.iter().map(|r| r.estimated_hours).sum();
        let spec = ProjectSpec {
            name: project_name(intent),
            description: intent.to_string(),
            architecture: architecture_for(wants_api, wants_ui),
            technologies: technologies(&lower),
            deployment_target: deployment_target(&lower),
            estimated_hours,
            requirements,
        };

        debug!(
            "extracted {} requirement(s), ~{:.0}h, from intent '{}'",
            spec.requirements.len(),
            spec.estimated_hours,
            truncate(intent, 60)
        );
        Ok(Some(spec))
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

fn base_hours(lower: &str) -> f64 {
    if contains_any(lower, &["simple", "basic", "small", "minimal"]) {
        2.0
    } else if contains_any(lower, &["complex", "advanced", "large", "enterprise"]) {
        16.0
    } else {
        6.0
    }
}

fn technologies(lower: &str) -> Vec<String> {
    let mut stack = Vec::new();
    if contains_any(lower, &["react"]) {
        stack.push("react".to_string());
    }
    if contains_any(lower, &["node", "javascript", "typescript", "react", "website", "frontend"]) {
        stack.push("node".to_string());
    }
    if contains_any(lower, &["python"]) {
        stack.push("python".to_string());
    }
    if contains_any(lower, &["rust"]) {
        stack.push("rust".to_string());
    }
    if contains_any(lower, &["postgres", "database", "store", "persist"]) {
        stack.push("postgresql".to_string());
    }
    if contains_any(lower, &["docker", "container"]) {
        stack.push("docker".to_string());
    }
    if stack.is_empty() {
        stack.push("node".to_string());
    }
    stack
}

fn deployment_target(lower: &str) -> DeploymentTarget {
    if contains_any(lower, &["docker", "container", "kubernetes"]) {
        DeploymentTarget::Container
    } else if contains_any(lower, &["serverless", "lambda", "function"]) {
        DeploymentTarget::Serverless
    } else if contains_any(lower, &["static site", "static page", "landing page"]) {
        DeploymentTarget::StaticSite
    } else {
        DeploymentTarget::Cloud
    }
}

fn architecture_for(wants_api: bool, wants_ui: bool) -> String {
    match (wants_api, wants_ui) {
        (true, true) => "web application with API backend".to_string(),
        (true, false) => "API service".to_string(),
        (false, true) => "web frontend".to_string(),
        (false, false) => "single service".to_string(),
    }
}

/// Short display name built from the leading words of the intent
fn project_name(intent: &str) -> String {
    let words: Vec<&str> = intent
        .split_whitespace()
        .filter(|word| {
            !matches!(
                word.to_lowercase().as_str(),
                "a" | "an" | "the" | "build" | "create" | "make" | "me" | "please" | "with"
            )
        })
        .take(4)
        .collect();
    if words.is_empty() {
        "project".to_string()
    } else {
        words.join(" ")
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
