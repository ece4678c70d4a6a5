//! Pipeline planner
//!
//! Synthesizes the task set for a project specification and orders it with a
//! dependency-respecting topological sort:
//!
//! - one setup task (priority 0, no dependencies)
//! - one development task per requirement; dependencies are the declared
//!   requirement dependencies, or the setup task if none are declared
//! - one testing task per requirement with acceptance criteria, depending on
//!   its development task
//! - one deployment task depending on every development task
//!
//! A cyclic dependency graph is rejected here, before anything runs.

use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use loom_core::domain::spec::{DeploymentTarget, Priority, ProjectSpec, Requirement};
use loom_core::domain::task::{FilePatch, Task, TaskKind, TaskPayload, TaskStatus};

use crate::error::PlanError;

/// Deployment always runs after everything else that is runnable
const DEPLOY_PRIORITY: u32 = 1_000;

const SETUP_ESTIMATE: Duration = Duration::from_secs(10 * 60);
const DEPLOY_ESTIMATE: Duration = Duration::from_secs(15 * 60);

/// Builds the full task set for `spec`, topologically ordered.
///
/// Fails if a requirement references an unknown dependency or the dependency
/// graph contains a cycle.
pub fn plan(pipeline_id: Uuid, spec: &ProjectSpec) -> Result<Vec<Task>, PlanError> {
    let mut tasks = Vec::with_capacity(spec.requirements.len() * 2 + 2);

    let setup_id = Uuid::new_v4();
    tasks.push(setup_task(setup_id, pipeline_id, spec));

    // Development tasks are created before dependency resolution so that
    // requirements may reference each other in any order.
    let mut dev_ids: HashMap<&str, Uuid> = HashMap::new();
    for requirement in &spec.requirements {
        let id = Uuid::new_v4();
        dev_ids.insert(requirement.id.as_str(), id);
        tasks.push(development_task(id, pipeline_id, requirement));
    }

    for requirement in &spec.requirements {
        let mut deps = Vec::new();
        for dep in &requirement.depends_on {
            let dep_task =
                dev_ids
                    .get(dep.as_str())
                    .copied()
                    .ok_or_else(|| PlanError::UnknownDependency {
                        requirement: requirement.id.clone(),
                        dependency: dep.clone(),
                    })?;
            deps.push(dep_task);
        }
        if deps.is_empty() {
            deps.push(setup_id);
        }
        let dev_id = dev_ids[requirement.id.as_str()];
        if let Some(task) = tasks.iter_mut().find(|t| t.id == dev_id) {
            task.depends_on = deps;
        }
    }

    for requirement in &spec.requirements {
        if requirement.acceptance_criteria.is_empty() {
            continue;
        }
        let dev_id = dev_ids[requirement.id.as_str()];
        let dev_priority = priority_weight(requirement.priority);
        tasks.push(testing_task(pipeline_id, requirement, dev_id, dev_priority + 1));
    }

    let deploy_deps: Vec<Uuid> = if dev_ids.is_empty() {
        vec![setup_id]
    } else {
        spec.requirements
            .iter()
            .map(|r| dev_ids[r.id.as_str()])
            .collect()
    };
    tasks.push(deployment_task(pipeline_id, spec, deploy_deps));

    topo_sort(tasks)
}

fn priority_weight(priority: Priority) -> u32 {
    match priority {
        Priority::High => 1,
        Priority::Medium => 5,
        Priority::Low => 10,
    }
}

fn new_task(
    id: Uuid,
    pipeline_id: Uuid,
    requirement_id: Option<String>,
    title: String,
    description: String,
    kind: TaskKind,
    priority: u32,
    depends_on: Vec<Uuid>,
    estimated: Duration,
    payload: TaskPayload,
) -> Task {
    Task {
        id,
        pipeline_id,
        requirement_id,
        title,
        description,
        kind,
        status: TaskStatus::Pending,
        priority,
        depends_on,
        estimated,
        actual: None,
        payload,
        result: None,
        started_at: None,
        completed_at: None,
    }
}

fn setup_task(id: Uuid, pipeline_id: Uuid, spec: &ProjectSpec) -> Task {
    let payload = TaskPayload {
        commands: vec![
            format!("loom-agent workspace init --project '{}'", spec.name),
            "git init --initial-branch=main".to_string(),
        ],
        files: vec![FilePatch {
            path: "ARCHITECTURE.md".to_string(),
            contents: spec.architecture.clone(),
        }],
        expected_outputs: vec!["workspace initialized".to_string()],
    };
    new_task(
        id,
        pipeline_id,
        None,
        "Set up project workspace".to_string(),
        format!("Initialize the workspace for '{}'", spec.name),
        TaskKind::Setup,
        0,
        vec![],
        SETUP_ESTIMATE,
        payload,
    )
}

fn development_task(id: Uuid, pipeline_id: Uuid, requirement: &Requirement) -> Task {
    let payload = TaskPayload {
        commands: vec![format!(
            "loom-agent implement --requirement {} --kind {:?}",
            requirement.id, requirement.kind
        )],
        files: vec![FilePatch {
            path: format!("docs/requirements/{}.md", requirement.id),
            contents: requirement.description.clone(),
        }],
        expected_outputs: vec![format!("{} implemented", requirement.title)],
    };
    new_task(
        id,
        pipeline_id,
        Some(requirement.id.clone()),
        format!("Implement: {}", requirement.title),
        requirement.description.clone(),
        TaskKind::Development,
        priority_weight(requirement.priority),
        vec![],
        Duration::from_secs_f64(requirement.estimated_hours.max(0.25) * 3600.0),
        payload,
    )
}

fn testing_task(pipeline_id: Uuid, requirement: &Requirement, dev_id: Uuid, priority: u32) -> Task {
    let payload = TaskPayload {
        commands: vec![format!("loom-agent test --requirement {}", requirement.id)],
        files: vec![],
        expected_outputs: requirement.acceptance_criteria.clone(),
    };
    new_task(
        Uuid::new_v4(),
        pipeline_id,
        Some(requirement.id.clone()),
        format!("Test: {}", requirement.title),
        format!(
            "Verify {} acceptance criterion(s) for '{}'",
            requirement.acceptance_criteria.len(),
            requirement.title
        ),
        TaskKind::Testing,
        priority,
        vec![dev_id],
        Duration::from_secs_f64((requirement.estimated_hours * 0.25).max(0.25) * 3600.0),
        payload,
    )
}

fn deployment_task(pipeline_id: Uuid, spec: &ProjectSpec, depends_on: Vec<Uuid>) -> Task {
    let target_flag = match spec.deployment_target {
        DeploymentTarget::Cloud => "cloud",
        DeploymentTarget::Container => "container",
        DeploymentTarget::Serverless => "serverless",
        DeploymentTarget::StaticSite => "static-site",
    };
    let payload = TaskPayload {
        commands: vec![format!("loom-agent deploy --target {target_flag}")],
        files: vec![],
        expected_outputs: vec![format!("deployed to {target_flag}")],
    };
    new_task(
        Uuid::new_v4(),
        pipeline_id,
        None,
        format!("Deploy '{}'", spec.name),
        format!("Deploy the project to its {target_flag} target"),
        TaskKind::Deployment,
        DEPLOY_PRIORITY,
        depends_on,
        DEPLOY_ESTIMATE,
        payload,
    )
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Depth-first topological sort with an explicit visiting marker.
///
/// Encountering a `Visiting` node again means the graph has a cycle; this is
/// surfaced as a construction error rather than deadlocking the run loop.
fn topo_sort(tasks: Vec<Task>) -> Result<Vec<Task>, PlanError> {
    let index_by_id: HashMap<Uuid, usize> =
        tasks.iter().enumerate().map(|(i, t)| (t.id, i)).collect();
    let mut marks = vec![Mark::Unvisited; tasks.len()];
    let mut order = Vec::with_capacity(tasks.len());

    for idx in 0..tasks.len() {
        visit(idx, &tasks, &index_by_id, &mut marks, &mut order)?;
    }

    Ok(order.into_iter().map(|i| tasks[i].clone()).collect())
}

fn visit(
    idx: usize,
    tasks: &[Task],
    index_by_id: &HashMap<Uuid, usize>,
    marks: &mut Vec<Mark>,
    order: &mut Vec<usize>,
) -> Result<(), PlanError> {
    match marks[idx] {
        Mark::Done => return Ok(()),
        Mark::Visiting => {
            return Err(PlanError::DependencyCycle {
                task: tasks[idx].title.clone(),
            });
        }
        Mark::Unvisited => {}
    }

    marks[idx] = Mark::Visiting;
    for dep in &tasks[idx].depends_on {
        let dep_idx = index_by_id
            .get(dep)
            .copied()
            .ok_or_else(|| PlanError::ForeignDependency {
                task: tasks[idx].title.clone(),
            })?;
        visit(dep_idx, tasks, index_by_id, marks, order)?;
    }
    marks[idx] = Mark::Done;
    order.push(idx);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_core::domain::spec::RequirementKind;

    fn requirement(id: &str, priority: Priority, depends_on: Vec<&str>, criteria: usize) -> Requirement {
        Requirement {
            id: id.to_string(),
            title: format!("Requirement {id}"),
            description: format!("Description of {id}"),
            kind: RequirementKind::Backend,
            priority,
            estimated_hours: 4.0,
            depends_on: depends_on.into_iter().map(String::from).collect(),
            acceptance_criteria: (0..criteria).map(|i| format!("criterion {i}")).collect(),
        }
    }

    fn spec(requirements: Vec<Requirement>) -> ProjectSpec {
        ProjectSpec {
            name: "demo".to_string(),
            description: "demo project".to_string(),
            architecture: "single service".to_string(),
            technologies: vec!["node".to_string()],
            deployment_target: DeploymentTarget::Cloud,
            estimated_hours: requirements.iter().map(|r| r.estimated_hours).sum(),
            requirements,
        }
    }

    fn position(tasks: &[Task], id: Uuid) -> usize {
        tasks.iter().position(|t| t.id == id).unwrap()
    }

    #[test]
    fn test_task_synthesis_counts() {
        let spec = spec(vec![
            requirement("req-1", Priority::High, vec![], 2),
            requirement("req-2", Priority::Medium, vec![], 0),
            requirement("req-3", Priority::Low, vec![], 1),
        ]);
        let tasks = plan(Uuid::new_v4(), &spec).unwrap();

        let count = |kind: TaskKind| tasks.iter().filter(|t| t.kind == kind).count();
        assert_eq!(count(TaskKind::Setup), 1);
        assert_eq!(count(TaskKind::Development), 3);
        // Only requirements with acceptance criteria get a testing task
        assert_eq!(count(TaskKind::Testing), 2);
        assert_eq!(count(TaskKind::Deployment), 1);
    }

    #[test]
    fn test_topological_order_respects_dependencies() {
        let spec = spec(vec![
            requirement("req-1", Priority::High, vec![], 1),
            requirement("req-2", Priority::Medium, vec!["req-1"], 1),
            requirement("req-3", Priority::Low, vec![], 1),
        ]);
        let tasks = plan(Uuid::new_v4(), &spec).unwrap();

        for task in &tasks {
            let own = position(&tasks, task.id);
            for dep in &task.depends_on {
                assert!(
                    position(&tasks, *dep) < own,
                    "task '{}' appears before its dependency",
                    task.title
                );
            }
        }

        // Setup is first, deployment is last
        assert_eq!(tasks.first().unwrap().kind, TaskKind::Setup);
        assert_eq!(tasks.last().unwrap().kind, TaskKind::Deployment);
    }

    #[test]
    fn test_deployment_depends_on_every_development_task() {
        let spec = spec(vec![
            requirement("req-1", Priority::High, vec![], 0),
            requirement("req-2", Priority::Medium, vec![], 0),
            requirement("req-3", Priority::Low, vec![], 0),
        ]);
        let tasks = plan(Uuid::new_v4(), &spec).unwrap();

        let deploy = tasks.iter().find(|t| t.kind == TaskKind::Deployment).unwrap();
        let dev_ids: Vec<Uuid> = tasks
            .iter()
            .filter(|t| t.kind == TaskKind::Development)
            .map(|t| t.id)
            .collect();
        assert_eq!(deploy.depends_on.len(), 3);
        for id in dev_ids {
            assert!(deploy.depends_on.contains(&id));
        }
        assert_eq!(deploy.priority, DEPLOY_PRIORITY);
    }

    #[test]
    fn test_priorities_derived_from_requirement_priority() {
        let spec = spec(vec![
            requirement("req-1", Priority::High, vec![], 1),
            requirement("req-2", Priority::Medium, vec![], 1),
            requirement("req-3", Priority::Low, vec![], 1),
        ]);
        let tasks = plan(Uuid::new_v4(), &spec).unwrap();

        let dev = |id: &str| {
            tasks
                .iter()
                .find(|t| t.kind == TaskKind::Development && t.requirement_id.as_deref() == Some(id))
                .unwrap()
        };
        let test = |id: &str| {
            tasks
                .iter()
                .find(|t| t.kind == TaskKind::Testing && t.requirement_id.as_deref() == Some(id))
                .unwrap()
        };

        assert_eq!(dev("req-1").priority, 1);
        assert_eq!(dev("req-2").priority, 5);
        assert_eq!(dev("req-3").priority, 10);
        assert_eq!(test("req-1").priority, 2);
        assert_eq!(test("req-2").priority, 6);
        assert_eq!(test("req-3").priority, 11);
    }

    #[test]
    fn test_dev_without_declared_dependencies_depends_on_setup() {
        let spec = spec(vec![requirement("req-1", Priority::High, vec![], 0)]);
        let tasks = plan(Uuid::new_v4(), &spec).unwrap();

        let setup = tasks.iter().find(|t| t.kind == TaskKind::Setup).unwrap();
        let dev = tasks.iter().find(|t| t.kind == TaskKind::Development).unwrap();
        assert_eq!(dev.depends_on, vec![setup.id]);
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let spec = spec(vec![requirement("req-1", Priority::High, vec!["req-9"], 0)]);
        let err = plan(Uuid::new_v4(), &spec).unwrap_err();
        assert!(matches!(err, PlanError::UnknownDependency { .. }));
    }

    #[test]
    fn test_dependency_cycle_rejected_at_construction() {
        let spec = spec(vec![
            requirement("req-1", Priority::High, vec!["req-2"], 0),
            requirement("req-2", Priority::Medium, vec!["req-1"], 0),
        ]);
        let err = plan(Uuid::new_v4(), &spec).unwrap_err();
        assert!(matches!(err, PlanError::DependencyCycle { .. }));
    }

    #[test]
    fn test_three_requirement_scenario_ordering() {
        // req-2 depends on req-1; req-3 is independent
        let spec = spec(vec![
            requirement("req-1", Priority::High, vec![], 1),
            requirement("req-2", Priority::Medium, vec!["req-1"], 1),
            requirement("req-3", Priority::Low, vec![], 1),
        ]);
        let tasks = plan(Uuid::new_v4(), &spec).unwrap();

        let find = |kind: TaskKind, req: Option<&str>| {
            tasks
                .iter()
                .find(|t| t.kind == kind && t.requirement_id.as_deref() == req)
                .unwrap()
        };

        let setup = position(&tasks, find(TaskKind::Setup, None).id);
        let dev1 = position(&tasks, find(TaskKind::Development, Some("req-1")).id);
        let dev2 = position(&tasks, find(TaskKind::Development, Some("req-2")).id);
        let test1 = position(&tasks, find(TaskKind::Testing, Some("req-1")).id);
        let test3 = position(&tasks, find(TaskKind::Testing, Some("req-3")).id);
        let deploy = position(&tasks, find(TaskKind::Deployment, None).id);

        assert_eq!(setup, 0);
        assert!(dev1 < dev2);
        assert!(dev1 < test1);
        assert!(test3 < deploy || deploy == tasks.len() - 1);
        assert_eq!(deploy, tasks.len() - 1);
    }
}
