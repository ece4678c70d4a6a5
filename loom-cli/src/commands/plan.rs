//! Plan command handler

use anyhow::{Result, bail};
use colored::*;
use loom_coordinator::{HeuristicSpecGenerator, SpecGenerator};
use loom_pipeline::planner;
use uuid::Uuid;

/// Shows the ordered task pipeline an intent would produce.
pub async fn handle_plan(intent: &str, session: &str) -> Result<()> {
    let generator = HeuristicSpecGenerator::new();
    let Some(spec) = generator.generate(intent, session).await? else {
        bail!("no specification could be extracted from the intent");
    };

    let tasks = planner::plan(Uuid::new_v4(), &spec)?;

    println!(
        "{} {} task(s) for '{}'",
        "plan:".bold(),
        tasks.len(),
        spec.name
    );
    for (position, task) in tasks.iter().enumerate() {
        let requirement = task
            .requirement_id
            .as_deref()
            .map(|id| format!(" ({id})"))
            .unwrap_or_default();
        println!(
            "  {:>2}. {} {}{} [{:?}, prio {}, ~{}m]",
            position + 1,
            task.title.bold(),
            task.description.dimmed(),
            requirement.dimmed(),
            task.kind,
            task.priority,
            task.estimated.as_secs() / 60
        );
        for command in &task.payload.commands {
            println!("      $ {}", command.dimmed());
        }
    }

    Ok(())
}
