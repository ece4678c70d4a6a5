//! Extract command handler

use anyhow::{Result, bail};
use colored::*;
use loom_coordinator::{HeuristicSpecGenerator, SpecGenerator};

/// Extracts a specification from the intent and prints it.
pub async fn handle_extract(intent: &str, session: &str, json: bool) -> Result<()> {
    let generator = HeuristicSpecGenerator::new();
    let Some(spec) = generator.generate(intent, session).await? else {
        bail!("no specification could be extracted from the intent");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&spec)?);
        return Ok(());
    }

    println!("{}", spec.name.bold());
    println!("  Architecture: {}", spec.architecture);
    println!("  Target:       {:?}", spec.deployment_target);
    println!("  Stack:        {}", spec.technologies.join(", ").dimmed());
    println!("  Estimate:     {:.1}h", spec.estimated_hours);
    println!("  Requirements:");
    for requirement in &spec.requirements {
        println!(
            "    {} {} [{:?}, {:?}, {:.1}h]",
            requirement.id.cyan(),
            requirement.title.bold(),
            requirement.kind,
            requirement.priority,
            requirement.estimated_hours
        );
        if !requirement.depends_on.is_empty() {
            println!(
                "      depends on: {}",
                requirement.depends_on.join(", ").dimmed()
            );
        }
        for criterion in &requirement.acceptance_criteria {
            println!("      - {}", criterion.dimmed());
        }
    }

    Ok(())
}
