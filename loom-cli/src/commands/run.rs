//! Run command handler
//!
//! Wires the whole stack together in-process: simulated backend and executor,
//! provisioner, pipeline engine and coordinator. Follows the execution's
//! event stream until it reaches a terminal state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use colored::*;
use tokio::sync::{broadcast, mpsc};

use loom_coordinator::{Coordinator, CoordinatorConfig, HeuristicSpecGenerator};
use loom_core::event::ExecutionEvent;
use loom_pipeline::{EngineConfig, PipelineEngine};
use loom_provision::{InstanceManager, ProvisionConfig};
use loom_target::{SimulatedBackend, SimulatedExecutor};

pub async fn handle_run(intent: &str, session: &str, user: &str, cooldown: u64) -> Result<()> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let executor = Arc::new(SimulatedExecutor::new());
    let provisioner = InstanceManager::new(
        Arc::new(SimulatedBackend::new()),
        executor.clone(),
        events_tx.clone(),
        ProvisionConfig::default(),
    );
    let engine = PipelineEngine::new(executor, events_tx, EngineConfig::default());
    let config = CoordinatorConfig {
        termination_cooldown: Duration::from_secs(cooldown),
        ..Default::default()
    };
    let coordinator = Coordinator::new(
        provisioner,
        engine,
        Arc::new(HeuristicSpecGenerator::new()),
        events_rx,
        config,
    );

    let mut events = coordinator.subscribe();
    let execution = coordinator.start_execution(session, user, intent);
    println!("{} {}", "execution".bold(), execution.id.to_string().cyan());

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                eprintln!("{}", format!("(skipped {skipped} event(s))").dimmed());
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => bail!("event stream closed unexpectedly"),
        };
        if event.execution_id() != execution.id {
            continue;
        }

        match &event {
            ExecutionEvent::Started { .. } => {
                println!("  {} analyzing intent", "→".dimmed());
            }
            ExecutionEvent::Progress { progress, .. } => {
                let detail = progress.current_task.as_deref().unwrap_or("");
                let eta = progress
                    .eta_minutes
                    .map(|minutes| format!(" eta ~{minutes}m"))
                    .unwrap_or_default();
                println!(
                    "  {} {:>3}% {}{} {}",
                    "→".dimmed(),
                    progress.percent,
                    progress.stage.bold(),
                    eta.dimmed(),
                    detail.dimmed()
                );
            }
            ExecutionEvent::Completed { .. } => {
                println!("{}", "✓ execution completed".green().bold());
            }
            ExecutionEvent::Failed { error, .. } => {
                println!("{} {}", "✗ execution failed:".red().bold(), error);
            }
            ExecutionEvent::Cancelled { .. } => {
                println!("{}", "execution cancelled".yellow());
            }
        }

        if event.is_terminal() {
            break;
        }
    }

    // Give the post-run teardown a moment so the summary shows final state
    tokio::time::sleep(Duration::from_millis(200)).await;

    if let Some(snapshot) = coordinator.status(execution.id) {
        if let Some(pipeline) = snapshot.pipeline {
            let progress = pipeline.progress();
            println!(
                "tasks: {} completed, {} failed or blocked, {} total",
                progress.completed.to_string().green(),
                progress.failed.to_string().red(),
                progress.total
            );
        }
        if let Some(instance) = snapshot.instance {
            println!(
                "instance {} ({:?}, {:?}) cost ${:.4}",
                instance.name.cyan(),
                instance.config.tier,
                instance.status,
                instance.accrued_cost
            );
        }
    }

    Ok(())
}
