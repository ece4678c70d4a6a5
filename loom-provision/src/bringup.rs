//! Instance bring-up sequence
//!
//! Bring-up is an ordered list of steps, each retried independently with a
//! per-attempt timeout. A failure after exhausted retries tears down whatever
//! the earlier steps acquired.

use std::future::Future;
use std::time::Duration;

use loom_core::domain::instance::{ConnectionInfo, VmInstance};
use loom_target::{BackendHandle, ComputeBackend, ExecRequest, TargetError, TargetExecutor, TargetRef};
use tracing::{debug, warn};

use crate::config::ProvisionConfig;
use crate::error::ProvisionError;

/// One step of the bring-up sequence, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringupStep {
    /// Allocate and start the compute resource
    Acquire,
    /// Wait for the resource to publish a reachable address
    Reachability,
    /// Install the software packages the project needs
    Software,
    /// Install and configure the execution agent
    Agent,
    /// Confirm the installed toolchain responds
    Verify,
}

impl BringupStep {
    pub const ALL: [BringupStep; 5] = [
        BringupStep::Acquire,
        BringupStep::Reachability,
        BringupStep::Software,
        BringupStep::Agent,
        BringupStep::Verify,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BringupStep::Acquire => "acquire",
            BringupStep::Reachability => "reachability",
            BringupStep::Software => "software",
            BringupStep::Agent => "agent",
            BringupStep::Verify => "verify",
        }
    }
}

pub(crate) struct BringupOutcome {
    pub handle: BackendHandle,
    pub connection: ConnectionInfo,
}

/// Runs the full bring-up sequence for a freshly recorded instance.
///
/// `on_step` is invoked after each step succeeds. On any failure past Acquire
/// the acquired resource is released before the error is returned.
pub(crate) async fn run(
    backend: &dyn ComputeBackend,
    executor: &dyn TargetExecutor,
    config: &ProvisionConfig,
    instance: &VmInstance,
    mut on_step: impl FnMut(BringupStep),
) -> Result<BringupOutcome, ProvisionError> {
    let handle = with_retry(config, BringupStep::Acquire, |_| acquire(backend, instance)).await?;
    on_step(BringupStep::Acquire);

    let result = post_acquire(backend, executor, config, instance, &handle, &mut on_step).await;
    match result {
        Ok(connection) => Ok(BringupOutcome { handle, connection }),
        Err(err) => {
            if let Err(terminate_err) = backend.terminate(&handle).await {
                warn!(
                    instance_id = %instance.id,
                    error = %terminate_err,
                    "failed to release resource after bring-up failure"
                );
            }
            Err(err)
        }
    }
}

async fn post_acquire(
    backend: &dyn ComputeBackend,
    executor: &dyn TargetExecutor,
    config: &ProvisionConfig,
    instance: &VmInstance,
    handle: &BackendHandle,
    on_step: &mut impl FnMut(BringupStep),
) -> Result<ConnectionInfo, ProvisionError> {
    let connection = with_retry(config, BringupStep::Reachability, |_| {
        wait_reachable(backend, handle, config.reachability_poll)
    })
    .await?;
    on_step(BringupStep::Reachability);

    let target = TargetRef {
        instance_id: instance.id,
        address: connection.address.clone(),
        port: connection.port,
    };

    with_retry(config, BringupStep::Software, |_| {
        install_software(executor, &target, &instance.config.software, config.step_timeout)
    })
    .await?;
    on_step(BringupStep::Software);

    with_retry(config, BringupStep::Agent, |_| {
        install_agent(executor, &target, config.step_timeout)
    })
    .await?;
    on_step(BringupStep::Agent);

    with_retry(config, BringupStep::Verify, |_| {
        verify(executor, &target, &instance.config.software, config.step_timeout)
    })
    .await?;
    on_step(BringupStep::Verify);

    Ok(connection)
}

/// Retries a step with a per-attempt timeout and linear backoff.
async fn with_retry<T, F, Fut>(
    config: &ProvisionConfig,
    step: BringupStep,
    operation: F,
) -> Result<T, ProvisionError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, TargetError>>,
{
    let attempts = config.step_retries + 1;
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match tokio::time::timeout(config.step_timeout, operation(attempt)).await {
            Ok(Ok(value)) => {
                debug!(step = step.name(), attempt, "bring-up step succeeded");
                return Ok(value);
            }
            Ok(Err(err)) => {
                last_error = err.to_string();
            }
            Err(_) => {
                last_error = format!("attempt timed out after {:?}", config.step_timeout);
            }
        }

        if attempt < attempts {
            debug!(step = step.name(), attempt, error = %last_error, "retrying bring-up step");
            tokio::time::sleep(config.retry_backoff * attempt).await;
        }
    }

    Err(ProvisionError::Step {
        step: step.name(),
        message: last_error,
    })
}

async fn acquire(
    backend: &dyn ComputeBackend,
    instance: &VmInstance,
) -> Result<BackendHandle, TargetError> {
    let handle = backend.create(&instance.config, &instance.name).await?;
    if let Err(err) = backend.start(&handle).await {
        // Do not leak the created resource when start fails
        let _ = backend.terminate(&handle).await;
        return Err(err);
    }
    Ok(handle)
}

async fn wait_reachable(
    backend: &dyn ComputeBackend,
    handle: &BackendHandle,
    poll: Duration,
) -> Result<ConnectionInfo, TargetError> {
    // Bounded by the step timeout in with_retry
    loop {
        if let Some(connection) = backend.address(handle).await? {
            return Ok(connection);
        }
        tokio::time::sleep(poll).await;
    }
}

async fn install_software(
    executor: &dyn TargetExecutor,
    target: &TargetRef,
    software: &[String],
    timeout: Duration,
) -> Result<(), TargetError> {
    let commands = software
        .iter()
        .map(|package| format!("apt-get install -y {package}"))
        .collect();
    run_commands(executor, target, commands, timeout).await
}

async fn install_agent(
    executor: &dyn TargetExecutor,
    target: &TargetRef,
    timeout: Duration,
) -> Result<(), TargetError> {
    let commands = vec![
        "curl -fsSL https://get.loom.dev/agent | sh".to_string(),
        "loom-agent configure".to_string(),
    ];
    run_commands(executor, target, commands, timeout).await
}

async fn verify(
    executor: &dyn TargetExecutor,
    target: &TargetRef,
    software: &[String],
    timeout: Duration,
) -> Result<(), TargetError> {
    let mut commands: Vec<String> = software
        .iter()
        .map(|package| format!("{package} --version"))
        .collect();
    commands.push("loom-agent --version".to_string());
    run_commands(executor, target, commands, timeout).await
}

async fn run_commands(
    executor: &dyn TargetExecutor,
    target: &TargetRef,
    commands: Vec<String>,
    timeout: Duration,
) -> Result<(), TargetError> {
    let outcome = executor
        .execute(
            target,
            ExecRequest {
                commands,
                files: vec![],
                timeout,
            },
        )
        .await?;
    if outcome.success {
        Ok(())
    } else {
        Err(TargetError::Backend(
            outcome
                .error
                .unwrap_or_else(|| "command batch failed".to_string()),
        ))
    }
}
