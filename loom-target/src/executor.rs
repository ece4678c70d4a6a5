//! Command execution against a compute target
//!
//! The executor applies file payloads before running commands, enforces the
//! request timeout, and reports partial output on timeout rather than
//! nothing. Command failures are outcomes, not errors: `TargetError` is
//! reserved for transport-level problems.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use loom_core::domain::task::FilePatch;

use crate::error::{Result, TargetError};

/// Address of a provisioned compute target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetRef {
    pub instance_id: Uuid,
    pub address: String,
    pub port: u16,
}

/// A command/file payload to dispatch to a target
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub commands: Vec<String>,
    pub files: Vec<FilePatch>,
    pub timeout: Duration,
}

/// Result of dispatching an [`ExecRequest`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecOutcome {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub duration: Duration,
    pub artifacts: Vec<String>,
}

/// Dispatches command/file payloads to a compute target
#[async_trait]
pub trait TargetExecutor: Send + Sync {
    /// Applies `req.files` to the target, then runs `req.commands` in order.
    ///
    /// Must enforce `req.timeout`; a timed-out request yields an unsuccessful
    /// outcome carrying whatever output was produced before the deadline.
    async fn execute(&self, target: &TargetRef, req: ExecRequest) -> Result<ExecOutcome>;
}

/// In-memory executor that fabricates plausible output with configurable
/// latency and injectable failures.
///
/// Commands containing a `failing` substring produce an unsuccessful outcome;
/// commands containing a `hanging` substring sleep past the request deadline
/// to exercise the timeout path.
pub struct SimulatedExecutor {
    latency: Duration,
    failing: Vec<String>,
    hanging: Vec<String>,
    executed: Mutex<Vec<String>>,
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self {
            latency: Duration::from_millis(5),
            failing: Vec::new(),
            hanging: Vec::new(),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Commands containing any of these substrings fail
    pub fn failing_commands(mut self, patterns: Vec<String>) -> Self {
        self.failing = patterns;
        self
    }

    /// Commands containing any of these substrings sleep past the deadline
    pub fn hanging_commands(mut self, patterns: Vec<String>) -> Self {
        self.hanging = patterns;
        self
    }

    /// Every command dispatched so far, in execution order
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    fn canned_response(command: &str) -> &'static str {
        let command = command.to_lowercase();
        if command.contains("test") {
            "all checks passed"
        } else if command.contains("install") {
            "installed successfully"
        } else if command.contains("deploy") {
            "deployment complete"
        } else if command.contains("--version") {
            "version 1.0.0"
        } else {
            "ok"
        }
    }

    async fn run(
        &self,
        req: &ExecRequest,
        transcript: Arc<Mutex<String>>,
    ) -> std::result::Result<(), String> {
        // Files are applied before any command runs
        for file in &req.files {
            tokio::time::sleep(self.latency).await;
            let mut out = transcript.lock().unwrap();
            out.push_str(&format!("wrote {} ({} bytes)\n", file.path, file.contents.len()));
        }

        for command in &req.commands {
            self.executed.lock().unwrap().push(command.clone());
            transcript.lock().unwrap().push_str(&format!("$ {command}\n"));

            if self.hanging.iter().any(|p| command.contains(p.as_str())) {
                tokio::time::sleep(req.timeout + Duration::from_millis(250)).await;
            } else {
                tokio::time::sleep(self.latency).await;
            }

            if self.failing.iter().any(|p| command.contains(p.as_str())) {
                let message = format!("command failed: {command}");
                transcript.lock().unwrap().push_str(&format!("{message}\n"));
                return Err(message);
            }

            transcript
                .lock()
                .unwrap()
                .push_str(&format!("{}\n", Self::canned_response(command)));
        }

        Ok(())
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TargetExecutor for SimulatedExecutor {
    async fn execute(&self, target: &TargetRef, req: ExecRequest) -> Result<ExecOutcome> {
        debug!(
            "dispatching {} command(s), {} file(s) to {}:{}",
            req.commands.len(),
            req.files.len(),
            target.address,
            target.port
        );

        let started = Instant::now();
        let transcript = Arc::new(Mutex::new(String::new()));
        let artifacts: Vec<String> = req.files.iter().map(|f| f.path.clone()).collect();

        let outcome = match tokio::time::timeout(req.timeout, self.run(&req, transcript.clone()))
            .await
        {
            Ok(Ok(())) => ExecOutcome {
                success: true,
                output: transcript.lock().unwrap().clone(),
                error: None,
                duration: started.elapsed(),
                artifacts,
            },
            Ok(Err(message)) => ExecOutcome {
                success: false,
                output: transcript.lock().unwrap().clone(),
                error: Some(message),
                duration: started.elapsed(),
                artifacts: Vec::new(),
            },
            // Partial output is preserved: the transcript buffer outlives the
            // cancelled future.
            Err(_) => ExecOutcome {
                success: false,
                output: transcript.lock().unwrap().clone(),
                error: Some(
                    TargetError::Timeout {
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    }
                    .to_string(),
                ),
                duration: started.elapsed(),
                artifacts: Vec::new(),
            },
        };

        Ok(outcome)
    }
}
