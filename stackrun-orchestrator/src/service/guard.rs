//! Lock & Reconciliation Guard
//!
//! Engine calls made against a stack before the apply. Stack initialization
//! is required and fails the run; lock release and state refresh are
//! advisory and only ever logged.

use std::process::Output;
use std::time::Duration;

use uuid::Uuid;

use crate::config::Config;
use crate::service::error::{Result, ServiceError};
use crate::service::preparer::PreparedRun;

/// Limit for the quick stack housekeeping calls
const HOUSEKEEPING_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of a best-effort step
///
/// Never converted into a run failure; callers log it and move on.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "advisory results should be logged"]
pub enum Advisory {
    Completed { step: &'static str },
    Failed { step: &'static str, reason: String },
}

impl Advisory {
    /// Record the outcome in the process log
    pub fn log(&self, run_id: Uuid) {
        match self {
            Advisory::Completed { step } => {
                tracing::info!(run_id = %run_id, "{} completed", step);
            }
            Advisory::Failed { step, reason } => {
                tracing::warn!(run_id = %run_id, "{} failed (continuing): {}", step, reason);
            }
        }
    }
}

/// Make sure the run's stack exists: select it, or create it when missing
pub async fn ensure_stack(config: &Config, prepared: &PreparedRun) -> Result<()> {
    let fqdn = prepared.stack_fqdn();

    let select = run_engine(
        config,
        prepared,
        &["stack", "select", &fqdn],
        HOUSEKEEPING_TIMEOUT,
    )
    .await
    .map_err(ServiceError::Internal)?;
    if select.status.success() {
        tracing::debug!("Selected existing stack {}", fqdn);
        return Ok(());
    }

    let init = run_engine(
        config,
        prepared,
        &["stack", "init", &fqdn],
        HOUSEKEEPING_TIMEOUT,
    )
    .await
    .map_err(ServiceError::Internal)?;
    if init.status.success() {
        tracing::info!("Initialized stack {}", fqdn);
        return Ok(());
    }

    let text = combined_output(&init);
    if text.contains("already exists") {
        return Ok(());
    }

    Err(ServiceError::Internal(format!(
        "failed to initialize stack {}: {}",
        fqdn,
        text.trim()
    )))
}

/// Release a lock left behind by an interrupted run
///
/// An absent lock is the normal case and shows up here as a failure.
pub async fn cancel_stale_lock(config: &Config, prepared: &PreparedRun) -> Advisory {
    let fqdn = prepared.stack_fqdn();
    advise(
        "stale lock release",
        run_engine(
            config,
            prepared,
            &["cancel", "--stack", &fqdn, "--yes"],
            HOUSEKEEPING_TIMEOUT,
        )
        .await,
    )
}

/// Reconcile the engine's recorded state with the real resources
pub async fn refresh(config: &Config, prepared: &PreparedRun) -> Advisory {
    let fqdn = prepared.stack_fqdn();
    advise(
        "state refresh",
        run_engine(
            config,
            prepared,
            &["refresh", "--stack", &fqdn, "--yes", "--skip-preview"],
            config.refresh_timeout,
        )
        .await,
    )
}

/// Run both advisory steps in order, logging each
pub async fn run(config: &Config, prepared: &PreparedRun, run_id: Uuid) {
    cancel_stale_lock(config, prepared).await.log(run_id);
    refresh(config, prepared).await.log(run_id);
}

fn advise(step: &'static str, result: std::result::Result<Output, String>) -> Advisory {
    match result {
        Ok(output) if output.status.success() => Advisory::Completed { step },
        Ok(output) => Advisory::Failed {
            step,
            reason: format!(
                "exit code {}: {}",
                output.status.code().unwrap_or(-1),
                combined_output(&output).trim()
            ),
        },
        Err(reason) => Advisory::Failed { step, reason },
    }
}

/// Run a short engine command to completion, killing it at `limit`
async fn run_engine(
    config: &Config,
    prepared: &PreparedRun,
    args: &[&str],
    limit: Duration,
) -> std::result::Result<Output, String> {
    let mut cmd = prepared.command(&config.engine_binary, args);
    cmd.stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    let child = cmd
        .spawn()
        .map_err(|e| format!("failed to start {}: {}", config.engine_binary, e))?;

    match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(format!("{} {} failed: {}", config.engine_binary, args.join(" "), e)),
        // The child is killed when its future is dropped
        Err(_) => Err(format!(
            "{} {} timed out after {}s",
            config.engine_binary,
            args.join(" "),
            limit.as_secs()
        )),
    }
}

fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stderr).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stdout));
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn exit_output(code: i32, stderr: &str) -> Output {
        use std::os::unix::process::ExitStatusExt;
        Output {
            status: std::process::ExitStatus::from_raw(code << 8),
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_advise_classifies_outcomes() {
        assert_eq!(
            advise("step", Ok(exit_output(0, ""))),
            Advisory::Completed { step: "step" }
        );

        let failed = advise("step", Ok(exit_output(255, "no lock held\n")));
        assert_eq!(
            failed,
            Advisory::Failed {
                step: "step",
                reason: "exit code 255: no lock held".to_string()
            }
        );

        let failed = advise("step", Err("spawn failed".to_string()));
        assert!(matches!(failed, Advisory::Failed { ref reason, .. } if reason == "spawn failed"));
    }
}
