//! Run Service
//!
//! Run lifecycle: a deploy request creates a `pending` run and returns it at
//! once; a background task prepares the run, guards the stack, executes the
//! engine and writes the single terminal status.

use std::sync::Arc;

use stackrun_core::domain::resource::CloudResource;
use stackrun_core::domain::run::{Run, RunOutput};
use stackrun_core::dto::run::{ListRunsQuery, RunPage};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::repository::{RunFilter, Stores};
use crate::service::error::{Result, ServiceError};
use crate::service::log::{RunLogWriter, TERMINAL_WRITE_ATTEMPTS, retry_write};
use crate::service::{executor, guard, preparer};

/// Largest page size a listing may request
pub const MAX_PAGE_SIZE: u32 = 100;

/// Create a run for a stored resource and start it in the background
///
/// Cancelling `cancel` kills the engine; the run then fails as interrupted.
pub async fn deploy(
    stores: &Stores,
    config: Arc<Config>,
    resource_id: Uuid,
    cancel: CancellationToken,
) -> Result<Run> {
    let resource = stores
        .resources
        .find_by_id(resource_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Cloud resource {} not found", resource_id)))?;

    let run = stores.runs.create(resource.id).await?;

    tracing::info!("Run created: {} for resource: {} ({})", run.id, resource.name, resource.kind);

    let stores = stores.clone();
    let run_id = run.id;
    tokio::spawn(async move {
        execute_run(&stores, &config, run_id, resource, cancel).await;
    });

    Ok(run)
}

/// Background body of a run
///
/// Every path ends in exactly one terminal write. Setup failures are written
/// before the engine is launched and leave no log records.
async fn execute_run(
    stores: &Stores,
    config: &Config,
    run_id: Uuid,
    resource: CloudResource,
    cancel: CancellationToken,
) {
    match stores.runs.mark_in_progress(run_id).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(run_id = %run_id, "Run is no longer pending, not starting it");
            return;
        }
        Err(e) => {
            tracing::error!(run_id = %run_id, "Failed to mark run in progress: {}", e);
            finish(stores, run_id, RunOutput::setup_failure(format!("failed to start run: {}", e))).await;
            return;
        }
    }

    let prepared = match preparer::prepare(config, stores, &resource).await {
        Ok(prepared) => prepared,
        Err(e) => {
            tracing::warn!(run_id = %run_id, "Run setup failed: {}", e);
            finish(stores, run_id, RunOutput::setup_failure(e.to_string())).await;
            return;
        }
    };

    if let Err(e) = guard::ensure_stack(config, &prepared).await {
        tracing::warn!(run_id = %run_id, "Stack setup failed: {}", e);
        let mut output = RunOutput::setup_failure(e.to_string());
        output.stack_fqdn = Some(prepared.stack_fqdn());
        finish(stores, run_id, output).await;
        return;
    }

    guard::run(config, &prepared, run_id).await;

    let writer = Arc::new(RunLogWriter::new(stores.logs.clone(), run_id));
    let output = executor::execute(config, &prepared, writer, cancel).await;

    finish(stores, run_id, output).await;

    // Workspace and manifest file are removed here
    drop(prepared);
}

/// Write the terminal status carried by `output`, retrying store failures
async fn finish(stores: &Stores, run_id: Uuid, output: RunOutput) {
    let status = output.status;
    let written = retry_write(run_id, "terminal status", TERMINAL_WRITE_ATTEMPTS, || {
        stores.runs.complete(run_id, status, &output)
    })
    .await;

    match written {
        Ok(true) => tracing::info!(run_id = %run_id, "Run finished: {}", status),
        Ok(false) => tracing::warn!(run_id = %run_id, "Run already finished, output discarded"),
        Err(e) => tracing::error!(run_id = %run_id, "Failed to record run result: {}", e),
    }
}

/// Get a run by ID
pub async fn get_run(stores: &Stores, id: Uuid) -> Result<Run> {
    let run = stores
        .runs
        .find_by_id(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Run {} not found", id)))?;

    Ok(run)
}

/// List runs newest first with optional filters
pub async fn list_runs(stores: &Stores, query: &ListRunsQuery) -> Result<RunPage> {
    let page_size = query.page_size();
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(ServiceError::InvalidArgument(format!(
            "page_size must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }

    let filter = RunFilter {
        resource_id: query.resource_id,
        status: query.status,
    };

    let total = stores.runs.count(&filter).await?;
    let offset = u64::from(query.page_num()) * u64::from(page_size);
    let runs = stores.runs.list(&filter, page_size, offset).await?;

    Ok(RunPage {
        runs,
        total_pages: total_pages(total, page_size),
    })
}

fn total_pages(total: u64, page_size: u32) -> u32 {
    total.div_ceil(u64::from(page_size)) as u32
}
