//! In-memory repositories
//!
//! Process-local implementations of every repository trait, used when the
//! orchestrator runs with `STACKRUN_STORAGE=memory` and by the service tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use stackrun_core::domain::credential::{Credential, Provider};
use stackrun_core::domain::log::LogRecord;
use stackrun_core::domain::resource::CloudResource;
use stackrun_core::domain::run::{Run, RunOutput, RunStatus};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::credential::CredentialRepository;
use super::log::LogRepository;
use super::resource::ResourceRepository;
use super::run::{RunFilter, RunRepository};

// =============================================================================
// Runs
// =============================================================================

#[derive(Default)]
pub struct MemoryRunRepository {
    runs: RwLock<HashMap<Uuid, Run>>,
}

impl MemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn matching(&self, filter: &RunFilter) -> Vec<Run> {
        let runs = self.runs.read().await;
        let mut matching: Vec<Run> = runs.values().filter(|r| filter.matches(r)).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching
    }
}

#[async_trait]
impl RunRepository for MemoryRunRepository {
    async fn create(&self, resource_id: Uuid) -> Result<Run, sqlx::Error> {
        let now = chrono::Utc::now();
        let run = Run {
            id: Uuid::new_v4(),
            resource_id,
            status: RunStatus::Pending,
            output: None,
            created_at: now,
            updated_at: now,
        };

        self.runs.write().await.insert(run.id, run.clone());
        Ok(run)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Run>, sqlx::Error> {
        Ok(self.runs.read().await.get(&id).cloned())
    }

    async fn list(
        &self,
        filter: &RunFilter,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<Run>, sqlx::Error> {
        Ok(self
            .matching(filter)
            .await
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn count(&self, filter: &RunFilter) -> Result<u64, sqlx::Error> {
        Ok(self.matching(filter).await.len() as u64)
    }

    async fn mark_in_progress(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let mut runs = self.runs.write().await;
        match runs.get_mut(&id) {
            Some(run) if run.status == RunStatus::Pending => {
                run.status = RunStatus::InProgress;
                run.updated_at = chrono::Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete(
        &self,
        id: Uuid,
        status: RunStatus,
        output: &RunOutput,
    ) -> Result<bool, sqlx::Error> {
        let mut runs = self.runs.write().await;
        match runs.get_mut(&id) {
            Some(run) if !run.status.is_terminal() => {
                run.status = status;
                run.output = Some(output.clone());
                run.updated_at = chrono::Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// =============================================================================
// Logs
// =============================================================================

#[derive(Default)]
pub struct MemoryLogRepository {
    logs: RwLock<HashMap<Uuid, BTreeMap<i64, LogRecord>>>,
}

impl MemoryLogRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogRepository for MemoryLogRepository {
    async fn insert(&self, record: &LogRecord) -> Result<(), sqlx::Error> {
        self.logs
            .write()
            .await
            .entry(record.run_id)
            .or_default()
            .entry(record.sequence_num)
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn list_after(
        &self,
        run_id: Uuid,
        after_seq: i64,
    ) -> Result<Vec<LogRecord>, sqlx::Error> {
        let logs = self.logs.read().await;
        Ok(logs
            .get(&run_id)
            .map(|records| {
                records
                    .range(after_seq.saturating_add(1)..)
                    .map(|(_, r)| r.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_by_run(&self, run_id: Uuid) -> Result<u64, sqlx::Error> {
        let removed = self.logs.write().await.remove(&run_id);
        Ok(removed.map(|records| records.len() as u64).unwrap_or(0))
    }
}

// =============================================================================
// Resources
// =============================================================================

#[derive(Default)]
pub struct MemoryResourceRepository {
    resources: RwLock<HashMap<Uuid, CloudResource>>,
}

impl MemoryResourceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResourceRepository for MemoryResourceRepository {
    async fn create(&self, resource: &CloudResource) -> Result<(), sqlx::Error> {
        self.resources
            .write()
            .await
            .insert(resource.id, resource.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CloudResource>, sqlx::Error> {
        Ok(self.resources.read().await.get(&id).cloned())
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// Kept in insertion order so "first" means oldest, as in PostgreSQL
#[derive(Default)]
pub struct MemoryCredentialRepository {
    credentials: RwLock<Vec<Credential>>,
}

impl MemoryCredentialRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialRepository for MemoryCredentialRepository {
    async fn create(&self, credential: &Credential) -> Result<(), sqlx::Error> {
        self.credentials.write().await.push(credential.clone());
        Ok(())
    }

    async fn first_for_provider(
        &self,
        provider: Provider,
    ) -> Result<Option<Credential>, sqlx::Error> {
        let credentials = self.credentials.read().await;
        Ok(credentials
            .iter()
            .find(|c| c.provider() == provider)
            .cloned())
    }

    async fn list(&self, provider: Option<Provider>) -> Result<Vec<Credential>, sqlx::Error> {
        let credentials = self.credentials.read().await;
        Ok(credentials
            .iter()
            .filter(|c| provider.is_none_or(|p| c.provider() == p))
            .cloned()
            .collect())
    }
}
