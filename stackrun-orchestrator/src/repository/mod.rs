//! Repository Module
//!
//! Data access layer for the orchestrator.
//! Each repository handles storage for a specific domain entity and comes in
//! a PostgreSQL and an in-memory flavour behind one trait.

mod credential;
mod log;
mod memory;
mod resource;
mod run;

use std::sync::Arc;

use sqlx::PgPool;

// Re-export traits
pub use credential::CredentialRepository;
pub use log::LogRepository;
pub use resource::ResourceRepository;
pub use run::{RunFilter, RunRepository};

// Re-export implementations
pub use credential::PgCredentialRepository;
pub use log::PgLogRepository;
pub use memory::{
    MemoryCredentialRepository, MemoryLogRepository, MemoryResourceRepository,
    MemoryRunRepository,
};
pub use resource::PgResourceRepository;
pub use run::PgRunRepository;

/// Handles to every repository, shared by the API handlers and background
/// run tasks
#[derive(Clone)]
pub struct Stores {
    pub runs: Arc<dyn RunRepository>,
    pub logs: Arc<dyn LogRepository>,
    pub resources: Arc<dyn ResourceRepository>,
    pub credentials: Arc<dyn CredentialRepository>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            runs: Arc::new(PgRunRepository::new(pool.clone())),
            logs: Arc::new(PgLogRepository::new(pool.clone())),
            resources: Arc::new(PgResourceRepository::new(pool.clone())),
            credentials: Arc::new(PgCredentialRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            runs: Arc::new(MemoryRunRepository::new()),
            logs: Arc::new(MemoryLogRepository::new()),
            resources: Arc::new(MemoryResourceRepository::new()),
            credentials: Arc::new(MemoryCredentialRepository::new()),
        }
    }
}
