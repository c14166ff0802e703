//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services orchestrate between repositories and contain domain logic.

pub mod credential;
pub mod error;
pub mod executor;
pub mod guard;
pub mod log;
pub mod preparer;
pub mod resource;
pub mod run;
pub mod stream;

#[cfg(test)]
mod testing;

// Re-export for convenience
pub use credential as credential_service;
pub use log as log_service;
pub use resource as resource_service;
pub use run as run_service;
pub use stream as stream_service;
