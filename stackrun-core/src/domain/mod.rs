//! Core domain types
//!
//! These structures are persisted by the orchestrator and read back by the
//! client and CLI. Execution and persistence logic lives in the orchestrator.

pub mod credential;
pub mod log;
pub mod manifest;
pub mod resource;
pub mod run;
