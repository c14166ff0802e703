//! Data Transfer Objects
//!
//! Request and response shapes exchanged between the orchestrator API and its
//! consumers (client library, CLI).

pub mod credential;
pub mod log;
pub mod resource;
pub mod run;
