//! Stackrun Core
//!
//! Core types shared by the Stackrun orchestrator, client and CLI.
//!
//! This crate contains:
//! - Domain types: Runs, log records, cloud resources, manifests, credentials
//! - DTOs: Request/response shapes for the orchestrator API

pub mod domain;
pub mod dto;
