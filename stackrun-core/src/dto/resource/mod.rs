//! Cloud resource DTOs

use serde::{Deserialize, Serialize};

/// Request to store a manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateResource {
    pub manifest: String,
}
