//! Cloud resource domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored manifest describing one cloud resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudResource {
    pub id: Uuid,
    pub name: String,
    pub kind: String,
    /// Raw YAML manifest as submitted
    pub manifest: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}
