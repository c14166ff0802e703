//! Run DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::{Run, RunStatus};

/// Request to deploy a stored cloud resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    pub resource_id: Uuid,
}

/// Filters and pagination for listing runs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListRunsQuery {
    pub resource_id: Option<Uuid>,
    pub status: Option<RunStatus>,
    pub page_num: Option<u32>,
    pub page_size: Option<u32>,
}

impl ListRunsQuery {
    pub const DEFAULT_PAGE_SIZE: u32 = 20;

    pub fn page_num(&self) -> u32 {
        self.page_num.unwrap_or(0)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(Self::DEFAULT_PAGE_SIZE)
    }
}

/// One page of runs, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPage {
    pub runs: Vec<Run>,
    pub total_pages: u32,
}
