//! Log streaming DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::log::{LogRecord, StreamKind};

/// Query accepted by the run output stream
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamQuery {
    /// Last sequence number the caller already holds; omitted means replay
    /// from the first record
    pub last_sequence_num: Option<i64>,
}

/// One event on the run output stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFrame {
    pub sequence_num: i64,
    pub content: String,
    pub stream_kind: StreamKind,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub status: FrameStatus,
}

/// Whether a frame carries output or closes the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameStatus {
    Streaming,
    Completed,
    Cancelled,
}

impl StreamFrame {
    pub fn is_final(&self) -> bool {
        self.status != FrameStatus::Streaming
    }

    /// Synthetic closing frame carrying the last delivered sequence number
    pub fn closing(status: FrameStatus, sequence_num: i64, content: impl Into<String>) -> Self {
        Self {
            sequence_num,
            content: content.into(),
            stream_kind: StreamKind::Stdout,
            timestamp: chrono::Utc::now(),
            status,
        }
    }
}

impl From<LogRecord> for StreamFrame {
    fn from(record: LogRecord) -> Self {
        Self {
            sequence_num: record.sequence_num,
            content: record.content,
            stream_kind: record.stream_kind,
            timestamp: record.created_at,
            status: FrameStatus::Streaming,
        }
    }
}

/// Result of deleting a run's log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedLogs {
    pub run_id: Uuid,
    pub deleted: u64,
}
