//! Log domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One persisted line of engine output
///
/// `sequence_num` is a single order across both output channels of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: Uuid,
    pub run_id: Uuid,
    pub content: String,
    pub stream_kind: StreamKind,
    pub sequence_num: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Output channel a line was captured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StreamKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(StreamKind::Stdout),
            "stderr" => Ok(StreamKind::Stderr),
            other => Err(format!("unknown stream kind '{}'", other)),
        }
    }
}
