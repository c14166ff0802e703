//! Log Service
//!
//! Durable, sequence-numbered run output. Every line of a run gets the next
//! number from one counter shared by both output channels and is persisted
//! before the counter is released, so persistence order equals sequence order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use stackrun_core::domain::log::{LogRecord, StreamKind};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::repository::{LogRepository, Stores};
use crate::service::error::{Result, ServiceError};

/// Attempts made to persist one line before it is dropped
pub const WRITE_ATTEMPTS: u32 = 3;

/// Attempts made to record a run's terminal status
pub const TERMINAL_WRITE_ATTEMPTS: u32 = 6;

/// Delay before the first retry, doubled for each further one
const INITIAL_BACKOFF: Duration = Duration::from_millis(50);

/// Run a store write up to `attempts` times with doubling backoff
///
/// Returns the last error once every attempt has failed.
pub async fn retry_write<T, F, Fut>(
    run_id: Uuid,
    what: &str,
    attempts: u32,
    mut write: F,
) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt = 1;
    loop {
        match write().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                tracing::warn!(
                    run_id = %run_id,
                    attempt,
                    "Writing {} failed, retrying: {}",
                    what,
                    e
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// A line that could not be persisted; its number is not reused
#[derive(Debug, Error)]
#[error("failed to persist log line {sequence_num} after {attempts} attempts: {source}")]
pub struct AppendError {
    pub sequence_num: i64,
    pub attempts: u32,
    #[source]
    pub source: sqlx::Error,
}

/// Sequencer and writer for the output of one run
///
/// Owned by a single execution and shared between its channel readers.
pub struct RunLogWriter {
    logs: Arc<dyn LogRepository>,
    run_id: Uuid,
    next_seq: Mutex<i64>,
}

impl RunLogWriter {
    /// Writer for a fresh run, numbering from 0
    pub fn new(logs: Arc<dyn LogRepository>, run_id: Uuid) -> Self {
        Self {
            logs,
            run_id,
            next_seq: Mutex::new(0),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Assigns the next sequence number to `content` and persists it
    ///
    /// The counter advances even when every attempt fails, leaving a visible
    /// gap rather than renumbering later lines.
    pub async fn append(
        &self,
        content: &str,
        stream_kind: StreamKind,
    ) -> std::result::Result<i64, AppendError> {
        let mut next_seq = self.next_seq.lock().await;
        let sequence_num = *next_seq;
        *next_seq += 1;

        let record = LogRecord {
            id: Uuid::new_v4(),
            run_id: self.run_id,
            content: content.to_string(),
            stream_kind,
            sequence_num,
            created_at: chrono::Utc::now(),
        };

        retry_write(self.run_id, "log line", WRITE_ATTEMPTS, || {
            self.logs.insert(&record)
        })
        .await
        .map(|()| sequence_num)
        .map_err(|source| AppendError {
            sequence_num,
            attempts: WRITE_ATTEMPTS,
            source,
        })
    }

    /// Number of lines sequenced so far, persisted or not
    pub async fn sequenced(&self) -> i64 {
        *self.next_seq.lock().await
    }
}

/// Records of a run with `sequence_num > after_seq`, ascending; `-1` lists
/// from the beginning
pub async fn list_after(stores: &Stores, run_id: Uuid, after_seq: i64) -> Result<Vec<LogRecord>> {
    let records = stores.logs.list_after(run_id, after_seq).await?;
    Ok(records)
}

/// Deletes the whole log of an existing run
pub async fn delete_all(stores: &Stores, run_id: Uuid) -> Result<u64> {
    stores
        .runs
        .find_by_id(run_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Run {} not found", run_id)))?;

    let deleted = stores.logs.delete_by_run(run_id).await?;

    tracing::info!("Deleted {} log records for run: {}", deleted, run_id);

    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryLogRepository;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` inserts, then delegates
    struct FlakyLogRepository {
        inner: MemoryLogRepository,
        failures: AtomicU32,
    }

    impl FlakyLogRepository {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryLogRepository::new(),
                failures: AtomicU32::new(failures),
            }
        }
    }

    #[async_trait]
    impl LogRepository for FlakyLogRepository {
        async fn insert(&self, record: &LogRecord) -> std::result::Result<(), sqlx::Error> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(sqlx::Error::PoolTimedOut);
            }
            self.inner.insert(record).await
        }

        async fn list_after(
            &self,
            run_id: Uuid,
            after_seq: i64,
        ) -> std::result::Result<Vec<LogRecord>, sqlx::Error> {
            self.inner.list_after(run_id, after_seq).await
        }

        async fn delete_by_run(&self, run_id: Uuid) -> std::result::Result<u64, sqlx::Error> {
            self.inner.delete_by_run(run_id).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_gap_free() {
        let logs = Arc::new(MemoryLogRepository::new());
        let run_id = Uuid::new_v4();
        let writer = Arc::new(RunLogWriter::new(logs.clone(), run_id));

        let mut handles = Vec::new();
        for kind in [StreamKind::Stdout, StreamKind::Stderr] {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                let mut seqs = Vec::new();
                for i in 0..50 {
                    seqs.push(writer.append(&format!("{} {}", kind, i), kind).await.unwrap());
                }
                seqs
            }));
        }

        for handle in handles {
            let seqs = handle.await.unwrap();
            assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        }

        let records = logs.list_after(run_id, -1).await.unwrap();
        let seqs: Vec<i64> = records.iter().map(|r| r.sequence_num).collect();
        assert_eq!(seqs, (0..100).collect::<Vec<i64>>());
        assert_eq!(writer.sequenced().await, 100);
    }

    #[tokio::test]
    async fn test_append_retries_transient_failures() {
        let logs = Arc::new(FlakyLogRepository::new(2));
        let run_id = Uuid::new_v4();
        let writer = RunLogWriter::new(logs.clone(), run_id);

        assert_eq!(writer.append("hello", StreamKind::Stdout).await.unwrap(), 0);

        let records = logs.list_after(run_id, -1).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, "hello");
    }

    #[tokio::test]
    async fn test_dropped_line_leaves_gap() {
        let logs = Arc::new(FlakyLogRepository::new(WRITE_ATTEMPTS));
        let run_id = Uuid::new_v4();
        let writer = RunLogWriter::new(logs.clone(), run_id);

        let err = writer.append("lost", StreamKind::Stderr).await.unwrap_err();
        assert_eq!(err.sequence_num, 0);
        assert_eq!(err.attempts, WRITE_ATTEMPTS);

        assert_eq!(writer.append("kept", StreamKind::Stdout).await.unwrap(), 1);

        let records = logs.list_after(run_id, -1).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sequence_num, 1);
    }

    #[tokio::test]
    async fn test_delete_all_requires_run() {
        let stores = Stores::in_memory();
        let result = delete_all(&stores, Uuid::new_v4()).await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));

        let run = stores.runs.create(Uuid::new_v4()).await.unwrap();
        let writer = RunLogWriter::new(stores.logs.clone(), run.id);
        writer.append("a", StreamKind::Stdout).await.unwrap();
        writer.append("b", StreamKind::Stderr).await.unwrap();

        assert_eq!(delete_all(&stores, run.id).await.unwrap(), 2);
        assert!(list_after(&stores, run.id, -1).await.unwrap().is_empty());
    }
}
