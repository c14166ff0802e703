//! Streaming Gate
//!
//! Tails the persisted log of one run for one subscriber. Records after the
//! subscriber's cursor are replayed, then the store is polled until the run
//! is terminal and nothing is left to send, at which point a `completed`
//! frame closes the stream. Subscribers only read; each owns its cursor.

use std::time::Duration;

use stackrun_core::dto::log::{FrameStatus, StreamFrame};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use crate::repository::Stores;
use crate::service::error::{Result, ServiceError};
use crate::service::log_service;

/// Frames buffered between the gate task and a slow consumer
const FRAME_BUFFER: usize = 64;

/// Cursor value meaning "nothing received yet"
pub const FROM_START: i64 = -1;

/// Receiving end of one subscriber's stream
///
/// Dropping it stops the gate task.
pub struct Subscription {
    rx: mpsc::Receiver<StreamFrame>,
    _stop: DropGuard,
}

impl Subscription {
    /// Next frame, or `None` once the stream has closed
    pub async fn next(&mut self) -> Option<StreamFrame> {
        self.rx.recv().await
    }
}

/// Open a stream for an existing run
///
/// `last_sequence_num` is the last record the caller already holds; `None`
/// replays from the first record. Cancelling `cancel` closes the stream with
/// a `cancelled` frame.
pub async fn subscribe(
    stores: &Stores,
    run_id: Uuid,
    last_sequence_num: Option<i64>,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> Result<Subscription> {
    stores
        .runs
        .find_by_id(run_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Run {} not found", run_id)))?;

    let cursor = last_sequence_num.unwrap_or(FROM_START).max(FROM_START);
    let (tx, rx) = mpsc::channel(FRAME_BUFFER);

    let gate = Gate {
        stores: stores.clone(),
        run_id,
        cursor,
        poll_interval,
        tx,
        cancel: cancel.clone(),
    };

    tokio::spawn(async move {
        let run_id = gate.run_id;
        if let Err(e) = gate.run().await {
            tracing::error!(run_id = %run_id, "Log stream aborted: {}", e);
        }
    });

    Ok(Subscription {
        rx,
        _stop: cancel.drop_guard(),
    })
}

/// Whether the gate should keep going after a send
enum Flow {
    Continue,
    Stop,
}

struct Gate {
    stores: Stores,
    run_id: Uuid,
    cursor: i64,
    poll_interval: Duration,
    tx: mpsc::Sender<StreamFrame>,
    cancel: CancellationToken,
}

impl Gate {
    async fn run(mut self) -> Result<()> {
        tracing::debug!(run_id = %self.run_id, cursor = self.cursor, "Log stream opened");

        // Replay
        if let Flow::Stop = self.send_after_cursor().await? {
            return Ok(());
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    self.close(FrameStatus::Cancelled, "Stream cancelled by client");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            // Status is read before the records so that anything written
            // before the terminal transition is picked up below
            let terminal = match self.stores.runs.find_by_id(self.run_id).await? {
                Some(run) => run.status.is_terminal(),
                None => true,
            };

            if let Flow::Stop = self.send_after_cursor().await? {
                return Ok(());
            }

            if terminal {
                let remaining =
                    log_service::list_after(&self.stores, self.run_id, self.cursor).await?;
                if remaining.is_empty() {
                    self.complete().await;
                    return Ok(());
                }
            }
        }
    }

    /// Send every record past the cursor, advancing it per record
    async fn send_after_cursor(&mut self) -> Result<Flow> {
        let records = log_service::list_after(&self.stores, self.run_id, self.cursor).await?;

        for record in records {
            // Never go backwards, even if a store returns something stale
            if record.sequence_num <= self.cursor {
                continue;
            }
            let sequence_num = record.sequence_num;

            tokio::select! {
                () = self.cancel.cancelled() => {
                    self.close(FrameStatus::Cancelled, "Stream cancelled by client");
                    return Ok(Flow::Stop);
                }
                sent = self.tx.send(StreamFrame::from(record)) => {
                    if sent.is_err() {
                        tracing::debug!(run_id = %self.run_id, "Log stream consumer went away");
                        return Ok(Flow::Stop);
                    }
                }
            }

            self.cursor = sequence_num;
        }

        Ok(Flow::Continue)
    }

    /// Deliver the `completed` frame, waiting for room in the channel
    async fn complete(&self) {
        let frame = StreamFrame::closing(FrameStatus::Completed, self.cursor, "Stream completed");

        tokio::select! {
            () = self.cancel.cancelled() => {
                self.close(FrameStatus::Cancelled, "Stream cancelled by client");
            }
            sent = self.tx.send(frame) => {
                if sent.is_ok() {
                    tracing::debug!(run_id = %self.run_id, cursor = self.cursor, "Log stream completed");
                }
            }
        }
    }

    /// Best-effort closing frame; a full or closed channel drops it
    fn close(&self, status: FrameStatus, content: &str) {
        let _ = self
            .tx
            .try_send(StreamFrame::closing(status, self.cursor, content));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackrun_core::domain::log::StreamKind;
    use stackrun_core::domain::run::{RunOutput, RunStatus};
    use std::sync::Arc;

    use crate::service::log::RunLogWriter;

    const POLL: Duration = Duration::from_millis(10);

    async fn collect(mut subscription: Subscription) -> Vec<StreamFrame> {
        let mut frames = Vec::new();
        while let Some(frame) =
            tokio::time::timeout(Duration::from_secs(5), subscription.next())
                .await
                .expect("stream stalled")
        {
            let last = frame.is_final();
            frames.push(frame);
            if last {
                break;
            }
        }
        frames
    }

    fn sequence(frames: &[StreamFrame]) -> Vec<i64> {
        frames
            .iter()
            .filter(|f| f.status == FrameStatus::Streaming)
            .map(|f| f.sequence_num)
            .collect()
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let stores = Stores::in_memory();
        let result = subscribe(&stores, Uuid::new_v4(), None, POLL, CancellationToken::new()).await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_replays_finished_run_then_completes() {
        let stores = Stores::in_memory();
        let run = stores.runs.create(Uuid::new_v4()).await.unwrap();
        let writer = RunLogWriter::new(stores.logs.clone(), run.id);
        for i in 0..5 {
            writer.append(&format!("line {}", i), StreamKind::Stdout).await.unwrap();
        }
        stores
            .runs
            .complete(run.id, RunStatus::Success, &RunOutput::setup_failure("x"))
            .await
            .unwrap();

        let frames = collect(subscribe(&stores, run.id, None, POLL, CancellationToken::new()).await.unwrap()).await;
        assert_eq!(sequence(&frames), vec![0, 1, 2, 3, 4]);

        let last = frames.last().unwrap();
        assert_eq!(last.status, FrameStatus::Completed);
        assert_eq!(last.sequence_num, 4);
    }

    #[tokio::test]
    async fn test_resume_skips_received_records() {
        let stores = Stores::in_memory();
        let run = stores.runs.create(Uuid::new_v4()).await.unwrap();
        let writer = RunLogWriter::new(stores.logs.clone(), run.id);
        for i in 0..6 {
            writer.append(&format!("line {}", i), StreamKind::Stderr).await.unwrap();
        }
        stores
            .runs
            .complete(run.id, RunStatus::Failed, &RunOutput::setup_failure("x"))
            .await
            .unwrap();

        let frames = collect(subscribe(&stores, run.id, Some(2), POLL, CancellationToken::new()).await.unwrap()).await;
        assert_eq!(sequence(&frames), vec![3, 4, 5]);

        // Explicit zero is a real cursor, not "from the start"
        let frames = collect(subscribe(&stores, run.id, Some(0), POLL, CancellationToken::new()).await.unwrap()).await;
        assert_eq!(sequence(&frames), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_live_subscribers_see_same_suffix() {
        let stores = Stores::in_memory();
        let run = stores.runs.create(Uuid::new_v4()).await.unwrap();
        stores.runs.mark_in_progress(run.id).await.unwrap();
        let writer = Arc::new(RunLogWriter::new(stores.logs.clone(), run.id));

        for i in 0..4 {
            writer.append(&format!("early {}", i), StreamKind::Stdout).await.unwrap();
        }

        let first = subscribe(&stores, run.id, None, POLL, CancellationToken::new()).await.unwrap();
        let second = subscribe(&stores, run.id, Some(3), POLL, CancellationToken::new()).await.unwrap();
        let first = tokio::spawn(collect(first));
        let second = tokio::spawn(collect(second));

        for i in 0..6 {
            let kind = if i % 2 == 0 { StreamKind::Stdout } else { StreamKind::Stderr };
            writer.append(&format!("late {}", i), kind).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        stores
            .runs
            .complete(run.id, RunStatus::Success, &RunOutput::setup_failure("x"))
            .await
            .unwrap();

        let first = first.await.unwrap();
        let second = second.await.unwrap();

        assert_eq!(sequence(&first), (0..10).collect::<Vec<i64>>());
        assert_eq!(sequence(&second), (4..10).collect::<Vec<i64>>());
        assert_eq!(first.last().unwrap().status, FrameStatus::Completed);
        assert_eq!(second.last().unwrap().status, FrameStatus::Completed);
    }

    #[tokio::test]
    async fn test_completed_frame_waits_for_slow_consumer() {
        let stores = Stores::in_memory();
        let run = stores.runs.create(Uuid::new_v4()).await.unwrap();
        let writer = RunLogWriter::new(stores.logs.clone(), run.id);
        for i in 0..FRAME_BUFFER {
            writer.append(&format!("line {}", i), StreamKind::Stdout).await.unwrap();
        }
        stores
            .runs
            .complete(run.id, RunStatus::Success, &RunOutput::setup_failure("x"))
            .await
            .unwrap();

        let subscription = subscribe(&stores, run.id, None, POLL, CancellationToken::new())
            .await
            .unwrap();

        // Channel is full when the gate sees the terminal state
        tokio::time::sleep(Duration::from_millis(300)).await;

        let frames = collect(subscription).await;
        assert_eq!(sequence(&frames).len(), FRAME_BUFFER);
        let last = frames.last().unwrap();
        assert_eq!(last.status, FrameStatus::Completed);
        assert_eq!(last.sequence_num, FRAME_BUFFER as i64 - 1);
    }

    #[tokio::test]
    async fn test_cancel_emits_cancelled_frame() {
        let stores = Stores::in_memory();
        let run = stores.runs.create(Uuid::new_v4()).await.unwrap();
        let writer = RunLogWriter::new(stores.logs.clone(), run.id);
        writer.append("only", StreamKind::Stdout).await.unwrap();

        let cancel = CancellationToken::new();
        let mut subscription = subscribe(&stores, run.id, None, POLL, cancel.clone()).await.unwrap();

        let frame = subscription.next().await.unwrap();
        assert_eq!(frame.content, "only");

        cancel.cancel();
        let frame = tokio::time::timeout(Duration::from_secs(5), subscription.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.status, FrameStatus::Cancelled);
        assert_eq!(frame.sequence_num, 0);
        assert!(subscription.next().await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_streams_live_engine_run() {
        use crate::service::run;
        use crate::service::testing::{MANIFEST, harness, store_resource};

        let h = harness(
            "    for i in 1 2 3 4 5 6; do\n      echo \"step $i\"\n      sleep 0.05\n    done\n    \
             echo done >&2\n    exit 0",
        )
        .await;
        let resource = store_resource(&h.stores, MANIFEST).await;
        let config = Arc::new(h.config.clone());

        let run = run::deploy(&h.stores, config, resource.id, CancellationToken::new())
            .await
            .unwrap();

        let early = subscribe(&h.stores, run.id, None, POLL, CancellationToken::new())
            .await
            .unwrap();
        let early = tokio::spawn(collect(early));

        // Attach the second subscriber once a few lines exist
        for _ in 0..500 {
            if !h.stores.logs.list_after(run.id, 2).await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let late = subscribe(&h.stores, run.id, Some(3), POLL, CancellationToken::new())
            .await
            .unwrap();
        let late = collect(late).await;
        let early = early.await.unwrap();

        assert_eq!(sequence(&early), (0..7).collect::<Vec<i64>>());
        assert_eq!(sequence(&late), (4..7).collect::<Vec<i64>>());
        assert_eq!(early.last().unwrap().status, FrameStatus::Completed);
        assert_eq!(late.last().unwrap().status, FrameStatus::Completed);
    }
}
