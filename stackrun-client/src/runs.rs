//! Run endpoints and output following

use std::collections::VecDeque;
use std::time::Duration;

use crate::OrchestratorClient;
use crate::error::{ClientError, Result};
use crate::sse::SseDecoder;
use stackrun_core::domain::run::Run;
use stackrun_core::dto::log::{DeletedLogs, StreamFrame};
use stackrun_core::dto::run::{DeployRequest, ListRunsQuery, RunPage};
use uuid::Uuid;

/// Consecutive failed reconnects before a follow gives up
const MAX_RECONNECTS: u32 = 5;

/// Base delay between reconnects, multiplied by the attempt number
const RECONNECT_DELAY: Duration = Duration::from_millis(500);

impl OrchestratorClient {
    // =============================================================================
    // Run Lifecycle
    // =============================================================================

    /// Deploy a stored resource
    ///
    /// Returns as soon as the run exists; the deployment itself continues on
    /// the orchestrator. Use [`OrchestratorClient::follow_run`] to watch it.
    pub async fn deploy(&self, resource_id: Uuid) -> Result<Run> {
        let response = self
            .client
            .post(self.url("/runs/deploy"))
            .json(&DeployRequest { resource_id })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Get a run by ID
    pub async fn get_run(&self, run_id: Uuid) -> Result<Run> {
        let url = self.url(&format!("/runs/{}", run_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// List runs newest first
    pub async fn list_runs(&self, query: &ListRunsQuery) -> Result<RunPage> {
        let response = self
            .client
            .get(self.url("/runs"))
            .query(query)
            .send()
            .await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Run Output
    // =============================================================================

    /// Delete every persisted output line of a run
    pub async fn delete_run_logs(&self, run_id: Uuid) -> Result<DeletedLogs> {
        let url = self.url(&format!("/runs/{}/logs", run_id));
        let response = self.client.delete(&url).send().await?;

        self.handle_response(response).await
    }

    /// Follow a run's output until the orchestrator closes the stream
    ///
    /// `last_sequence_num` is the last line already held; `None` starts from
    /// the first line. Dropped connections are resumed from the last line
    /// received.
    pub fn follow_run(&self, run_id: Uuid, last_sequence_num: Option<i64>) -> FrameStream {
        FrameStream {
            client: self.clone(),
            run_id,
            cursor: last_sequence_num,
            response: None,
            decoder: SseDecoder::default(),
            ready: VecDeque::new(),
            failures: 0,
            done: false,
        }
    }
}

/// Frames of one run's output, in sequence order
///
/// Ends after the closing frame (`completed` or `cancelled`), which is
/// returned like any other frame.
pub struct FrameStream {
    client: OrchestratorClient,
    run_id: Uuid,
    cursor: Option<i64>,
    response: Option<reqwest::Response>,
    decoder: SseDecoder,
    ready: VecDeque<StreamFrame>,
    failures: u32,
    done: bool,
}

impl FrameStream {
    /// Sequence number of the last output line returned
    pub fn last_sequence_num(&self) -> Option<i64> {
        self.cursor
    }

    /// Next frame, or `None` once the stream has closed
    pub async fn next(&mut self) -> Result<Option<StreamFrame>> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                if frame.is_final() {
                    self.done = true;
                    self.ready.clear();
                    self.response = None;
                } else {
                    self.cursor = Some(frame.sequence_num);
                }
                return Ok(Some(frame));
            }

            if self.done {
                return Ok(None);
            }

            let Some(response) = self.response.as_mut() else {
                self.connect().await?;
                continue;
            };

            let chunk = response.chunk().await;
            match chunk {
                Ok(Some(bytes)) => self.accept(&bytes)?,
                Ok(None) => {
                    self.response = None;
                    self.back_off("stream ended before the run finished").await?;
                }
                Err(e) => {
                    self.response = None;
                    self.back_off(&e.to_string()).await?;
                }
            }
        }
    }

    async fn connect(&mut self) -> Result<()> {
        let url = self.client.url(&format!("/runs/{}/stream", self.run_id));
        let mut request = self.client.client.get(&url);
        if let Some(cursor) = self.cursor {
            request = request.query(&[("last_sequence_num", cursor)]);
        }

        tracing::debug!(run_id = %self.run_id, cursor = ?self.cursor, "Connecting to run stream");

        match request.send().await {
            Ok(response) => {
                let response = OrchestratorClient::check_status(response).await?;
                self.decoder = SseDecoder::default();
                self.response = Some(response);
                Ok(())
            }
            Err(e) => self.back_off(&e.to_string()).await,
        }
    }

    /// Decode a body chunk, queueing frames not seen before
    fn accept(&mut self, bytes: &[u8]) -> Result<()> {
        for event in self.decoder.push(bytes) {
            let frame: StreamFrame = serde_json::from_str(&event.data)
                .map_err(|e| ClientError::ParseError(format!("invalid stream frame: {}", e)))?;

            let last = self
                .ready
                .back()
                .map(|f| f.sequence_num)
                .or(self.cursor);
            if !frame.is_final() && last.is_some_and(|last| frame.sequence_num <= last) {
                continue;
            }

            self.failures = 0;
            self.ready.push_back(frame);
        }
        Ok(())
    }

    async fn back_off(&mut self, reason: &str) -> Result<()> {
        self.failures += 1;
        if self.failures > MAX_RECONNECTS {
            return Err(ClientError::StreamInterrupted(format!(
                "gave up after {} reconnects: {}",
                MAX_RECONNECTS, reason
            )));
        }

        tracing::warn!(
            run_id = %self.run_id,
            attempt = self.failures,
            "Run stream interrupted, reconnecting: {}",
            reason
        );
        tokio::time::sleep(RECONNECT_DELAY * self.failures).await;
        Ok(())
    }
}
