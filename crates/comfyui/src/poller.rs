//! History poller that detects job completion by pulling.
//!
//! The poller is the reliable fallback for the real-time channel: it asks
//! for the job's history record on a fixed interval until an output shows
//! up, then settles the shared [`CompletionSlot`]. Fetch failures are
//! logged and the next tick simply tries again.

use std::sync::Arc;
use std::time::Duration;

use rmbg_core::types::JobHandle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::api::RemoteJobClient;
use crate::completion::{Completion, CompletionSlot, CompletionSource, JobOutcome};

/// Interval between two history requests.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Handle to a running poll loop. Cancelling is idempotent.
pub struct CompletionPoller {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CompletionPoller {
    /// Start polling history for `job`.
    ///
    /// The first request is issued one `interval` after start.
    pub fn start(
        client: Arc<dyn RemoteJobClient>,
        job: JobHandle,
        interval: Duration,
        slot: Arc<CompletionSlot>,
        cancel: CancellationToken,
    ) -> Self {
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            poll_loop(client, job, interval, slot, task_cancel).await;
        });

        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Stop the timer and abort any in-flight request.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("Completion poller cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.task.is_none()
    }
}

impl Drop for CompletionPoller {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn poll_loop(
    client: Arc<dyn RemoteJobClient>,
    job: JobHandle,
    interval: Duration,
    slot: Arc<CompletionSlot>,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut attempt = 0u32;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        attempt += 1;

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                // Torn down mid-request: not an error.
                tracing::trace!(prompt_id = %job, "History request cancelled");
                return;
            }
            result = client.fetch_job_record(&job) => result,
        };

        match result {
            Ok(Some(record)) => {
                if let Some(output) = record.first_output() {
                    tracing::info!(
                        prompt_id = %job,
                        attempt,
                        filename = %output.filename,
                        "Job output found in history",
                    );
                    slot.settle(Completion {
                        job: job.clone(),
                        source: CompletionSource::Poller,
                        outcome: JobOutcome::Output(output.clone()),
                    });
                    return;
                }
                if record.failed() {
                    tracing::warn!(prompt_id = %job, attempt, "History reports job failure");
                    slot.settle(Completion {
                        job: job.clone(),
                        source: CompletionSource::Poller,
                        outcome: JobOutcome::Failed("The job failed on the server".to_string()),
                    });
                    return;
                }
                tracing::trace!(prompt_id = %job, attempt, "History record has no output yet");
            }
            Ok(None) => {
                tracing::trace!(prompt_id = %job, attempt, "Job not in history yet");
            }
            Err(e) => {
                tracing::warn!(prompt_id = %job, attempt, error = %e, "History poll failed");
            }
        }
    }
}
