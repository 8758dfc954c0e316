//! Real-time progress channel for one session.
//!
//! [`ProgressChannel::open`] spawns a task that connects to the engine's
//! WebSocket, turns `progress` frames into throttled [`ProgressSample`]s,
//! and settles the shared [`CompletionSlot`] when the bound job reports an
//! output or an execution error.
//!
//! The channel only speeds things up. Connection and receive failures are
//! reported as [`ChannelEvent::Error`] and never stop the caller, which
//! still has the history poller.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use rmbg_core::progress::{percent_from_steps, ProgressSample, ProgressThrottle};
use rmbg_core::types::{JobHandle, SessionId};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::client::{ComfyUIClient, ComfyUIClientError};
use crate::completion::{Completion, CompletionSlot, CompletionSource, JobOutcome};
use crate::messages::{parse_message, ComfyUIMessage};

/// Notifications emitted by an open channel.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The WebSocket handshake succeeded.
    Connected,
    /// An accepted (throttled) progress sample.
    Progress(ProgressSample),
    /// The channel failed; callers degrade to polling only.
    Error(ComfyUIClientError),
}

/// Handle to a running channel task. Closing is idempotent.
pub struct ProgressChannel {
    cancel: CancellationToken,
    job_tx: watch::Sender<Option<JobHandle>>,
    task: Option<JoinHandle<()>>,
}

impl ProgressChannel {
    /// Start connecting to the channel for `session_id`.
    ///
    /// Never fails: connection errors arrive later as
    /// [`ChannelEvent::Error`] on `events`. Must be called from within a
    /// Tokio runtime.
    pub fn open(
        client: ComfyUIClient,
        session_id: SessionId,
        events: mpsc::UnboundedSender<ChannelEvent>,
        slot: Arc<CompletionSlot>,
        cancel: CancellationToken,
    ) -> Self {
        let (job_tx, job_rx) = watch::channel(None);
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            run_channel(client, session_id, job_rx, events, slot, task_cancel).await;
        });

        Self {
            cancel,
            job_tx,
            task: Some(task),
        }
    }

    /// Tell the channel which job's outputs and errors to act on.
    pub fn bind_job(&self, job: &JobHandle) {
        self.job_tx.send_replace(Some(job.clone()));
    }

    /// Stop the channel task and drop the connection.
    pub fn close(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("Progress channel closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_none()
    }
}

impl Drop for ProgressChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connect, then read frames until cancelled or the connection drops.
async fn run_channel(
    client: ComfyUIClient,
    session_id: SessionId,
    job_rx: watch::Receiver<Option<JobHandle>>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    slot: Arc<CompletionSlot>,
    cancel: CancellationToken,
) {
    let connection = tokio::select! {
        _ = cancel.cancelled() => return,
        result = client.connect(&session_id) => result,
    };

    let mut ws_stream = match connection {
        Ok(conn) => conn.ws_stream,
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "Real-time channel unavailable, relying on polling");
            let _ = events.send(ChannelEvent::Error(e));
            return;
        }
    };
    let _ = events.send(ChannelEvent::Connected);

    let mut interpreter = MessageInterpreter::new();

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = ws_stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                let job = job_rx.borrow().clone();
                match interpreter.interpret(&text, job.as_ref(), Instant::now()) {
                    Some(Interpreted::Progress(sample)) => {
                        let _ = events.send(ChannelEvent::Progress(sample));
                    }
                    Some(Interpreted::Finished(job, outcome)) => {
                        slot.settle(Completion {
                            job,
                            source: CompletionSource::Channel,
                            outcome,
                        });
                    }
                    None => {}
                }
            }
            Some(Ok(Message::Binary(_))) => {
                tracing::trace!("Ignoring binary frame (preview image)");
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(?frame, "Real-time channel closed by server");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Real-time channel receive error");
                let _ = events.send(ChannelEvent::Error(ComfyUIClientError::Protocol(
                    e.to_string(),
                )));
                break;
            }
            None => break,
        }
    }
}

/// What a single text frame means for the bound job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interpreted {
    Progress(ProgressSample),
    Finished(JobHandle, JobOutcome),
}

/// Stateful frame interpreter: parses, filters by job and throttles.
#[derive(Debug, Default)]
pub struct MessageInterpreter {
    throttle: ProgressThrottle,
}

/// Message kinds we parse; anything else is silently skipped.
const KNOWN_TYPES: &[&str] = &[
    "status",
    "execution_start",
    "execution_cached",
    "executing",
    "progress",
    "executed",
    "execution_success",
    "execution_error",
];

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

impl MessageInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpret one text frame received at `now`.
    ///
    /// `job` is the currently bound job, if submission has finished.
    pub fn interpret(
        &mut self,
        text: &str,
        job: Option<&JobHandle>,
        now: Instant,
    ) -> Option<Interpreted> {
        let message = match parse_message(text) {
            Ok(message) => message,
            Err(e) => {
                log_unparsed(text, &e);
                return None;
            }
        };

        match message {
            ComfyUIMessage::Progress(data) => {
                if !is_for_job(data.prompt_id.as_deref(), job) {
                    return None;
                }
                let Some(percent) = percent_from_steps(data.value, data.max) else {
                    tracing::warn!(value = data.value, max = data.max, "Malformed progress payload");
                    return None;
                };
                self.throttle
                    .offer(percent, now)
                    .map(Interpreted::Progress)
            }
            ComfyUIMessage::Executed(data) => {
                let job = job.filter(|j| j.as_str() == data.prompt_id)?;
                let first = data.output.images.first()?;
                tracing::debug!(prompt_id = %job, node = %data.node, "Node produced output");
                Some(Interpreted::Finished(
                    job.clone(),
                    JobOutcome::Output(first.clone()),
                ))
            }
            ComfyUIMessage::ExecutionError(data) => {
                let job = job.filter(|j| j.as_str() == data.prompt_id)?;
                tracing::error!(
                    prompt_id = %job,
                    node_id = ?data.node_id,
                    error_type = %data.exception_type,
                    error_message = %data.exception_message,
                    "Execution error",
                );
                let message = if data.exception_message.is_empty() {
                    "The job failed on the server".to_string()
                } else {
                    data.exception_message
                };
                Some(Interpreted::Finished(job.clone(), JobOutcome::Failed(message)))
            }
            ComfyUIMessage::Executing(data) => {
                tracing::trace!(node = ?data.node, prompt_id = ?data.prompt_id, "Executing");
                None
            }
            ComfyUIMessage::Status(data) => {
                tracing::debug!(
                    queue_remaining = data.status.exec_info.queue_remaining,
                    "Queue status",
                );
                None
            }
            ComfyUIMessage::ExecutionStart(_)
            | ComfyUIMessage::ExecutionCached(_)
            | ComfyUIMessage::ExecutionSuccess(_) => None,
        }
    }
}

/// Progress frames without a prompt id are attributed to the session.
fn is_for_job(prompt_id: Option<&str>, job: Option<&JobHandle>) -> bool {
    match (prompt_id, job) {
        (Some(id), Some(job)) => id == job.as_str(),
        _ => true,
    }
}

fn log_unparsed(text: &str, error: &serde_json::Error) {
    match serde_json::from_str::<Envelope>(text) {
        Ok(envelope) if !KNOWN_TYPES.contains(&envelope.kind.as_str()) => {
            tracing::trace!(kind = %envelope.kind, "Ignoring unhandled message type");
        }
        _ => {
            tracing::warn!(error = %error, raw_message = %text, "Malformed channel message");
        }
    }
}
