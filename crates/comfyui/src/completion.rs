//! Single-assignment completion slot shared by the channel and the poller.
//!
//! Both sources may detect the end of the same job. Only the first call to
//! [`CompletionSlot::settle`] is delivered; later ones are dropped.

use std::sync::{Arc, Mutex, PoisonError};

use rmbg_core::output::JobOutputRef;
use rmbg_core::types::JobHandle;
use tokio::sync::oneshot;

/// Which component detected the end of the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSource {
    Channel,
    Poller,
}

/// Terminal result of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The first output artifact of the job.
    Output(JobOutputRef),
    /// The engine reported an execution failure.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub job: JobHandle,
    pub source: CompletionSource,
    pub outcome: JobOutcome,
}

pub struct CompletionSlot {
    tx: Mutex<Option<oneshot::Sender<Completion>>>,
}

impl CompletionSlot {
    /// Create an empty slot and the receiver that observes its value.
    pub fn new() -> (Arc<Self>, oneshot::Receiver<Completion>) {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Self {
            tx: Mutex::new(Some(tx)),
        });
        (slot, rx)
    }

    /// Store `completion` if the slot is still empty.
    ///
    /// Returns `true` for the winning call only.
    pub fn settle(&self, completion: Completion) -> bool {
        let sender = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(sender) = sender else {
            tracing::debug!(
                prompt_id = %completion.job,
                source = ?completion.source,
                "Completion already settled, discarding",
            );
            return false;
        };

        let source = completion.source;
        let job = completion.job.clone();
        if sender.send(completion).is_err() {
            tracing::debug!(prompt_id = %job, ?source, "Completion receiver gone");
        }
        true
    }

    pub fn is_settled(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
