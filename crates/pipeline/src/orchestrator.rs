//! Job orchestrator state machine.
//!
//! An [`Orchestrator`] owns one session: the session id sent to the engine,
//! the currently selected canonical image, and at most one in-flight run.
//! A run uploads the image, submits the bound job definition, then races
//! the progress channel against the history poller through a
//! [`CompletionSlot`]. Whatever settles first decides the outcome.
//!
//! State lives behind a `std::sync::Mutex` that is never held across an
//! `.await`, so [`Orchestrator::reset`] and [`Orchestrator::shutdown`] are
//! plain synchronous calls. Observers follow along through a
//! [`watch::Receiver<Snapshot>`].
//!
//! Every run and every file selection bumps a generation counter. Results
//! that arrive for an older generation are dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rmbg_comfyui::api::{ComfyUIApi, RemoteJobClient};
use rmbg_comfyui::channel::{ChannelEvent, ProgressChannel};
use rmbg_comfyui::client::ComfyUIClient;
use rmbg_comfyui::completion::{Completion, CompletionSlot, JobOutcome};
use rmbg_comfyui::poller::CompletionPoller;
use rmbg_core::normalize::{normalize, CanonicalImage};
use rmbg_core::output::JobOutputRef;
use rmbg_core::source::SourceImage;
use rmbg_core::types::{JobHandle, SessionId};
use rmbg_core::workflow::JobDefinition;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::PipelineError;

/// Lifecycle phase of the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Normalizing,
    Ready,
    Uploading,
    Submitting,
    Running,
    Complete,
    Error,
}

impl Phase {
    /// `true` while a job is being uploaded, submitted or executed.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Phase::Uploading | Phase::Submitting | Phase::Running)
    }

    /// `true` for the two terminal phases of an attempt.
    pub fn is_settled(self) -> bool {
        matches!(self, Phase::Complete | Phase::Error)
    }
}

/// Observable state of the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub phase: Phase,
    /// Last accepted progress sample, 0..=100.
    pub progress: u8,
    pub job: Option<JobHandle>,
    /// Output artifact of the last completed job.
    pub result: Option<JobOutputRef>,
    /// User-facing message for the `Error` phase.
    pub error: Option<String>,
}

impl Snapshot {
    /// Locator of the result image, relative to the proxy root.
    pub fn result_locator(&self) -> Option<String> {
        self.result.as_ref().map(JobOutputRef::view_path)
    }
}

/// Drives one image at a time through the remote background-removal job.
pub struct Orchestrator {
    shared: Arc<Shared>,
}

struct Shared {
    api: Arc<dyn RemoteJobClient>,
    channel_client: ComfyUIClient,
    template: JobDefinition,
    poll_interval: Duration,
    session_id: SessionId,
    /// Mirrors `State::shut_down` for readers that must not take the lock.
    shut_down: AtomicBool,
    state: Mutex<State>,
    snapshot_tx: watch::Sender<Snapshot>,
}

#[derive(Default)]
struct State {
    phase: Phase,
    progress: u8,
    image: Option<Arc<CanonicalImage>>,
    job: Option<JobHandle>,
    result: Option<JobOutputRef>,
    error: Option<String>,
    run: Option<ActiveRun>,
    generation: u64,
    shut_down: bool,
}

/// Resources owned by the in-flight run.
struct ActiveRun {
    cancel: CancellationToken,
    channel: ProgressChannel,
    poller: Option<CompletionPoller>,
    task: Option<JoinHandle<()>>,
}

impl ActiveRun {
    fn stop(mut self) {
        self.cancel.cancel();
        self.channel.close();
        if let Some(mut poller) = self.poller.take() {
            poller.cancel();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl State {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            progress: self.progress,
            job: self.job.clone(),
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }

    /// Whether updates from run `generation` still apply.
    fn is_current_run(&self, generation: u64) -> bool {
        self.generation == generation && self.run.is_some()
    }

    /// Release the run from inside its own task, which must not abort itself.
    fn finish_run(&mut self) {
        if let Some(mut run) = self.run.take() {
            drop(run.task.take());
            run.stop();
        }
    }

    fn clear(&mut self) {
        self.generation += 1;
        if let Some(run) = self.run.take() {
            run.stop();
        }
        self.phase = Phase::Idle;
        self.progress = 0;
        self.image = None;
        self.job = None;
        self.result = None;
        self.error = None;
    }
}

impl Orchestrator {
    /// Create an orchestrator with a fresh session id.
    pub fn new(
        api: Arc<dyn RemoteJobClient>,
        channel_client: ComfyUIClient,
        template: JobDefinition,
        poll_interval: Duration,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(Snapshot::default());
        let session_id = SessionId::generate();
        tracing::debug!(session_id = %session_id, "Orchestrator created");

        Self {
            shared: Arc::new(Shared {
                api,
                channel_client,
                template,
                poll_interval,
                session_id,
                shut_down: AtomicBool::new(false),
                state: Mutex::new(State::default()),
                snapshot_tx,
            }),
        }
    }

    /// Build the HTTP and real-time clients from `config`.
    ///
    /// Fails only when a configured job template cannot be loaded.
    pub fn from_config(config: &ClientConfig) -> Result<Self, PipelineError> {
        let template = match &config.workflow_path {
            Some(path) => JobDefinition::load(path)?,
            None => JobDefinition::default_template(),
        };

        Ok(Self::new(
            Arc::new(ComfyUIApi::new(&config.proxy_url)),
            ComfyUIClient::new(&config.ws_url),
            template,
            config.poll_interval,
        ))
    }

    pub fn session_id(&self) -> &SessionId {
        &self.shared.session_id
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared.snapshot_tx.borrow().clone()
    }

    /// Validate and normalize a newly selected file.
    ///
    /// Refused with [`PipelineError::Busy`] while a job is in flight. A
    /// rejected file moves the session to `Error` without touching the
    /// network. On success the previous image, progress and result are
    /// replaced and the session is `Ready`.
    pub async fn select_file(
        &self,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<(), PipelineError> {
        let name = name.into();
        let shared = &self.shared;

        let (generation, source) = {
            let mut state = shared.lock();
            if state.shut_down {
                return Err(PipelineError::ShutDown);
            }
            if state.run.is_some() {
                return Err(PipelineError::Busy);
            }

            state.generation += 1;
            state.image = None;
            state.job = None;
            state.result = None;
            state.progress = 0;
            state.error = None;

            match SourceImage::accept(name.clone(), mime_type, bytes) {
                Ok(source) => {
                    state.phase = Phase::Normalizing;
                    shared.publish(&state);
                    (state.generation, source)
                }
                Err(e) => {
                    let err = PipelineError::from(e);
                    tracing::warn!(file = %name, error = %err, "Selected file rejected");
                    state.phase = Phase::Error;
                    state.error = Some(err.user_message());
                    shared.publish(&state);
                    return Err(err);
                }
            }
        };

        let normalized = tokio::task::spawn_blocking(move || normalize(&source))
            .await
            .map_err(|e| PipelineError::Internal(format!("Normalization task failed: {e}")))
            .and_then(|result| result.map_err(PipelineError::from));

        let mut state = shared.lock();
        if state.generation != generation {
            tracing::debug!(file = %name, "Discarding stale normalization result");
            return Ok(());
        }

        match normalized {
            Ok(image) => {
                tracing::info!(file = %name, side = image.side(), "Image normalized");
                state.image = Some(Arc::new(image));
                state.phase = Phase::Ready;
                shared.publish(&state);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(file = %name, error = %err, "Normalization failed");
                state.phase = Phase::Error;
                state.error = Some(err.user_message());
                shared.publish(&state);
                Err(err)
            }
        }
    }

    /// Start a run for the current image.
    ///
    /// Returns `false` without side effects when there is no image, a job
    /// is already in flight, normalization is still running, or the
    /// session is shut down. After a failed or finished attempt the same
    /// image can be started again. Must be called within a Tokio runtime.
    pub fn start(&self) -> bool {
        let shared = &self.shared;
        let mut state = shared.lock();

        if state.shut_down || state.run.is_some() {
            return false;
        }
        if !matches!(state.phase, Phase::Ready | Phase::Complete | Phase::Error) {
            return false;
        }
        let Some(image) = state.image.clone() else {
            return false;
        };

        state.generation += 1;
        let generation = state.generation;
        let cancel = CancellationToken::new();
        let (slot, completion_rx) = CompletionSlot::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let channel = ProgressChannel::open(
            shared.channel_client.clone(),
            shared.session_id.clone(),
            events_tx,
            Arc::clone(&slot),
            cancel.child_token(),
        );

        let task = tokio::spawn(run_job(
            Arc::clone(shared),
            RunContext {
                generation,
                image,
                slot,
                completion_rx,
                events_rx,
                cancel: cancel.clone(),
            },
        ));

        state.run = Some(ActiveRun {
            cancel,
            channel,
            poller: None,
            task: Some(task),
        });
        state.phase = Phase::Uploading;
        state.progress = 0;
        state.job = None;
        state.result = None;
        state.error = None;
        shared.publish(&state);

        tracing::info!(session_id = %shared.session_id, generation, "Job run started");
        true
    }

    /// Abandon everything and return to `Idle`.
    ///
    /// Closes the channel, stops the poller, aborts pending requests, and
    /// forgets the image, job and result. Safe to call from any phase.
    pub fn reset(&self) {
        let shared = &self.shared;
        let mut state = shared.lock();
        state.clear();
        shared.publish(&state);
        tracing::debug!(session_id = %shared.session_id, "Orchestrator reset");
    }

    /// Release all resources and refuse further work. Idempotent.
    pub fn shutdown(&self) {
        let shared = &self.shared;
        let mut state = shared.lock();
        if state.shut_down {
            return;
        }
        state.clear();
        state.shut_down = true;
        shared.shut_down.store(true, Ordering::SeqCst);
        shared.publish(&state);
        tracing::info!(session_id = %shared.session_id, "Orchestrator shut down");
    }

    /// Wait until the current attempt reaches `Complete` or `Error`.
    ///
    /// Resolves immediately if it already has. Fails with
    /// [`PipelineError::ShutDown`] if the session is shut down first.
    pub async fn wait_settled(&self) -> Result<Snapshot, PipelineError> {
        let shared = &self.shared;
        let mut rx = self.subscribe();

        let snapshot = rx
            .wait_for(|s| s.phase.is_settled() || shared.shut_down.load(Ordering::SeqCst))
            .await
            .map_err(|_| PipelineError::ShutDown)?
            .clone();

        if snapshot.phase.is_settled() {
            Ok(snapshot)
        } else {
            Err(PipelineError::ShutDown)
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &State) {
        self.snapshot_tx.send_replace(state.snapshot());
    }

    fn advance(&self, generation: u64, phase: Phase) -> bool {
        let mut state = self.lock();
        if !state.is_current_run(generation) {
            return false;
        }
        state.phase = phase;
        self.publish(&state);
        true
    }

    /// Record the job handle, bind the channel and start polling.
    fn enter_running(&self, generation: u64, job: JobHandle, slot: Arc<CompletionSlot>) -> bool {
        let mut state = self.lock();
        if !state.is_current_run(generation) {
            return false;
        }

        let poll_interval = self.poll_interval;
        if let Some(run) = state.run.as_mut() {
            run.channel.bind_job(&job);
            run.poller = Some(CompletionPoller::start(
                Arc::clone(&self.api),
                job.clone(),
                poll_interval,
                slot,
                run.cancel.child_token(),
            ));
        }

        tracing::info!(session_id = %self.session_id, prompt_id = %job, "Job running");
        state.job = Some(job);
        state.phase = Phase::Running;
        self.publish(&state);
        true
    }

    fn on_channel_event(&self, generation: u64, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => {
                tracing::debug!(session_id = %self.session_id, "Progress channel connected");
            }
            ChannelEvent::Error(e) => {
                tracing::debug!(session_id = %self.session_id, error = %e, "Progress channel down");
            }
            ChannelEvent::Progress(sample) => {
                let mut state = self.lock();
                if state.is_current_run(generation) && state.phase.is_in_flight() {
                    state.progress = sample.percent;
                    self.publish(&state);
                }
            }
        }
    }

    fn complete(&self, generation: u64, completion: Completion) {
        let mut state = self.lock();
        if !state.is_current_run(generation) {
            return;
        }
        if state.job.as_ref() != Some(&completion.job) {
            tracing::debug!(prompt_id = %completion.job, "Ignoring completion for another job");
            return;
        }

        state.finish_run();
        match completion.outcome {
            JobOutcome::Output(output) => {
                tracing::info!(
                    prompt_id = %completion.job,
                    source = ?completion.source,
                    filename = %output.filename,
                    "Job complete",
                );
                state.progress = 100;
                state.result = Some(output);
                state.phase = Phase::Complete;
            }
            JobOutcome::Failed(message) => {
                let err = PipelineError::Execution(message);
                tracing::warn!(prompt_id = %completion.job, source = ?completion.source, error = %err, "Job failed");
                state.error = Some(err.user_message());
                state.phase = Phase::Error;
            }
        }
        self.publish(&state);
    }

    /// End the run with an error. The image is kept for a retry.
    fn fail(&self, generation: u64, err: PipelineError) {
        let mut state = self.lock();
        if !state.is_current_run(generation) {
            return;
        }
        tracing::warn!(session_id = %self.session_id, error = %err, "Job run failed");

        state.finish_run();
        state.job = None;
        state.error = Some(err.user_message());
        state.phase = Phase::Error;
        self.publish(&state);
    }
}

struct RunContext {
    generation: u64,
    image: Arc<CanonicalImage>,
    slot: Arc<CompletionSlot>,
    completion_rx: oneshot::Receiver<Completion>,
    events_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    cancel: CancellationToken,
}

/// Upload, submit, then wait for the first completion signal.
async fn run_job(shared: Arc<Shared>, ctx: RunContext) {
    let RunContext {
        generation,
        image,
        slot,
        mut completion_rx,
        mut events_rx,
        cancel,
    } = ctx;

    let uploaded = tokio::select! {
        _ = cancel.cancelled() => return,
        result = shared.api.upload_asset(&image) => result,
    };
    let asset = match uploaded {
        Ok(asset) => asset,
        Err(e) => return shared.fail(generation, PipelineError::Upload(e)),
    };
    tracing::debug!(asset = %asset.name, "Image uploaded");

    if !shared.advance(generation, Phase::Submitting) {
        return;
    }

    let mut definition = shared.template.clone();
    if let Err(e) = definition.bind_input_image(asset) {
        return shared.fail(generation, PipelineError::Core(e));
    }

    let submitted = tokio::select! {
        _ = cancel.cancelled() => return,
        result = shared.api.submit_job(&definition, &shared.session_id) => result,
    };
    let job = match submitted {
        Ok(job) => job,
        Err(e) => return shared.fail(generation, PipelineError::Submit(e)),
    };

    if !shared.enter_running(generation, job, Arc::clone(&slot)) {
        return;
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            completion = &mut completion_rx => {
                match completion {
                    Ok(completion) => shared.complete(generation, completion),
                    Err(_) => shared.fail(
                        generation,
                        PipelineError::Internal("Completion slot dropped".into()),
                    ),
                }
                return;
            }
            Some(event) = events_rx.recv() => shared.on_channel_event(generation, event),
        }
    }
}
