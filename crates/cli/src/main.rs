//! `rmbg`: remove the background of one image through the proxy.
//!
//! Drives a single orchestrator run end to end and writes the result
//! artifact to disk.

use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use rmbg_comfyui::api::ComfyUIApi;
use rmbg_pipeline::{ClientConfig, Orchestrator, Phase, Snapshot};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// MIME type sent for files whose extension maps to no image format.
const UNKNOWN_MIME_TYPE: &str = "application/octet-stream";

#[derive(Debug, Parser)]
#[command(name = "rmbg", version, about = "Remove the background from an image")]
struct Cli {
    /// Image to process (JPG, PNG or WEBP, at most 10MB).
    input: PathBuf,

    /// Where to write the result.
    #[arg(short, long, default_value = "removed-background.png")]
    output: PathBuf,

    /// Base URL of the proxy [env: RMBG_PROXY_URL].
    #[arg(long)]
    proxy_url: Option<String>,

    /// Base URL of the engine's real-time endpoint [env: COMFY_WS_URL].
    #[arg(long)]
    ws_url: Option<String>,

    /// Job template to use instead of the bundled one [env: RMBG_WORKFLOW_PATH].
    #[arg(long)]
    workflow: Option<PathBuf>,

    /// History poll interval in milliseconds [env: RMBG_POLL_INTERVAL_MS].
    #[arg(long)]
    poll_interval_ms: Option<u64>,
}

impl Cli {
    /// Apply the flags that were given on top of `base`.
    fn client_config(&self, base: ClientConfig) -> ClientConfig {
        ClientConfig {
            proxy_url: self.proxy_url.clone().unwrap_or(base.proxy_url),
            ws_url: self.ws_url.clone().unwrap_or(base.ws_url),
            workflow_path: self.workflow.clone().or(base.workflow_path),
            poll_interval: self
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(base.poll_interval),
        }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing();

    if let Err(error) = run(cli).await {
        tracing::error!(error = %error, "Background removal failed");
        eprintln!("Error: {error:#}");
        process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rmbg=info,rmbg_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.client_config(ClientConfig::from_env());
    let bytes = tokio::fs::read(&cli.input)
        .await
        .with_context(|| format!("Failed to read {}", cli.input.display()))?;
    let name = cli
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());

    let orchestrator = Orchestrator::from_config(&config)?;
    let watcher = tokio::spawn(log_progress(orchestrator.subscribe()));

    let outcome = drive(&orchestrator, &name, mime_type_for(&cli.input), bytes).await;
    orchestrator.shutdown();
    watcher.abort();
    let snapshot = outcome?;

    let output = snapshot
        .result
        .ok_or_else(|| anyhow!("Job completed without an output image"))?;

    let api = ComfyUIApi::new(&config.proxy_url);
    tracing::info!(url = %api.resolve_output(&output), "Downloading result");
    let image = api
        .fetch_output(&output)
        .await
        .context("Failed to download the result image")?;

    tokio::fs::write(&cli.output, &image)
        .await
        .with_context(|| format!("Failed to write {}", cli.output.display()))?;
    tracing::info!(path = %cli.output.display(), bytes = image.len(), "Result saved");
    Ok(())
}

/// Select, start and wait for one run. Ctrl-C abandons it.
async fn drive(
    orchestrator: &Orchestrator,
    name: &str,
    mime_type: &str,
    bytes: Vec<u8>,
) -> anyhow::Result<Snapshot> {
    orchestrator
        .select_file(name, mime_type, bytes)
        .await
        .map_err(|e| anyhow!(e.user_message()))?;

    if !orchestrator.start() {
        bail!("The job could not be started");
    }

    let snapshot = tokio::select! {
        settled = orchestrator.wait_settled() => settled?,
        _ = tokio::signal::ctrl_c() => bail!("Interrupted"),
    };

    match snapshot.phase {
        Phase::Complete => Ok(snapshot),
        _ => Err(anyhow!(snapshot
            .error
            .unwrap_or_else(|| "The job did not complete".to_string()))),
    }
}

/// Log phase changes and progress until the sender goes away.
async fn log_progress(mut rx: tokio::sync::watch::Receiver<Snapshot>) {
    let mut last = rx.borrow().clone();
    while rx.changed().await.is_ok() {
        let snapshot = rx.borrow_and_update().clone();
        if snapshot.phase != last.phase {
            tracing::info!(phase = ?snapshot.phase, "Phase changed");
        }
        if snapshot.progress != last.progress && snapshot.phase == Phase::Running {
            tracing::info!(progress = snapshot.progress, "Progress");
        }
        last = snapshot;
    }
}

/// MIME type derived from the file extension.
fn mime_type_for(path: &Path) -> &'static str {
    image::ImageFormat::from_path(path)
        .map(|format| format.to_mime_type())
        .unwrap_or(UNKNOWN_MIME_TYPE)
}
