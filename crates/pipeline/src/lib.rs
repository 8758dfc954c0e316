//! Client-side job pipeline: one image in, one background-free image out.
//!
//! [`Orchestrator`] ties the pieces together. It validates and normalizes
//! the selected file, uploads it, submits the bound job definition, then
//! waits for whichever of the progress channel and the history poller
//! detects completion first.

pub mod config;
pub mod error;
pub mod orchestrator;

pub use config::ClientConfig;
pub use error::PipelineError;
pub use orchestrator::{Orchestrator, Phase, Snapshot};
