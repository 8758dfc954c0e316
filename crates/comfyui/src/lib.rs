//! Engine-facing client library.
//!
//! Provides the REST job client, typed real-time message parsing, the
//! throttled progress channel, the history poller, and the completion slot
//! the two race to fill.

pub mod api;
pub mod channel;
pub mod client;
pub mod completion;
pub mod messages;
pub mod poller;
