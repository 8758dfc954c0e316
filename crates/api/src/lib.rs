//! HTTP proxy between the background-removal client and the engine.
//!
//! Exposes config, state, error handling, handlers and routes so the
//! binary entrypoint and integration tests share one router.

pub mod config;
pub mod error;
pub mod handlers;
pub mod router;
pub mod routes;
pub mod state;
