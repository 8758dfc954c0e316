//! Domain types and pure logic for the background-removal client.
//!
//! Everything in this crate is synchronous and side-effect free: input
//! validation, square canvas normalization, job template binding, history
//! output extraction, and the progress sampling policy.

pub mod error;
pub mod normalize;
pub mod output;
pub mod progress;
pub mod source;
pub mod types;
pub mod workflow;
