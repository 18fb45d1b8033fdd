//! stemflow library crate.
//!
//! Asynchronous stem separation: jobs are submitted over HTTP, run through a
//! pipeline of external tools in the background, and report progress to
//! WebSocket subscribers.

pub mod api;
pub mod config;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod notify;
pub mod pipeline;
pub mod submission;
pub mod utils;

pub use error::{Error, Result};
