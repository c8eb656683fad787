//! ComfyUI REST client library.
//!
//! Provides the HTTP API wrapper, the fixed-interval retry helper, the
//! availability probe, the completion poller and typed access to the
//! history `outputs` manifest.

pub mod api;
pub mod history;
pub mod poll;
pub mod probe;
pub mod retry;
