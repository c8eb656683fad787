//! Minimal tus 1.0.0 resumable-upload client.
//!
//! Supports the creation extension (`POST`), chunked `PATCH` uploads and
//! offset queries (`HEAD`). Resuming an interrupted upload is left to the
//! caller via [`client::TusClient::offset`].

pub mod client;
pub mod metadata;

pub use client::{TusClient, TusError, UploadReceipt};
pub use metadata::UploadMetadata;
