//! Serverless ComfyUI job worker.
//!
//! Validates a job payload, stages its input asset, drives ComfyUI through
//! submission and completion polling, and streams the outputs to a tus
//! endpoint. [`orchestrator::JobOrchestrator`] ties the stages together.

pub mod config;
pub mod log_sink;
pub mod logging;
pub mod orchestrator;
pub mod publisher;
pub mod stager;
