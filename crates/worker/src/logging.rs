//! Process-wide tracing setup.
//!
//! Built once in `main` and torn down with [`LoggingGuard::shutdown`], which
//! flushes the optional log sink before the process exits.

use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::log_sink::{LogSink, SINK_TARGET};

/// Crates whose events are enabled at `LOG_LEVEL` when `RUST_LOG` is unset.
const WORKSPACE_CRATES: [&str; 4] = ["relay_worker", "relay_comfyui", "relay_tus", "relay_core"];

/// Keeps the log sink alive until shutdown.
pub struct LoggingGuard {
    sink: Option<LogSink>,
}

impl LoggingGuard {
    /// Flush pending log lines. Call once, right before exit.
    pub async fn shutdown(self) {
        if let Some(sink) = self.sink {
            sink.shutdown().await;
        }
    }
}

/// Default filter directives for a `LOG_LEVEL` value.
pub fn default_directives(level: &str) -> String {
    WORKSPACE_CRATES
        .iter()
        .map(|krate| format!("{krate}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber.
///
/// Human-readable output goes to stderr since stdout carries the job
/// result. When `sink_url` is set, a JSON layer also feeds the log sink.
///
/// Must be called from within a tokio runtime.
pub fn init(level: &str, sink_url: Option<&str>) -> LoggingGuard {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(level)))
        .unwrap_or_else(|_| default_directives("info").into());

    let (sink, sink_layer) = match sink_url.map(|url| LogSink::spawn(url.to_string())) {
        Some(Ok((sink, writer))) => {
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(filter_fn(|meta| meta.target() != SINK_TARGET));
            (Some(sink), Some(layer))
        }
        Some(Err(e)) => {
            eprintln!("Log sink disabled: {e}");
            (None, None)
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(sink_layer)
        .init();

    if let Some(url) = sink_url.filter(|_| sink.is_some()) {
        tracing::info!(url, "Shipping logs to sink");
    }

    LoggingGuard { sink }
}
