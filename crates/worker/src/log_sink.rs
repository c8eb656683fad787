//! Ships JSON log lines to an HTTP collector.
//!
//! [`SinkWriter`] plugs into a `tracing_subscriber::fmt` layer and pushes
//! each formatted line into an unbounded channel. A background task drains
//! the channel and POSTs batches as a JSON array. Delivery failures are
//! logged under [`SINK_TARGET`], which the sink layer itself filters out.

use std::io;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing_subscriber::fmt::MakeWriter;

/// Tracing target used for the sink's own diagnostics.
pub const SINK_TARGET: &str = "relay_worker::log_sink";

/// Lines per POST.
const MAX_BATCH: usize = 100;

/// Flush period while lines trickle in.
const FLUSH_INTERVAL: Duration = Duration::from_secs(2);

/// HTTP request timeout for a single batch.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How long shutdown waits for the final flush.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// `MakeWriter` handing out one [`LineWriter`] per event.
#[derive(Debug, Clone)]
pub struct SinkWriter {
    tx: mpsc::UnboundedSender<String>,
}

impl<'a> MakeWriter<'a> for SinkWriter {
    type Writer = LineWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LineWriter {
            tx: self.tx.clone(),
            buf: Vec::new(),
        }
    }
}

/// Buffers one formatted event and enqueues it when dropped.
pub struct LineWriter {
    tx: mpsc::UnboundedSender<String>,
    buf: Vec<u8>,
}

impl io::Write for LineWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LineWriter {
    fn drop(&mut self) {
        let line = String::from_utf8_lossy(&self.buf);
        let line = line.trim_end();
        if !line.is_empty() {
            // A closed channel means the sink already shut down.
            let _ = self.tx.send(line.to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// Background delivery
// ---------------------------------------------------------------------------

/// Handle to the running delivery task.
pub struct LogSink {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl LogSink {
    /// Start the delivery task for `url` and return the writer feeding it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(url: String) -> Result<(Self, SinkWriter), reqwest::Error> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run(client, url, rx, shutdown_rx));
        Ok((Self { shutdown, task }, SinkWriter { tx }))
    }

    /// Flush everything queued so far and stop the task.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.task).await.is_err() {
            tracing::warn!(target: SINK_TARGET, "Timed out flushing log sink");
        }
    }
}

async fn run(
    client: reqwest::Client,
    url: String,
    mut rx: mpsc::UnboundedReceiver<String>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut batch: Vec<String> = Vec::new();
    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + FLUSH_INTERVAL, FLUSH_INTERVAL);

    loop {
        tokio::select! {
            Some(line) = rx.recv() => {
                batch.push(line);
                if batch.len() >= MAX_BATCH {
                    deliver(&client, &url, &mut batch).await;
                }
            }
            _ = ticker.tick() => {
                deliver(&client, &url, &mut batch).await;
            }
            _ = &mut shutdown_rx => {
                while let Ok(line) = rx.try_recv() {
                    batch.push(line);
                }
                deliver(&client, &url, &mut batch).await;
                break;
            }
        }
    }
}

/// POST the batch and clear it. Failed batches are dropped.
async fn deliver(client: &reqwest::Client, url: &str, batch: &mut Vec<String>) {
    if batch.is_empty() {
        return;
    }

    let records: Vec<Value> = batch
        .drain(..)
        .map(|line| serde_json::from_str(&line).unwrap_or(Value::String(line)))
        .collect();
    let count = records.len();

    match client.post(url).json(&records).send().await {
        Ok(response) if response.status().is_success() => {}
        Ok(response) => {
            tracing::warn!(
                target: SINK_TARGET,
                status = response.status().as_u16(),
                count,
                "Log sink rejected batch",
            );
        }
        Err(e) => {
            tracing::warn!(target: SINK_TARGET, error = %e, count, "Log sink delivery failed");
        }
    }
}
