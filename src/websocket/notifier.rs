//! Update callback dispatch.
//!
//! Applied diffs are handed to a bounded queue drained by a single
//! dispatcher task. The dispatcher runs the consumer's callback on the
//! blocking pool, one update at a time, so callbacks keep feed order and
//! never occupy an async worker. The feed reader waits at most the
//! configured timeout for queue space, then drops the notification so a
//! slow consumer can't stall ingestion.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::{debug, warn};

use crate::models::update::Update;

/// Invoked once per applied diff.
pub type UpdateCallback = Arc<dyn Fn(Update) + Send + Sync>;

/// Invoked each time a connection is authenticated and starts streaming.
pub type ConnectCallback = Arc<dyn Fn() + Send + Sync>;

/// Sending side of the update queue.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Update>,
    send_timeout: Duration,
}

impl Notifier {
    /// Spawns the dispatcher task on `runtime` and returns its sender.
    ///
    /// The task exits once every `Notifier` clone is dropped.
    pub fn spawn(
        runtime: &Handle,
        callback: UpdateCallback,
        capacity: usize,
        send_timeout: Duration,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<Update>(capacity.max(1));
        runtime.spawn(async move {
            while let Some(update) = rx.recv().await {
                let callback = callback.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || callback(update)).await {
                    warn!("Update callback panicked: {e}");
                }
            }
            debug!("Update dispatcher stopped");
        });

        Self { tx, send_timeout }
    }

    /// Queues `update` for the callback, dropping it if the queue stays full.
    pub async fn notify(&self, update: Update) {
        match self.tx.send_timeout(update, self.send_timeout).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(update)) => {
                warn!(
                    sequence = update.sequence,
                    "Update callback is lagging, dropping notification"
                );
            }
            Err(SendTimeoutError::Closed(update)) => {
                debug!(sequence = update.sequence, "Update dispatcher gone");
            }
        }
    }
}
