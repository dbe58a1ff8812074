//! Background cache warming
//!
//! Periodically runs every URL-backed source through the [`Cacher`] so that
//! entries are fetched before the first request arrives and refreshed as
//! they go stale. Results are reported over a tokio channel.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::cache::Cacher;
use crate::http::HttpGetter;
use crate::responder::Payload;
use crate::sources::SourcesConfig;

/// Messages sent from the warmer to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshMessage {
    /// A pass over all sources is starting
    CycleStarted(u64),
    /// A source resolved to a value
    Served {
        key: String,
        bytes: usize,
    },
    /// A source could not be resolved
    Failed {
        key: String,
        error: String,
    },
    /// A pass over all sources finished
    CycleCompleted(u64),
}

/// Configuration for the warming loop
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Delay between passes
    pub interval: Duration,
    /// Number of passes to run; `None` runs until shutdown
    pub cycles: Option<u64>,
    /// Whether warming is enabled
    pub enabled: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            cycles: None,
            enabled: true,
        }
    }
}

/// Handle for controlling the warmer
pub struct RefreshHandle {
    /// Channel for receiving refresh messages
    pub receiver: mpsc::Receiver<RefreshMessage>,
    /// Flag to signal shutdown
    shutdown_tx: mpsc::Sender<()>,
}

impl RefreshHandle {
    /// Spawns the warming task
    ///
    /// The first pass runs immediately. The receiver is closed once the
    /// configured number of passes is done or after [`RefreshHandle::shutdown`].
    pub fn spawn(
        cacher: Cacher<Payload>,
        sources: SourcesConfig,
        getter: HttpGetter,
        config: RefreshConfig,
    ) -> Self {
        let (msg_tx, msg_rx) = mpsc::channel(32);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        if config.enabled {
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(config.interval);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                let mut cycle = 0u64;

                loop {
                    if config.cycles.is_some_and(|limit| cycle >= limit) {
                        break;
                    }
                    tokio::select! {
                        _ = interval.tick() => {
                            cycle += 1;
                            if !run_cycle(&cacher, &sources, &getter, cycle, &msg_tx).await {
                                break;
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            break;
                        }
                    }
                }
                debug!(cycles = cycle, "warmer stopped");
            });
        }

        Self {
            receiver: msg_rx,
            shutdown_tx,
        }
    }

    /// Shuts down the warming task
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Runs one pass; returns `false` once the receiver has gone away
async fn run_cycle(
    cacher: &Cacher<Payload>,
    sources: &SourcesConfig,
    getter: &HttpGetter,
    cycle: u64,
    tx: &mpsc::Sender<RefreshMessage>,
) -> bool {
    if tx.send(RefreshMessage::CycleStarted(cycle)).await.is_err() {
        return false;
    }

    for source in sources.fetchable() {
        let message = match cacher
            .fetch(&source.key, source.policy(), getter.getter(source))
            .await
        {
            Ok(payload) => RefreshMessage::Served {
                key: source.key.clone(),
                bytes: payload.len(),
            },
            Err(err) => {
                warn!(key = %source.key, error = %err, "warming failed");
                RefreshMessage::Failed {
                    key: source.key.clone(),
                    error: err.to_string(),
                }
            }
        };
        if tx.send(message).await.is_err() {
            return false;
        }
    }

    tx.send(RefreshMessage::CycleCompleted(cycle)).await.is_ok()
}

/// Checks for pending refresh messages without blocking
pub fn try_recv(handle: &mut RefreshHandle) -> Option<RefreshMessage> {
    handle.receiver.try_recv().ok()
}
