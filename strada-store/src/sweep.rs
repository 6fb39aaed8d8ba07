use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use strada_core::RequestRepository;

/// Background expiry sweep.
///
/// Ticks on a fixed interval and pushes every overdue pending request to
/// `Expired`. Waiters usually beat it to the punch (they expire their own
/// request on deadline); the sweep is the backstop for requests nobody is
/// awaiting anymore, e.g. after a cancelled dispatch.
pub struct ExpirySweeper {
    requests: Arc<dyn RequestRepository>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(requests: Arc<dyn RequestRepository>, interval: Duration) -> Self {
        Self { requests, interval }
    }

    pub fn spawn(self) -> SweepHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.requests.expire_overdue(Utc::now()).await {
                            Ok(0) => {}
                            Ok(n) => info!(expired = n, "expired overdue booking requests"),
                            Err(e) => error!("expiry sweep failed: {e}"),
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
        SweepHandle {
            shutdown: shutdown_tx,
            handle,
        }
    }
}

/// Owns the sweep task; dropping it without `shutdown` leaves the task
/// running for the lifetime of the runtime.
pub struct SweepHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SweepHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}
