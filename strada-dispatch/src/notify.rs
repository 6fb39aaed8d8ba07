use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tracing::debug;
use uuid::Uuid;

use strada_core::{DispatchError, OfferNotifier};
use strada_shared::events::OfferCreatedEvent;

/// Process-scoped offer push channel.
///
/// Best effort by contract: with no subscribed driver connections the send
/// simply drops, and drivers discover the offer by polling their pending
/// list instead.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<OfferCreatedEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OfferCreatedEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl OfferNotifier for BroadcastNotifier {
    async fn offer_created(&self, event: &OfferCreatedEvent) -> Result<(), DispatchError> {
        if let Err(e) = self.tx.send(event.clone()) {
            // No live subscribers; normal when drivers poll.
            debug!(request_id = %event.request_id, "offer push dropped: {e}");
        }
        Ok(())
    }
}

/// Cancellation signals for in-flight dispatches, keyed by trip.
///
/// Explicitly initialized and injected by reference wherever a dispatch or a
/// cancel entry point needs it; nothing here is global state. A trip holds
/// at most one slot at a time, and the slot lives in an RAII guard so an
/// aborted dispatch future cannot leak its entry.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    inner: Mutex<HashMap<Uuid, watch::Sender<bool>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the trip's dispatch slot and get its cancel signal. Conflict if
    /// a dispatch is already in flight for this trip.
    pub fn register(self: Arc<Self>, trip_id: Uuid) -> Result<CancelGuard, DispatchError> {
        let mut map = self.lock();
        if map.contains_key(&trip_id) {
            return Err(DispatchError::Conflict(format!(
                "trip {trip_id} already has a dispatch in flight"
            )));
        }
        let (tx, rx) = watch::channel(false);
        map.insert(trip_id, tx);
        drop(map);
        Ok(CancelGuard {
            registry: self,
            trip_id,
            rx,
        })
    }

    /// Fire the cancel signal if a dispatch is in flight; no-op otherwise.
    pub fn cancel(&self, trip_id: Uuid) {
        if let Some(tx) = self.lock().get(&trip_id) {
            tx.send_replace(true);
        }
    }

    fn clear(&self, trip_id: Uuid) {
        self.lock().remove(&trip_id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, watch::Sender<bool>>> {
        // The map stays usable even if a panicking thread poisoned it.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the trip's dispatch slot on drop, whether the dispatch finished
/// or its future was dropped mid-wait.
#[derive(Debug)]
pub struct CancelGuard {
    registry: Arc<CancellationRegistry>,
    trip_id: Uuid,
    rx: watch::Receiver<bool>,
}

impl CancelGuard {
    pub fn receiver(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.registry.clear(self.trip_id);
    }
}
