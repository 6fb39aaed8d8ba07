use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use strada_core::{DispatchError, RequestRepository};
use strada_shared::{BookingRequest, RequestStatus};

struct Entry {
    request: BookingRequest,
    // Publishes terminal transitions; waiters subscribe instead of polling.
    status_tx: watch::Sender<RequestStatus>,
}

/// In-memory booking-request store.
///
/// One mutex over the map is the whole atomicity story: every transition
/// re-checks `Pending` under the lock, so of a concurrent accept, reject and
/// expiry sweep exactly one wins and the rest see a conflict. Resolved
/// requests stay in the map as an audit trail.
#[derive(Default)]
pub struct InMemoryRequestRepository {
    inner: Mutex<HashMap<Uuid, Entry>>,
}

impl InMemoryRequestRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of requests ever created, terminal ones included.
    pub fn count(&self) -> usize {
        self.inner
            .lock()
            .map(|map| map.len())
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, Entry>>, DispatchError> {
        self.inner
            .lock()
            .map_err(|_| DispatchError::Store("request store lock poisoned".into()))
    }
}

fn terminal_conflict(request: &BookingRequest) -> DispatchError {
    DispatchError::Conflict(format!(
        "request {} already resolved as {:?}",
        request.id, request.status
    ))
}

#[async_trait]
impl RequestRepository for InMemoryRequestRepository {
    async fn create(&self, request: BookingRequest) -> Result<BookingRequest, DispatchError> {
        let mut map = self.lock()?;

        // Attempts are strictly sequential: one pending request per trip.
        if let Some(open) = map
            .values()
            .find(|e| e.request.trip_id == request.trip_id && e.request.is_pending())
        {
            return Err(DispatchError::Conflict(format!(
                "trip {} already has pending request {}",
                request.trip_id, open.request.id
            )));
        }

        let (status_tx, _) = watch::channel(request.status);
        let stored = request.clone();
        map.insert(
            request.id,
            Entry {
                request,
                status_tx,
            },
        );
        Ok(stored)
    }

    async fn get(&self, id: Uuid) -> Result<Option<BookingRequest>, DispatchError> {
        Ok(self.lock()?.get(&id).map(|e| e.request.clone()))
    }

    async fn accept(
        &self,
        request_id: Uuid,
        driver_id: Uuid,
    ) -> Result<BookingRequest, DispatchError> {
        let mut map = self.lock()?;
        let entry = map
            .get_mut(&request_id)
            .ok_or_else(|| DispatchError::not_found(format!("request {request_id}")))?;

        if !entry.request.is_pending() {
            return Err(terminal_conflict(&entry.request));
        }
        if entry.request.driver_id != driver_id {
            return Err(DispatchError::Conflict(format!(
                "request {request_id} was offered to a different driver"
            )));
        }

        let now = Utc::now();
        if entry.request.is_past_deadline(now) {
            // The offer is dead either way; make that visible immediately
            // instead of leaving it to the next sweep tick.
            entry.request.status = RequestStatus::Expired;
            entry.status_tx.send_replace(RequestStatus::Expired);
            return Err(DispatchError::Conflict(format!(
                "request {request_id} expired before the driver responded"
            )));
        }

        entry.request.status = RequestStatus::Accepted;
        entry.request.accepted_at = Some(now);
        entry.status_tx.send_replace(RequestStatus::Accepted);
        info!(request_id = %request_id, driver_id = %driver_id, "booking request accepted");
        Ok(entry.request.clone())
    }

    async fn reject(
        &self,
        request_id: Uuid,
        driver_id: Uuid,
        reason: &str,
    ) -> Result<BookingRequest, DispatchError> {
        let mut map = self.lock()?;
        let entry = map
            .get_mut(&request_id)
            .ok_or_else(|| DispatchError::not_found(format!("request {request_id}")))?;

        if !entry.request.is_pending() {
            return Err(terminal_conflict(&entry.request));
        }
        if entry.request.driver_id != driver_id {
            return Err(DispatchError::Conflict(format!(
                "request {request_id} was offered to a different driver"
            )));
        }

        entry.request.status = RequestStatus::Rejected;
        entry.request.rejected_at = Some(Utc::now());
        entry.request.rejection_reason = Some(reason.to_string());
        entry.status_tx.send_replace(RequestStatus::Rejected);
        info!(request_id = %request_id, driver_id = %driver_id, reason, "booking request rejected");
        Ok(entry.request.clone())
    }

    async fn expire(&self, request_id: Uuid) -> Result<BookingRequest, DispatchError> {
        let mut map = self.lock()?;
        let entry = map
            .get_mut(&request_id)
            .ok_or_else(|| DispatchError::not_found(format!("request {request_id}")))?;

        if !entry.request.is_pending() {
            return Err(terminal_conflict(&entry.request));
        }

        entry.request.status = RequestStatus::Expired;
        entry.status_tx.send_replace(RequestStatus::Expired);
        Ok(entry.request.clone())
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<usize, DispatchError> {
        let mut map = self.lock()?;
        let mut expired = 0;
        for entry in map.values_mut() {
            if entry.request.is_pending() && entry.request.is_past_deadline(now) {
                entry.request.status = RequestStatus::Expired;
                entry.status_tx.send_replace(RequestStatus::Expired);
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn list_pending_for_driver(
        &self,
        driver_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<BookingRequest>, DispatchError> {
        let map = self.lock()?;
        let mut pending: Vec<BookingRequest> = map
            .values()
            .filter(|e| {
                e.request.driver_id == driver_id
                    && e.request.is_pending()
                    && !e.request.is_past_deadline(now)
            })
            .map(|e| e.request.clone())
            .collect();
        pending.sort_by_key(|r| r.created_at);
        Ok(pending)
    }

    async fn list_for_trip(&self, trip_id: Uuid) -> Result<Vec<BookingRequest>, DispatchError> {
        let map = self.lock()?;
        let mut requests: Vec<BookingRequest> = map
            .values()
            .filter(|e| e.request.trip_id == trip_id)
            .map(|e| e.request.clone())
            .collect();
        requests.sort_by_key(|r| r.created_at);
        Ok(requests)
    }

    async fn subscribe(
        &self,
        request_id: Uuid,
    ) -> Result<watch::Receiver<RequestStatus>, DispatchError> {
        let map = self.lock()?;
        map.get(&request_id)
            .map(|e| e.status_tx.subscribe())
            .ok_or_else(|| DispatchError::not_found(format!("request {request_id}")))
    }
}
