use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use strada_core::{DispatchError, TripRepository};
use strada_shared::{Trip, TripStatus};

/// In-memory trip store with guarded status transitions.
#[derive(Default)]
pub struct InMemoryTripRepository {
    inner: Mutex<HashMap<Uuid, Trip>>,
}

impl InMemoryTripRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, Trip>>, DispatchError> {
        self.inner
            .lock()
            .map_err(|_| DispatchError::Store("trip store lock poisoned".into()))
    }
}

#[async_trait]
impl TripRepository for InMemoryTripRepository {
    async fn create(&self, trip: Trip) -> Result<(), DispatchError> {
        let mut map = self.lock()?;
        if map.contains_key(&trip.id) {
            return Err(DispatchError::Conflict(format!(
                "trip {} already exists",
                trip.id
            )));
        }
        map.insert(trip.id, trip);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Trip>, DispatchError> {
        Ok(self.lock()?.get(&id).cloned())
    }

    async fn assign_driver(&self, trip_id: Uuid, driver_id: Uuid) -> Result<Trip, DispatchError> {
        let mut map = self.lock()?;
        let trip = map
            .get_mut(&trip_id)
            .ok_or_else(|| DispatchError::not_found(format!("trip {trip_id}")))?;

        if trip.status != TripStatus::Pending {
            return Err(DispatchError::Conflict(format!(
                "trip {trip_id} is {:?}, cannot assign a driver",
                trip.status
            )));
        }

        trip.driver_id = Some(driver_id);
        trip.status = TripStatus::Accepted;
        trip.last_dispatch_failure = None;
        trip.updated_at = Utc::now();
        Ok(trip.clone())
    }

    async fn set_status(
        &self,
        trip_id: Uuid,
        expected: &[TripStatus],
        next: TripStatus,
    ) -> Result<Trip, DispatchError> {
        let mut map = self.lock()?;
        let trip = map
            .get_mut(&trip_id)
            .ok_or_else(|| DispatchError::not_found(format!("trip {trip_id}")))?;

        if !expected.contains(&trip.status) {
            return Err(DispatchError::Conflict(format!(
                "trip {trip_id} is {:?}, expected one of {:?}",
                trip.status, expected
            )));
        }

        trip.status = next;
        trip.updated_at = Utc::now();
        Ok(trip.clone())
    }

    async fn start_ride(&self, trip_id: Uuid, passcode: &str) -> Result<Trip, DispatchError> {
        let mut map = self.lock()?;
        let trip = map
            .get_mut(&trip_id)
            .ok_or_else(|| DispatchError::not_found(format!("trip {trip_id}")))?;

        if !matches!(
            trip.status,
            TripStatus::Accepted | TripStatus::WaitingForPickup
        ) {
            return Err(DispatchError::Conflict(format!(
                "trip {trip_id} is {:?}, pickup verification not possible",
                trip.status
            )));
        }

        match trip.passcode.as_deref() {
            Some(code) if code == passcode => {}
            _ => {
                return Err(DispatchError::Conflict(format!(
                    "invalid pickup code for trip {trip_id}"
                )))
            }
        }

        // One-time code: consumed on success.
        trip.passcode = None;
        trip.status = TripStatus::InProgress;
        trip.updated_at = Utc::now();
        Ok(trip.clone())
    }

    async fn record_dispatch_failure(
        &self,
        trip_id: Uuid,
        reason: &str,
    ) -> Result<Trip, DispatchError> {
        let mut map = self.lock()?;
        let trip = map
            .get_mut(&trip_id)
            .ok_or_else(|| DispatchError::not_found(format!("trip {trip_id}")))?;

        trip.last_dispatch_failure = Some(reason.to_string());
        trip.updated_at = Utc::now();
        Ok(trip.clone())
    }
}
