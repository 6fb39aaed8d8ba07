use std::sync::Arc;

use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use strada_core::{DispatchError, TripRepository};
use strada_shared::{Coordinates, Trip, TripStatus};

use crate::notify::CancellationRegistry;

/// Trip lifecycle operations consumed by the coordinator and the service.
pub struct TripStateManager {
    trips: Arc<dyn TripRepository>,
    cancellations: Arc<CancellationRegistry>,
}

impl TripStateManager {
    pub fn new(trips: Arc<dyn TripRepository>, cancellations: Arc<CancellationRegistry>) -> Self {
        Self {
            trips,
            cancellations,
        }
    }

    pub async fn create_trip(
        &self,
        rider_id: Uuid,
        pickup: Coordinates,
        destination: Coordinates,
        region: String,
        estimated_fare: i64,
        currency: String,
    ) -> Result<Trip, DispatchError> {
        if !pickup.is_valid() || !destination.is_valid() {
            return Err(DispatchError::Validation(
                "pickup and destination coordinates are required".into(),
            ));
        }
        if region.trim().is_empty() {
            return Err(DispatchError::Validation("region is required".into()));
        }

        let trip = Trip::new(
            rider_id,
            pickup,
            destination,
            region,
            estimated_fare,
            currency,
            generate_passcode(),
        );
        self.trips.create(trip.clone()).await?;
        info!(trip_id = %trip.id, rider_id = %rider_id, "trip created");
        Ok(trip)
    }

    /// Bind the winning driver; the trip moves to `Accepted`.
    pub async fn bind_driver(&self, trip_id: Uuid, driver_id: Uuid) -> Result<Trip, DispatchError> {
        let trip = self.trips.assign_driver(trip_id, driver_id).await?;
        info!(trip_id = %trip_id, driver_id = %driver_id, "driver bound to trip");
        Ok(trip)
    }

    /// Record a dispatch that found nobody on the trip itself. The trip
    /// stays `Pending` so a caller can issue a fresh dispatch.
    pub async fn mark_dispatch_failed(
        &self,
        trip_id: Uuid,
        reason: &str,
    ) -> Result<(), DispatchError> {
        self.trips.record_dispatch_failure(trip_id, reason).await?;
        warn!(trip_id = %trip_id, reason, "dispatch failed");
        Ok(())
    }

    /// Cancel the trip and wake any dispatch waiting on a driver response.
    pub async fn cancel_trip(&self, trip_id: Uuid) -> Result<Trip, DispatchError> {
        let trip = self
            .trips
            .set_status(
                trip_id,
                &[
                    TripStatus::Pending,
                    TripStatus::Accepted,
                    TripStatus::WaitingForPickup,
                ],
                TripStatus::Cancelled,
            )
            .await?;
        self.cancellations.cancel(trip_id);
        info!(trip_id = %trip_id, "trip cancelled");
        Ok(trip)
    }

    /// One-time passcode check at pickup; the trip moves to `InProgress`.
    pub async fn verify_pickup(
        &self,
        trip_id: Uuid,
        passcode: &str,
    ) -> Result<Trip, DispatchError> {
        let trip = self.trips.start_ride(trip_id, passcode).await?;
        info!(trip_id = %trip_id, "pickup verified, ride started");
        Ok(trip)
    }

    pub async fn complete_trip(&self, trip_id: Uuid) -> Result<Trip, DispatchError> {
        let trip = self
            .trips
            .set_status(trip_id, &[TripStatus::InProgress], TripStatus::Completed)
            .await?;
        info!(trip_id = %trip_id, "trip completed");
        Ok(trip)
    }

    pub async fn get_trip(&self, trip_id: Uuid) -> Result<Trip, DispatchError> {
        self.trips
            .get(trip_id)
            .await?
            .ok_or_else(|| DispatchError::not_found(format!("trip {trip_id}")))
    }
}

fn generate_passcode() -> String {
    format!("{:04}", rand::thread_rng().gen_range(0..10_000))
}
