use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use strada_core::{DispatchError, OfferNotifier, RequestRepository};
use strada_geo::GeoDriverIndex;
use strada_shared::events::OfferCreatedEvent;
use strada_shared::{
    BookingRequest, DispatchOutcome, DriverCandidate, ExhaustReason, RequestStatus, Trip,
    TripStatus,
};
use strada_store::DispatchConfig;

use crate::trips::TripStateManager;
use crate::waiter::{ResponseWaiter, WaitOutcome};

enum AttemptOutcome {
    Accepted,
    Declined,
    Cancelled,
}

/// Per-trip dispatch state machine.
///
/// Offers go to one candidate at a time, nearest first. Sequential offering
/// caps simultaneous offers per driver and rules out double-booking races;
/// the worst case of `max_attempts x accept_timeout` of wall time is the
/// accepted price for that. A dispatch never retries itself after
/// exhaustion; callers issue a fresh one.
pub struct DispatchCoordinator {
    geo: GeoDriverIndex,
    requests: Arc<dyn RequestRepository>,
    trips: Arc<TripStateManager>,
    notifier: Arc<dyn OfferNotifier>,
    config: DispatchConfig,
}

impl DispatchCoordinator {
    pub fn new(
        geo: GeoDriverIndex,
        requests: Arc<dyn RequestRepository>,
        trips: Arc<TripStateManager>,
        notifier: Arc<dyn OfferNotifier>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            geo,
            requests,
            trips,
            notifier,
            config,
        }
    }

    pub async fn dispatch(
        &self,
        trip: &Trip,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<DispatchOutcome, DispatchError> {
        if trip.status != TripStatus::Pending {
            return Err(DispatchError::Conflict(format!(
                "trip {} is {:?}, not dispatchable",
                trip.id, trip.status
            )));
        }
        if !trip.pickup.is_valid() || !trip.destination.is_valid() {
            return Err(DispatchError::Validation(format!(
                "trip {} has invalid coordinates",
                trip.id
            )));
        }

        let candidates = self
            .geo
            .nearest_available(trip.pickup, &trip.region, self.config.search_radius_km)
            .await?;

        if candidates.is_empty() {
            info!(trip_id = %trip.id, region = %trip.region, "no drivers in area");
            self.trips
                .mark_dispatch_failed(trip.id, ExhaustReason::NoDriversInArea.as_str())
                .await?;
            return Ok(DispatchOutcome::Exhausted {
                reason: ExhaustReason::NoDriversInArea,
            });
        }

        let attempts = candidates.len().min(self.config.max_attempts as usize);
        info!(
            trip_id = %trip.id,
            candidates = candidates.len(),
            attempts,
            "dispatch started"
        );

        for (attempt, candidate) in candidates.into_iter().take(attempts).enumerate() {
            debug!(
                trip_id = %trip.id,
                attempt = attempt + 1,
                driver_id = %candidate.driver_id,
                distance_km = candidate.distance_km,
                "offering trip"
            );

            match self.offer_to(trip, &candidate, cancel_rx.clone()).await {
                Ok(AttemptOutcome::Accepted) => {
                    return self.finish_assignment(trip, candidate.driver_id).await;
                }
                Ok(AttemptOutcome::Declined) => continue,
                Ok(AttemptOutcome::Cancelled) => {
                    info!(trip_id = %trip.id, "dispatch cancelled mid-wait");
                    return Ok(DispatchOutcome::Cancelled);
                }
                // A store fault abandons this attempt but still consumes it,
                // so the loop always makes forward progress.
                Err(DispatchError::Store(e)) => {
                    error!(
                        trip_id = %trip.id,
                        driver_id = %candidate.driver_id,
                        "attempt abandoned, store unavailable: {e}"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        self.trips
            .mark_dispatch_failed(trip.id, ExhaustReason::NoDriverAccepted.as_str())
            .await?;
        Ok(DispatchOutcome::Exhausted {
            reason: ExhaustReason::NoDriverAccepted,
        })
    }

    /// One candidate attempt: create the request, push the offer, suspend
    /// until it resolves.
    async fn offer_to(
        &self,
        trip: &Trip,
        candidate: &DriverCandidate,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<AttemptOutcome, DispatchError> {
        let request = self
            .requests
            .create(BookingRequest::new(
                trip.id,
                candidate.driver_id,
                self.config.accept_timeout(),
            ))
            .await?;

        match self.await_response(trip, &request, cancel_rx).await {
            Err(e) => {
                // The request is already stored; void it so the
                // one-pending-per-trip guard cannot block the next candidate
                // for the rest of the offer window.
                match self.requests.expire(request.id).await {
                    Ok(_) => {}
                    Err(void_err) if void_err.is_conflict() => {}
                    Err(void_err) => {
                        warn!(
                            request_id = %request.id,
                            "could not void abandoned request: {void_err}"
                        );
                    }
                }
                Err(e)
            }
            resolved => resolved,
        }
    }

    async fn await_response(
        &self,
        trip: &Trip,
        request: &BookingRequest,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<AttemptOutcome, DispatchError> {
        let status_rx = self.requests.subscribe(request.id).await?;

        let event = OfferCreatedEvent {
            request_id: request.id,
            trip_id: trip.id,
            driver_id: request.driver_id,
            pickup: trip.pickup,
            estimated_fare: trip.estimated_fare,
            expires_at: request.expires_at,
        };
        if let Err(e) = self.notifier.offer_created(&event).await {
            // Best effort only; the driver can still poll pending offers.
            warn!(request_id = %request.id, "offer notification failed: {e}");
        }

        match ResponseWaiter::wait(status_rx, request.expires_at, cancel_rx).await {
            WaitOutcome::Resolved(RequestStatus::Accepted) => Ok(AttemptOutcome::Accepted),
            WaitOutcome::Resolved(_) => Ok(AttemptOutcome::Declined),
            WaitOutcome::Cancelled => {
                // Leave the in-flight request to the expiry sweep.
                Ok(AttemptOutcome::Cancelled)
            }
            WaitOutcome::DeadlineElapsed => match self.requests.expire(request.id).await {
                Ok(_) => Ok(AttemptOutcome::Declined),
                Err(e) if e.is_conflict() => {
                    // Lost the race at the wire: a response landed between
                    // our deadline and the expiry write. Honor an accept.
                    match self.requests.get(request.id).await? {
                        Some(r) if r.status == RequestStatus::Accepted => {
                            Ok(AttemptOutcome::Accepted)
                        }
                        _ => Ok(AttemptOutcome::Declined),
                    }
                }
                Err(e) => Err(e),
            },
        }
    }

    async fn finish_assignment(
        &self,
        trip: &Trip,
        driver_id: uuid::Uuid,
    ) -> Result<DispatchOutcome, DispatchError> {
        match self.trips.bind_driver(trip.id, driver_id).await {
            Ok(_) => {
                info!(trip_id = %trip.id, driver_id = %driver_id, "dispatch assigned");
                Ok(DispatchOutcome::Assigned { driver_id })
            }
            Err(e) if e.is_conflict() => {
                // The trip moved under us; the only legitimate way is a
                // concurrent cancellation.
                let current = self.trips.get_trip(trip.id).await?;
                if current.status == TripStatus::Cancelled {
                    Ok(DispatchOutcome::Cancelled)
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }
}
