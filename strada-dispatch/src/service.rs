use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use uuid::Uuid;

use strada_core::{
    DispatchError, DriverDirectory, OfferNotifier, RequestRepository, TripRepository,
};
use strada_geo::GeoDriverIndex;
use strada_shared::events::OfferCreatedEvent;
use strada_shared::{BookingRequest, Coordinates, DispatchOutcome, PendingOffer, Trip};
use strada_store::DispatchConfig;

use crate::coordinator::DispatchCoordinator;
use crate::notify::{BroadcastNotifier, CancellationRegistry};
use crate::trips::TripStateManager;

/// Facade over the dispatch subsystem: trip lifecycle, the dispatch
/// operation itself, and the driver-facing accept/reject/pending entry
/// points. The accept and reject paths are uncoordinated with the dispatch
/// loop on purpose; the request store's conditional transition is the only
/// synchronization between them.
pub struct DispatchService {
    coordinator: DispatchCoordinator,
    manager: Arc<TripStateManager>,
    trips: Arc<dyn TripRepository>,
    requests: Arc<dyn RequestRepository>,
    notifier: Arc<BroadcastNotifier>,
    cancellations: Arc<CancellationRegistry>,
}

impl DispatchService {
    pub fn new(
        trips: Arc<dyn TripRepository>,
        requests: Arc<dyn RequestRepository>,
        directory: Arc<dyn DriverDirectory>,
        config: DispatchConfig,
    ) -> Self {
        let cancellations = Arc::new(CancellationRegistry::new());
        let notifier = Arc::new(BroadcastNotifier::new(64));
        let manager = Arc::new(TripStateManager::new(
            Arc::clone(&trips),
            Arc::clone(&cancellations),
        ));
        let coordinator = DispatchCoordinator::new(
            GeoDriverIndex::new(directory),
            Arc::clone(&requests),
            Arc::clone(&manager),
            Arc::clone(&notifier) as Arc<dyn OfferNotifier>,
            config,
        );
        Self {
            coordinator,
            manager,
            trips,
            requests,
            notifier,
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
        self.manager
            .create_trip(rider_id, pickup, destination, region, estimated_fare, currency)
            .await
    }

    /// Run the dispatch state machine for one trip. Claims the trip's
    /// cancellation slot for the duration so `cancel_trip` can interrupt the
    /// wait; a second concurrent dispatch of the same trip conflicts.
    pub async fn dispatch(&self, trip_id: Uuid) -> Result<DispatchOutcome, DispatchError> {
        let trip = self
            .trips
            .get(trip_id)
            .await?
            .ok_or_else(|| DispatchError::not_found(format!("trip {trip_id}")))?;

        // The guard releases the slot on every exit path, including this
        // future being dropped mid-wait.
        let guard = Arc::clone(&self.cancellations).register(trip_id)?;
        let cancel_rx = guard.receiver();
        self.coordinator.dispatch(&trip, cancel_rx).await
    }

    pub async fn accept(
        &self,
        request_id: Uuid,
        driver_id: Uuid,
    ) -> Result<BookingRequest, DispatchError> {
        self.requests.accept(request_id, driver_id).await
    }

    pub async fn reject(
        &self,
        request_id: Uuid,
        driver_id: Uuid,
        reason: &str,
    ) -> Result<BookingRequest, DispatchError> {
        self.requests.reject(request_id, driver_id, reason).await
    }

    /// Non-expired pending offers for one driver, oldest first, with enough
    /// trip context to decide.
    pub async fn list_pending(&self, driver_id: Uuid) -> Result<Vec<PendingOffer>, DispatchError> {
        let pending = self
            .requests
            .list_pending_for_driver(driver_id, Utc::now())
            .await?;

        let mut offers = Vec::with_capacity(pending.len());
        for request in pending {
            // A trip missing from the store is a data fault, not the
            // driver's problem; skip the orphan.
            let Some(trip) = self.trips.get(request.trip_id).await? else {
                continue;
            };
            offers.push(PendingOffer {
                request_id: request.id,
                trip_id: trip.id,
                pickup: trip.pickup,
                destination: trip.destination,
                estimated_fare: trip.estimated_fare,
                currency: trip.currency,
                expires_at: request.expires_at,
            });
        }
        Ok(offers)
    }

    /// Audit trail of every booking request issued for the trip.
    pub async fn request_history(
        &self,
        trip_id: Uuid,
    ) -> Result<Vec<BookingRequest>, DispatchError> {
        self.requests.list_for_trip(trip_id).await
    }

    pub async fn cancel_trip(&self, trip_id: Uuid) -> Result<Trip, DispatchError> {
        self.manager.cancel_trip(trip_id).await
    }

    pub async fn verify_pickup(
        &self,
        trip_id: Uuid,
        passcode: &str,
    ) -> Result<Trip, DispatchError> {
        self.manager.verify_pickup(trip_id, passcode).await
    }

    pub async fn complete_trip(&self, trip_id: Uuid) -> Result<Trip, DispatchError> {
        self.manager.complete_trip(trip_id).await
    }

    pub async fn get_trip(&self, trip_id: Uuid) -> Result<Trip, DispatchError> {
        self.manager.get_trip(trip_id).await
    }

    pub fn subscribe_offers(&self) -> broadcast::Receiver<OfferCreatedEvent> {
        self.notifier.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use strada_shared::{DriverProfile, ExhaustReason, RequestStatus, TripStatus};
    use strada_store::{InMemoryDriverDirectory, InMemoryRequestRepository, InMemoryTripRepository};
    use tokio::sync::watch;

    const PICKUP: Coordinates = Coordinates {
        lat: 52.52,
        lon: 13.405,
    };

    fn driver_km_away(km: f64) -> DriverProfile {
        DriverProfile {
            id: Uuid::new_v4(),
            name: format!("driver-{km}"),
            rating: 4.7,
            online: true,
            approved: true,
            active: true,
            location: Coordinates::new(PICKUP.lat + km / 111.19, PICKUP.lon),
            region: "berlin".into(),
        }
    }

    fn build_service(
        drivers: &[DriverProfile],
        requests: Arc<dyn RequestRepository>,
    ) -> Arc<DispatchService> {
        let directory = InMemoryDriverDirectory::new();
        for d in drivers {
            directory.upsert(d.clone()).unwrap();
        }
        Arc::new(DispatchService::new(
            Arc::new(InMemoryTripRepository::new()),
            requests,
            Arc::new(directory),
            DispatchConfig::default(),
        ))
    }

    fn service_with_drivers(
        drivers: &[DriverProfile],
    ) -> (Arc<DispatchService>, Arc<InMemoryRequestRepository>) {
        let requests = Arc::new(InMemoryRequestRepository::new());
        let service = build_service(drivers, Arc::clone(&requests) as Arc<dyn RequestRepository>);
        (service, requests)
    }

    async fn pending_trip(service: &DispatchService) -> Trip {
        service
            .create_trip(
                Uuid::new_v4(),
                PICKUP,
                Coordinates::new(52.48, 13.45),
                "berlin".into(),
                1490,
                "EUR".into(),
            )
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn nearest_rejects_then_second_accepts() {
        let near = driver_km_away(1.2);
        let mid = driver_km_away(3.4);
        let far = driver_km_away(5.0);
        let (service, _) = service_with_drivers(&[near.clone(), mid.clone(), far.clone()]);
        let trip = pending_trip(&service).await;

        let mut offers = service.subscribe_offers();
        let responder = Arc::clone(&service);
        tokio::spawn(async move {
            let first = offers.recv().await.unwrap();
            responder
                .reject(first.request_id, first.driver_id, "too far")
                .await
                .unwrap();

            let second = offers.recv().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            responder
                .accept(second.request_id, second.driver_id)
                .await
                .unwrap();
        });

        let started = tokio::time::Instant::now();
        let outcome = service.dispatch(trip.id).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Assigned { driver_id: mid.id });
        assert!(started.elapsed() < Duration::from_secs(60));

        let trip = service.get_trip(trip.id).await.unwrap();
        assert_eq!(trip.status, TripStatus::Accepted);
        assert_eq!(trip.driver_id, Some(mid.id));

        let history = service.request_history(trip.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].driver_id, near.id);
        assert_eq!(history[0].status, RequestStatus::Rejected);
        assert_eq!(history[1].status, RequestStatus::Accepted);

        // A second dispatch of an assigned trip bounces off the guard.
        assert!(service.dispatch(trip.id).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn no_drivers_exhausts_instantly_without_requests() {
        let (service, requests) = service_with_drivers(&[]);
        let trip = pending_trip(&service).await;

        let outcome = service.dispatch(trip.id).await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Exhausted {
                reason: ExhaustReason::NoDriversInArea
            }
        );
        assert_eq!(requests.count(), 0);
        let trip = service.get_trip(trip.id).await.unwrap();
        assert_eq!(trip.status, TripStatus::Pending);
        assert_eq!(trip.last_dispatch_failure.as_deref(), Some("no_drivers_in_area"));
    }

    #[tokio::test(start_paused = true)]
    async fn three_silent_candidates_take_three_full_timeouts() {
        let drivers = [driver_km_away(1.0), driver_km_away(2.0), driver_km_away(3.0)];
        let (service, _) = service_with_drivers(&drivers);
        let trip = pending_trip(&service).await;

        let started = tokio::time::Instant::now();
        let outcome = service.dispatch(trip.id).await.unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::Exhausted {
                reason: ExhaustReason::NoDriverAccepted
            }
        );
        // Three back-to-back 60s offer windows; each sleep is computed from
        // wall time so the paused-clock total lands just under 180s.
        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_secs(178) && elapsed < Duration::from_secs(200),
            "elapsed {elapsed:?}"
        );

        let history = service.request_history(trip.id).await.unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|r| r.status == RequestStatus::Expired));
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_cap_at_three_and_follow_distance_order() {
        // Seeded out of order on purpose.
        let d5 = driver_km_away(5.0);
        let d1 = driver_km_away(1.2);
        let d3 = driver_km_away(3.4);
        let d7 = driver_km_away(7.0);
        let d9 = driver_km_away(9.0);
        let (service, _) =
            service_with_drivers(&[d5.clone(), d1.clone(), d3.clone(), d7, d9]);
        let trip = pending_trip(&service).await;

        let mut offers = service.subscribe_offers();
        let responder = Arc::clone(&service);
        tokio::spawn(async move {
            while let Ok(offer) = offers.recv().await {
                let _ = responder
                    .reject(offer.request_id, offer.driver_id, "busy")
                    .await;
            }
        });

        let outcome = service.dispatch(trip.id).await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Exhausted {
                reason: ExhaustReason::NoDriverAccepted
            }
        );

        let history = service.request_history(trip.id).await.unwrap();
        let offered: Vec<Uuid> = history.iter().map(|r| r.driver_id).collect();
        assert_eq!(offered, vec![d1.id, d3.id, d5.id]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_the_trip_interrupts_the_wait() {
        let (service, _) = service_with_drivers(&[driver_km_away(1.0)]);
        let trip = pending_trip(&service).await;

        let canceller = Arc::clone(&service);
        let trip_id = trip.id;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel_trip(trip_id).await.unwrap();
        });

        let started = tokio::time::Instant::now();
        let outcome = service.dispatch(trip.id).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(
            service.get_trip(trip.id).await.unwrap().status,
            TripStatus::Cancelled
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pending_offers_are_listable_and_acceptable_by_polling() {
        let driver = driver_km_away(2.0);
        let (service, _) = service_with_drivers(&[driver.clone()]);
        let trip = pending_trip(&service).await;

        let poller = Arc::clone(&service);
        let driver_id = driver.id;
        tokio::spawn(async move {
            loop {
                let pending = poller.list_pending(driver_id).await.unwrap();
                if let Some(offer) = pending.first() {
                    assert_eq!(offer.estimated_fare, 1490);
                    assert_eq!(offer.pickup, PICKUP);
                    poller.accept(offer.request_id, driver_id).await.unwrap();
                    return;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });

        let outcome = service.dispatch(trip.id).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Assigned { driver_id });

        // Nothing pending once resolved.
        assert!(service.list_pending(driver_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dispatching_an_unknown_trip_is_not_found() {
        let (service, _) = service_with_drivers(&[]);
        let err = service.dispatch(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }

    /// Injects store faults into chosen operations, then delegates.
    struct FlakyRequestRepository {
        inner: InMemoryRequestRepository,
        failing_creates: AtomicUsize,
        failing_subscribes: AtomicUsize,
    }

    impl FlakyRequestRepository {
        fn failing_create_once() -> Self {
            Self {
                inner: InMemoryRequestRepository::new(),
                failing_creates: AtomicUsize::new(1),
                failing_subscribes: AtomicUsize::new(0),
            }
        }

        fn failing_subscribe_once() -> Self {
            Self {
                inner: InMemoryRequestRepository::new(),
                failing_creates: AtomicUsize::new(0),
                failing_subscribes: AtomicUsize::new(1),
            }
        }

        fn take_failure(counter: &AtomicUsize) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait]
    impl RequestRepository for FlakyRequestRepository {
        async fn create(&self, request: BookingRequest) -> Result<BookingRequest, DispatchError> {
            if Self::take_failure(&self.failing_creates) {
                return Err(DispatchError::Store("simulated outage".into()));
            }
            self.inner.create(request).await
        }

        async fn get(&self, id: Uuid) -> Result<Option<BookingRequest>, DispatchError> {
            self.inner.get(id).await
        }

        async fn accept(
            &self,
            request_id: Uuid,
            driver_id: Uuid,
        ) -> Result<BookingRequest, DispatchError> {
            self.inner.accept(request_id, driver_id).await
        }

        async fn reject(
            &self,
            request_id: Uuid,
            driver_id: Uuid,
            reason: &str,
        ) -> Result<BookingRequest, DispatchError> {
            self.inner.reject(request_id, driver_id, reason).await
        }

        async fn expire(&self, request_id: Uuid) -> Result<BookingRequest, DispatchError> {
            self.inner.expire(request_id).await
        }

        async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<usize, DispatchError> {
            self.inner.expire_overdue(now).await
        }

        async fn list_pending_for_driver(
            &self,
            driver_id: Uuid,
            now: DateTime<Utc>,
        ) -> Result<Vec<BookingRequest>, DispatchError> {
            self.inner.list_pending_for_driver(driver_id, now).await
        }

        async fn list_for_trip(
            &self,
            trip_id: Uuid,
        ) -> Result<Vec<BookingRequest>, DispatchError> {
            self.inner.list_for_trip(trip_id).await
        }

        async fn subscribe(
            &self,
            request_id: Uuid,
        ) -> Result<watch::Receiver<RequestStatus>, DispatchError> {
            if Self::take_failure(&self.failing_subscribes) {
                return Err(DispatchError::Store("simulated outage".into()));
            }
            self.inner.subscribe(request_id).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn store_failure_consumes_the_attempt_and_moves_on() {
        let near = driver_km_away(1.2);
        let next = driver_km_away(3.4);
        let service = build_service(
            &[near.clone(), next.clone()],
            Arc::new(FlakyRequestRepository::failing_create_once()),
        );
        let trip = pending_trip(&service).await;

        let mut offers = service.subscribe_offers();
        let responder = Arc::clone(&service);
        tokio::spawn(async move {
            while let Ok(offer) = offers.recv().await {
                let _ = responder.accept(offer.request_id, offer.driver_id).await;
            }
        });

        let outcome = service.dispatch(trip.id).await.unwrap();

        // The nearest candidate's attempt died on the store fault and was
        // consumed; the second candidate got the (only) real offer.
        assert_eq!(outcome, DispatchOutcome::Assigned { driver_id: next.id });
        let history = service.request_history(trip.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].driver_id, next.id);
    }

    #[tokio::test]
    async fn store_failure_after_create_voids_the_orphan_request() {
        let near = driver_km_away(1.2);
        let next = driver_km_away(3.4);
        let service = build_service(
            &[near.clone(), next.clone()],
            Arc::new(FlakyRequestRepository::failing_subscribe_once()),
        );
        let trip = pending_trip(&service).await;

        let mut offers = service.subscribe_offers();
        let responder = Arc::clone(&service);
        tokio::spawn(async move {
            while let Ok(offer) = offers.recv().await {
                let _ = responder.accept(offer.request_id, offer.driver_id).await;
            }
        });

        let outcome = service.dispatch(trip.id).await.unwrap();

        // The first request was already stored when the fault hit; it must
        // not hold the one-pending-per-trip slot against the next candidate.
        assert_eq!(outcome, DispatchOutcome::Assigned { driver_id: next.id });
        let history = service.request_history(trip.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].driver_id, near.id);
        assert_eq!(history[0].status, RequestStatus::Expired);
        assert_eq!(history[1].driver_id, next.id);
        assert_eq!(history[1].status, RequestStatus::Accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_dispatch_releases_its_slot_for_a_fresh_one() {
        let driver = driver_km_away(1.0);
        let (service, requests) = service_with_drivers(&[driver.clone()]);
        let trip = pending_trip(&service).await;

        let runner = Arc::clone(&service);
        let trip_id = trip.id;
        let task = tokio::spawn(async move { runner.dispatch(trip_id).await });
        tokio::time::sleep(Duration::from_secs(5)).await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        // The aborted run's request outlives its future; the sweep is the
        // backstop that voids it.
        let past_deadline = Utc::now() + ChronoDuration::seconds(61);
        assert_eq!(requests.expire_overdue(past_deadline).await.unwrap(), 1);

        // The trip's dispatch slot came free with the abort, so a fresh
        // dispatch registers, offers and assigns.
        let mut offers = service.subscribe_offers();
        let responder = Arc::clone(&service);
        tokio::spawn(async move {
            while let Ok(offer) = offers.recv().await {
                let _ = responder.accept(offer.request_id, offer.driver_id).await;
            }
        });

        let outcome = service.dispatch(trip.id).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Assigned { driver_id: driver.id });
    }
}
