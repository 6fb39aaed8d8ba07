use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use uuid::Uuid;

use strada_shared::events::OfferCreatedEvent;
use strada_shared::{BookingRequest, DriverProfile, RequestStatus, Trip, TripStatus};

use crate::error::DispatchError;

/// Repository trait for trip data access.
///
/// Status changes go through the guarded operations so a trip can never be
/// mutated out from under a concurrent dispatch.
#[async_trait]
pub trait TripRepository: Send + Sync {
    async fn create(&self, trip: Trip) -> Result<(), DispatchError>;

    async fn get(&self, id: Uuid) -> Result<Option<Trip>, DispatchError>;

    /// Bind the winning driver. Valid only while the trip is still `Pending`;
    /// moves it to `Accepted`.
    async fn assign_driver(&self, trip_id: Uuid, driver_id: Uuid) -> Result<Trip, DispatchError>;

    /// Conditional status update: fails with a conflict unless the current
    /// status is one of `expected`.
    async fn set_status(
        &self,
        trip_id: Uuid,
        expected: &[TripStatus],
        next: TripStatus,
    ) -> Result<Trip, DispatchError>;

    /// One-shot pickup verification: checks the passcode, clears it, and
    /// moves the trip to `InProgress`.
    async fn start_ride(&self, trip_id: Uuid, passcode: &str) -> Result<Trip, DispatchError>;

    /// Note why a dispatch found no driver. The status is left untouched, so
    /// a pending trip stays available for a fresh dispatch.
    async fn record_dispatch_failure(
        &self,
        trip_id: Uuid,
        reason: &str,
    ) -> Result<Trip, DispatchError>;
}

/// Repository trait for booking-request data access.
///
/// Every transition is a conditional update gated on the request still being
/// `Pending` at the moment of the write. That gate is the single
/// serialization point of the dispatch subsystem: of a concurrent accept,
/// reject and expiry sweep, exactly one succeeds and the losers observe a
/// conflict. Requests are never deleted.
#[async_trait]
pub trait RequestRepository: Send + Sync {
    /// Persist a fresh pending request. Fails with a conflict if the trip
    /// already has a pending request (attempts are strictly sequential).
    async fn create(&self, request: BookingRequest) -> Result<BookingRequest, DispatchError>;

    async fn get(&self, id: Uuid) -> Result<Option<BookingRequest>, DispatchError>;

    /// Driver accepts. Valid only for the offered driver and while
    /// `now < expires_at`; otherwise a conflict.
    async fn accept(&self, request_id: Uuid, driver_id: Uuid)
        -> Result<BookingRequest, DispatchError>;

    /// Driver declines. Valid only for the offered driver.
    async fn reject(
        &self,
        request_id: Uuid,
        driver_id: Uuid,
        reason: &str,
    ) -> Result<BookingRequest, DispatchError>;

    /// Expire a single request. Conflict if it already reached a terminal
    /// state, which callers racing the sweep are expected to tolerate.
    async fn expire(&self, request_id: Uuid) -> Result<BookingRequest, DispatchError>;

    /// Expiry sweep: every pending request past its deadline becomes
    /// `Expired`. Idempotent; returns how many transitioned.
    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<usize, DispatchError>;

    /// Non-expired pending requests for one driver, oldest first.
    async fn list_pending_for_driver(
        &self,
        driver_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<BookingRequest>, DispatchError>;

    /// Audit trail: every request ever issued for the trip, in creation order.
    async fn list_for_trip(&self, trip_id: Uuid) -> Result<Vec<BookingRequest>, DispatchError>;

    /// Watch the request's status. The sender side publishes every terminal
    /// transition, so waiters wake without polling.
    async fn subscribe(
        &self,
        request_id: Uuid,
    ) -> Result<watch::Receiver<RequestStatus>, DispatchError>;
}

/// Driver directory query, pre-filtered to online + approved + active.
#[async_trait]
pub trait DriverDirectory: Send + Sync {
    async fn eligible_in_region(&self, region: &str) -> Result<Vec<DriverProfile>, DispatchError>;
}

/// Push channel for freshly created offers. Fire-and-forget: a failure here
/// must never abort a dispatch.
#[async_trait]
pub trait OfferNotifier: Send + Sync {
    async fn offer_created(&self, event: &OfferCreatedEvent) -> Result<(), DispatchError>;
}
