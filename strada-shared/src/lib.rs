pub mod events;
pub mod models;

pub use models::{
    BookingRequest, Coordinates, DispatchOutcome, DriverCandidate, DriverProfile, ExhaustReason,
    PendingOffer, RequestStatus, Trip, TripStatus,
};
