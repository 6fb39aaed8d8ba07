//! Logical store implementations and engine configuration.
//!
//! The repositories here are in-memory but carry the full transition
//! contract: every booking-request write is a conditional update gated on
//! the request still being pending, taken under one lock. Swapping in a
//! database later means re-implementing the traits in `strada-core`, not
//! changing callers.

pub mod app_config;
pub mod driver_repo;
pub mod request_repo;
pub mod sweep;
pub mod trip_repo;

pub use app_config::{AppConfig, DispatchConfig};
pub use driver_repo::InMemoryDriverDirectory;
pub use request_repo::InMemoryRequestRepository;
pub use sweep::{ExpirySweeper, SweepHandle};
pub use trip_repo::InMemoryTripRepository;
