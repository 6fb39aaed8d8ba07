pub mod error;
pub mod repository;

pub use error::DispatchError;
pub use repository::{DriverDirectory, OfferNotifier, RequestRepository, TripRepository};
