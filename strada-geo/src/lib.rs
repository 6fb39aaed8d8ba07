//! Geographic candidate selection: haversine distance and the ordered
//! driver query feeding the dispatch loop.

pub mod distance;
pub mod index;

pub use distance::haversine_km;
pub use index::GeoDriverIndex;
