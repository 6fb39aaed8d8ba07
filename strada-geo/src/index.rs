use std::sync::Arc;

use tracing::debug;

use strada_core::{DispatchError, DriverDirectory};
use strada_shared::{Coordinates, DriverCandidate};

use crate::distance::haversine_km;

/// Ordered candidate queries over the driver directory.
///
/// Pure query layer: no side effects, no persistence. Eligibility filtering
/// (online, approved, active) is the directory's contract; this index adds
/// the distance cut and the ordering.
pub struct GeoDriverIndex {
    directory: Arc<dyn DriverDirectory>,
}

impl GeoDriverIndex {
    pub fn new(directory: Arc<dyn DriverDirectory>) -> Self {
        Self { directory }
    }

    /// Eligible drivers within `radius_km` of `pickup`, ascending by
    /// great-circle distance. Equal distances fall back to driver id so the
    /// order stays deterministic. Empty when nobody qualifies.
    pub async fn nearest_available(
        &self,
        pickup: Coordinates,
        region: &str,
        radius_km: f64,
    ) -> Result<Vec<DriverCandidate>, DispatchError> {
        let drivers = self.directory.eligible_in_region(region).await?;

        let mut candidates: Vec<DriverCandidate> = drivers
            .into_iter()
            .map(|driver| DriverCandidate {
                distance_km: haversine_km(pickup, driver.location),
                driver_id: driver.id,
                rating: driver.rating,
            })
            .filter(|candidate| candidate.distance_km <= radius_km)
            .collect();

        candidates.sort_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then_with(|| a.driver_id.cmp(&b.driver_id))
        });

        debug!(
            region,
            radius_km,
            candidates = candidates.len(),
            "candidate query"
        );
        Ok(candidates)
    }
}
