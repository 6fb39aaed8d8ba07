use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use strada_core::{DispatchError, DriverDirectory};
use strada_shared::{Coordinates, DriverProfile};

/// In-memory driver directory.
///
/// Holds the last reported state per driver; `eligible_in_region` applies
/// the online + approved + active pre-filter the dispatch contract expects.
#[derive(Default)]
pub struct InMemoryDriverDirectory {
    inner: Mutex<HashMap<Uuid, DriverProfile>>,
}

impl InMemoryDriverDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, profile: DriverProfile) -> Result<(), DispatchError> {
        self.lock()?.insert(profile.id, profile);
        Ok(())
    }

    pub fn set_online(&self, driver_id: Uuid, online: bool) -> Result<(), DispatchError> {
        let mut map = self.lock()?;
        let profile = map
            .get_mut(&driver_id)
            .ok_or_else(|| DispatchError::not_found(format!("driver {driver_id}")))?;
        profile.online = online;
        Ok(())
    }

    pub fn report_location(
        &self,
        driver_id: Uuid,
        location: Coordinates,
    ) -> Result<(), DispatchError> {
        let mut map = self.lock()?;
        let profile = map
            .get_mut(&driver_id)
            .ok_or_else(|| DispatchError::not_found(format!("driver {driver_id}")))?;
        profile.location = location;
        Ok(())
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, DriverProfile>>, DispatchError> {
        self.inner
            .lock()
            .map_err(|_| DispatchError::Store("driver directory lock poisoned".into()))
    }
}

#[async_trait]
impl DriverDirectory for InMemoryDriverDirectory {
    async fn eligible_in_region(&self, region: &str) -> Result<Vec<DriverProfile>, DispatchError> {
        let map = self.lock()?;
        Ok(map
            .values()
            .filter(|d| d.region == region && d.is_eligible())
            .cloned()
            .collect())
    }
}
