use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::Coordinates;

/// Published on booking-request creation so online drivers get a push.
/// Best effort; drivers can always poll their pending offers instead.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OfferCreatedEvent {
    pub request_id: Uuid,
    pub trip_id: Uuid,
    pub driver_id: Uuid,
    pub pickup: Coordinates,
    pub estimated_fare: i64,
    pub expires_at: DateTime<Utc>,
}
