use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// WGS84 point. Region-scale distances, so spherical math applies downstream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Trip status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Pending,
    Accepted,
    WaitingForPickup,
    InProgress,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TripStatus::Completed | TripStatus::Cancelled)
    }
}

/// A ride request. Created once, never deleted; only the status moves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub id: Uuid,
    pub rider_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub status: TripStatus,
    pub pickup: Coordinates,
    pub destination: Coordinates,
    pub region: String,
    /// Fare estimate in minor currency units.
    pub estimated_fare: i64,
    pub currency: String,
    /// One-time pickup code; cleared after successful verification.
    pub passcode: Option<String>,
    /// Why the most recent dispatch found no driver; cleared on assignment.
    pub last_dispatch_failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trip {
    pub fn new(
        rider_id: Uuid,
        pickup: Coordinates,
        destination: Coordinates,
        region: String,
        estimated_fare: i64,
        currency: String,
        passcode: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            rider_id,
            driver_id: None,
            status: TripStatus::Pending,
            pickup,
            destination,
            region,
            estimated_fare,
            currency,
            passcode: Some(passcode),
            last_dispatch_failure: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Booking request status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

impl RequestStatus {
    /// Pending is the only non-terminal state; everything else is absorbing.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

/// A time-bounded offer of one trip to one driver.
///
/// Requests are retained after resolution as an audit trail of the dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub driver_id: Uuid,
    pub status: RequestStatus,
    pub rejection_reason: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
}

impl BookingRequest {
    pub fn new(trip_id: Uuid, driver_id: Uuid, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            trip_id,
            driver_id,
            status: RequestStatus::Pending,
            rejection_reason: None,
            expires_at: now + ttl,
            created_at: now,
            accepted_at: None,
            rejected_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Driver record as reported by the driver directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverProfile {
    pub id: Uuid,
    pub name: String,
    pub rating: f64,
    pub online: bool,
    pub approved: bool,
    pub active: bool,
    pub location: Coordinates,
    pub region: String,
}

impl DriverProfile {
    /// Eligible for dispatch: online, verification-approved, account active.
    pub fn is_eligible(&self) -> bool {
        self.online && self.approved && self.active
    }
}

/// One dispatch candidate. Transient; produced per dispatch call and discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverCandidate {
    pub driver_id: Uuid,
    pub distance_km: f64,
    pub rating: f64,
}

/// Pending offer as shown to a polling driver, with enough trip context to decide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOffer {
    pub request_id: Uuid,
    pub trip_id: Uuid,
    pub pickup: Coordinates,
    pub destination: Coordinates,
    pub estimated_fare: i64,
    pub currency: String,
    pub expires_at: DateTime<Utc>,
}

/// Business outcome of a dispatch run. "No driver found" is a result, not a fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Assigned { driver_id: Uuid },
    Exhausted { reason: ExhaustReason },
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustReason {
    NoDriversInArea,
    NoDriverAccepted,
}

impl ExhaustReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExhaustReason::NoDriversInArea => "no_drivers_in_area",
            ExhaustReason::NoDriverAccepted => "no_driver_accepted",
        }
    }
}
