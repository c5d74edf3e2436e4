use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Soft per-driver presence state. Advisory location only feeds candidate
/// selection; it never affects assignment correctness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverAvailability {
    pub driver_id: Uuid,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
    pub location: Option<GeoPoint>,
}

impl DriverAvailability {
    pub fn online_now(driver_id: Uuid, location: Option<GeoPoint>) -> Self {
        Self {
            driver_id,
            online: true,
            last_seen: Utc::now(),
            location,
        }
    }
}
