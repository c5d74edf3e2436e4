use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Offer outcomes. An offer mutates exactly once, `Pending` to `Accepted`
/// or `Pending` to `Rejected`, and is never deleted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OfferStatus {
    Pending,
    Accepted,
    Rejected,
}

/// One order offered to one driver. Keyed by (order_id, driver_id) in the
/// ledger; at most one offer per order ever reaches `Accepted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastOffer {
    pub order_id: Uuid,
    pub driver_id: Uuid,
    pub status: OfferStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BroadcastOffer {
    pub fn pending(order_id: Uuid, driver_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            order_id,
            driver_id,
            status: OfferStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}
