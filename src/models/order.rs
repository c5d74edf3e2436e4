use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::GeoPoint;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Priority {
    Normal,
    High,
    Urgent,
}

/// Order lifecycle states.
///
/// `Pending` means unclaimed; an order may have outstanding broadcast offers
/// while still `Pending` ("broadcasted" is a view over the offer ledger, not
/// a stored state). `Delivered` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Assigned,
    PickedUp,
    InTransit,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryOrder {
    pub id: Uuid,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub total: Decimal,
    pub priority: Priority,
    pub status: OrderStatus,
    pub driver_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryOrder {
    /// Unclaimed orders are discoverable through the pending pool and are
    /// eligible for broadcast and direct claim.
    pub fn is_unclaimed(&self) -> bool {
        self.status == OrderStatus::Pending && self.driver_id.is_none()
    }
}
