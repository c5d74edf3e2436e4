//! Legal order state transitions.
//!
//! ```text
//! Pending ──► Assigned ──► PickedUp ──► InTransit ──► Delivered (terminal)
//!    │            │            │             │
//!    └────────────┴────────────┴─────────────┴──────► Cancelled (terminal)
//! ```
//!
//! `Pending → Assigned` happens only through the acceptance resolver's
//! compare-and-set; it is never a valid driver status update. The canonical
//! forward path requires `PickedUp` before `InTransit`.

use crate::models::order::OrderStatus;

/// Whether `from → to` is a legal transition for a driver- or
/// operator-issued status update.
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;

    match (from, to) {
        // Cancellation is reachable from any non-terminal state.
        (Pending | Assigned | PickedUp | InTransit, Cancelled) => true,
        (Assigned, PickedUp) => true,
        (PickedUp, InTransit) => true,
        (InTransit, Delivered) => true,
        _ => false,
    }
}
