//! redb-backed durable store for orders and the broadcast offer ledger.
//!
//! # Tables
//!
//! | Table | Key | Value |
//! |-------|-----|-------|
//! | `orders` | `order_id` | JSON-serialized `DeliveryOrder` |
//! | `offers` | `(order_id, driver_id)` | JSON-serialized `BroadcastOffer` |
//!
//! Every mutating operation runs inside a single write transaction. redb
//! serializes write transactions, so the conditional assignment in
//! [`OrderStore::try_assign`] is a true compare-and-set: the driver-unset
//! check and the binding write commit atomically, and no partial state is
//! ever observable after a crash mid-call.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use thiserror::Error;
use uuid::Uuid;

use crate::models::offer::{BroadcastOffer, OfferStatus};
use crate::models::order::{DeliveryOrder, OrderStatus};

const ORDERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("orders");
const OFFERS_TABLE: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("offers");

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Outcome of the compare-and-set assignment attempt.
#[derive(Debug)]
pub enum AssignOutcome {
    /// The caller's driver was bound to the order in this transaction.
    Won(DeliveryOrder),
    /// The order was already bound to the caller (idempotent retry).
    AlreadyOwned(DeliveryOrder),
    /// Another driver won the race.
    Lost,
    /// The order does not exist or is terminal.
    Unavailable,
}

#[derive(Debug)]
pub enum StatusOutcome {
    Updated(DeliveryOrder),
    /// Caller is not the order's bound driver.
    Forbidden,
    /// Requested state is not a legal successor of the current state.
    Invalid { from: OrderStatus },
    NotFound,
}

/// Durable order + offer store backed by redb.
#[derive(Clone)]
pub struct OrderStore {
    db: Arc<Database>,
}

impl OrderStore {
    /// Open or create the database at the given path. Commits are durable
    /// as soon as they return; the file is always in a consistent state
    /// after an unclean shutdown.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ORDERS_TABLE)?;
            let _ = write_txn.open_table(OFFERS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    // ========== Orders ==========

    pub fn insert_order(&self, order: &DeliveryOrder) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ORDERS_TABLE)?;
            let bytes = serde_json::to_vec(order)?;
            table.insert(order.id.to_string().as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_order(&self, order_id: Uuid) -> StorageResult<Option<DeliveryOrder>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;
        let Some(guard) = table.get(order_id.to_string().as_str())? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(guard.value())?))
    }

    /// Unclaimed orders (pending, no driver bound), for the direct-claim
    /// pool. Includes orders with outstanding offers.
    pub fn list_unclaimed(&self) -> StorageResult<Vec<DeliveryOrder>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;

        let mut orders = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let order: DeliveryOrder = serde_json::from_slice(value.value())?;
            if order.is_unclaimed() {
                orders.push(order);
            }
        }
        orders.sort_by_key(|order| order.created_at);
        Ok(orders)
    }

    /// Conditionally bind `driver_id` to an unclaimed order and mark (or
    /// synthesize, for direct claims) the driver's offer as accepted, all in
    /// one transaction. The condition is evaluated against the stored row
    /// inside the write transaction, never from a prior read.
    pub fn try_assign(&self, order_id: Uuid, driver_id: Uuid) -> StorageResult<AssignOutcome> {
        let order_key = order_id.to_string();
        let driver_key = driver_id.to_string();

        let txn = self.db.begin_write()?;
        let outcome = {
            let mut orders = txn.open_table(ORDERS_TABLE)?;
            let current: Option<DeliveryOrder> = match orders.get(order_key.as_str())? {
                Some(guard) => Some(serde_json::from_slice(guard.value())?),
                None => None,
            };

            match current {
                None => AssignOutcome::Unavailable,
                Some(order) if order.driver_id == Some(driver_id) => {
                    AssignOutcome::AlreadyOwned(order)
                }
                Some(order) if order.status.is_terminal() => AssignOutcome::Unavailable,
                Some(order) if order.driver_id.is_some() => AssignOutcome::Lost,
                Some(mut order) => {
                    order.driver_id = Some(driver_id);
                    order.status = OrderStatus::Assigned;
                    order.updated_at = Utc::now();

                    let bytes = serde_json::to_vec(&order)?;
                    orders.insert(order_key.as_str(), bytes.as_slice())?;

                    let mut offers = txn.open_table(OFFERS_TABLE)?;
                    let mut offer = match offers.get((order_key.as_str(), driver_key.as_str()))? {
                        Some(guard) => serde_json::from_slice(guard.value())?,
                        None => BroadcastOffer::pending(order_id, driver_id),
                    };
                    offer.status = OfferStatus::Accepted;
                    offer.updated_at = order.updated_at;
                    let offer_bytes = serde_json::to_vec(&offer)?;
                    offers.insert((order_key.as_str(), driver_key.as_str()), offer_bytes.as_slice())?;

                    AssignOutcome::Won(order)
                }
            }
        };
        txn.commit()?;
        Ok(outcome)
    }

    /// Driver-issued lifecycle transition, validated against the bound
    /// driver and the legal-transition table inside the transaction.
    pub fn update_status(
        &self,
        order_id: Uuid,
        driver_id: Uuid,
        new_status: OrderStatus,
    ) -> StorageResult<StatusOutcome> {
        let order_key = order_id.to_string();

        let txn = self.db.begin_write()?;
        let outcome = {
            let mut orders = txn.open_table(ORDERS_TABLE)?;
            let current: Option<DeliveryOrder> = match orders.get(order_key.as_str())? {
                Some(guard) => Some(serde_json::from_slice(guard.value())?),
                None => None,
            };

            match current {
                None => StatusOutcome::NotFound,
                Some(order) if order.driver_id != Some(driver_id) => StatusOutcome::Forbidden,
                Some(order)
                    if !crate::engine::lifecycle::is_valid_transition(order.status, new_status) =>
                {
                    StatusOutcome::Invalid { from: order.status }
                }
                Some(mut order) => {
                    order.status = new_status;
                    if new_status == OrderStatus::Cancelled {
                        // A driver is bound iff the order is assigned or
                        // further along the forward path.
                        order.driver_id = None;
                    }
                    order.updated_at = Utc::now();
                    let bytes = serde_json::to_vec(&order)?;
                    orders.insert(order_key.as_str(), bytes.as_slice())?;
                    StatusOutcome::Updated(order)
                }
            }
        };
        txn.commit()?;
        Ok(outcome)
    }

    /// Operator-initiated cancellation: no driver check, legal from any
    /// non-terminal state, drops the driver binding.
    pub fn cancel_order(&self, order_id: Uuid) -> StorageResult<StatusOutcome> {
        let order_key = order_id.to_string();

        let txn = self.db.begin_write()?;
        let outcome = {
            let mut orders = txn.open_table(ORDERS_TABLE)?;
            let current: Option<DeliveryOrder> = match orders.get(order_key.as_str())? {
                Some(guard) => Some(serde_json::from_slice(guard.value())?),
                None => None,
            };

            match current {
                None => StatusOutcome::NotFound,
                Some(order) if order.status.is_terminal() => {
                    StatusOutcome::Invalid { from: order.status }
                }
                Some(mut order) => {
                    order.status = OrderStatus::Cancelled;
                    order.driver_id = None;
                    order.updated_at = Utc::now();
                    let bytes = serde_json::to_vec(&order)?;
                    orders.insert(order_key.as_str(), bytes.as_slice())?;
                    StatusOutcome::Updated(order)
                }
            }
        };
        txn.commit()?;
        Ok(outcome)
    }

    // ========== Offer ledger ==========

    /// Create pending offers for the given drivers, skipping (order_id,
    /// driver_id) keys that already exist. Returns the number created.
    pub fn upsert_offers(&self, order_id: Uuid, driver_ids: &[Uuid]) -> StorageResult<usize> {
        let order_key = order_id.to_string();
        let mut created = 0;

        let txn = self.db.begin_write()?;
        {
            let mut offers = txn.open_table(OFFERS_TABLE)?;
            for driver_id in driver_ids {
                let driver_key = driver_id.to_string();
                if offers.get((order_key.as_str(), driver_key.as_str()))?.is_some() {
                    continue;
                }
                let offer = BroadcastOffer::pending(order_id, *driver_id);
                let bytes = serde_json::to_vec(&offer)?;
                offers.insert((order_key.as_str(), driver_key.as_str()), bytes.as_slice())?;
                created += 1;
            }
        }
        txn.commit()?;
        Ok(created)
    }

    /// Pending offers extended to one driver, oldest first.
    pub fn pending_offers_for(&self, driver_id: Uuid) -> StorageResult<Vec<BroadcastOffer>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(OFFERS_TABLE)?;

        let mut pending = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let offer: BroadcastOffer = serde_json::from_slice(value.value())?;
            if offer.driver_id == driver_id && offer.status == OfferStatus::Pending {
                pending.push(offer);
            }
        }
        pending.sort_by_key(|offer| offer.created_at);
        Ok(pending)
    }

    pub fn offers_for_order(&self, order_id: Uuid) -> StorageResult<Vec<BroadcastOffer>> {
        let order_key = order_id.to_string();
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(OFFERS_TABLE)?;

        let mut offers = Vec::new();
        for entry in table.range((order_key.as_str(), "")..=(order_key.as_str(), "\u{10ffff}"))? {
            let (_, value) = entry?;
            offers.push(serde_json::from_slice(value.value())?);
        }
        Ok(offers)
    }

    /// Flip one pending offer to rejected. Returns false (no-op) when the
    /// offer is missing or already resolved; never touches the order.
    pub fn reject_offer(&self, order_id: Uuid, driver_id: Uuid) -> StorageResult<bool> {
        let order_key = order_id.to_string();
        let driver_key = driver_id.to_string();

        let txn = self.db.begin_write()?;
        let rejected = {
            let mut offers = txn.open_table(OFFERS_TABLE)?;
            let current: Option<BroadcastOffer> =
                match offers.get((order_key.as_str(), driver_key.as_str()))? {
                    Some(guard) => Some(serde_json::from_slice(guard.value())?),
                    None => None,
                };

            match current {
                Some(mut offer) if offer.status == OfferStatus::Pending => {
                    offer.status = OfferStatus::Rejected;
                    offer.updated_at = Utc::now();
                    let bytes = serde_json::to_vec(&offer)?;
                    offers.insert((order_key.as_str(), driver_key.as_str()), bytes.as_slice())?;
                    true
                }
                _ => false,
            }
        };
        txn.commit()?;
        Ok(rejected)
    }

    /// Reject every pending offer for the order except the winner's.
    /// Advisory cleanup after an assignment commits; correctness never
    /// depends on it. Returns the number rejected.
    pub fn reject_losing_offers(&self, order_id: Uuid, winner: Uuid) -> StorageResult<usize> {
        let order_key = order_id.to_string();
        let now = Utc::now();
        let mut rejected = 0;

        let txn = self.db.begin_write()?;
        {
            let mut offers = txn.open_table(OFFERS_TABLE)?;

            let mut losers: Vec<(String, BroadcastOffer)> = Vec::new();
            for entry in
                offers.range((order_key.as_str(), "")..=(order_key.as_str(), "\u{10ffff}"))?
            {
                let (key, value) = entry?;
                let offer: BroadcastOffer = serde_json::from_slice(value.value())?;
                if offer.status == OfferStatus::Pending && offer.driver_id != winner {
                    losers.push((key.value().1.to_string(), offer));
                }
            }

            for (driver_key, mut offer) in losers {
                offer.status = OfferStatus::Rejected;
                offer.updated_at = now;
                let bytes = serde_json::to_vec(&offer)?;
                offers.insert((order_key.as_str(), driver_key.as_str()), bytes.as_slice())?;
                rejected += 1;
            }
        }
        txn.commit()?;
        Ok(rejected)
    }
}
