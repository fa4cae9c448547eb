//! In-memory order store.
//!
//! Handlers that read an order, await an external call, then write it back
//! hold the order's lock for the whole sequence. That is what lets a
//! cancellation and a concurrent payment observe each other.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use cascade_core::error::HandlerError;
use cascade_dispatch::KeyedLocks;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderStatus};

#[derive(Debug, Default)]
pub struct OrderStore {
    orders: RwLock<HashMap<Uuid, Order>>,
    locks: KeyedLocks<Uuid>,
}

impl OrderStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the per-order lock.
    pub async fn lock(&self, order_id: Uuid) -> OwnedMutexGuard<()> {
        self.locks.lock(&order_id).await
    }

    pub fn insert(&self, order: Order) {
        self.orders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(order.id, order);
    }

    #[must_use]
    pub fn get(&self, order_id: Uuid) -> Option<Order> {
        self.orders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&order_id)
            .cloned()
    }

    /// Loads an order or fails with `NotFound`.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::NotFound` if the order does not exist.
    pub fn require(&self, order_id: Uuid) -> Result<Order, HandlerError> {
        self.get(order_id)
            .ok_or_else(|| HandlerError::NotFound(format!("order {order_id}")))
    }

    /// Applies `f` to the stored order and returns its result.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::NotFound` if the order does not exist.
    pub fn update<R>(
        &self,
        order_id: Uuid,
        f: impl FnOnce(&mut Order) -> R,
    ) -> Result<R, HandlerError> {
        let mut orders = self.orders.write().unwrap_or_else(PoisonError::into_inner);
        let order = orders
            .get_mut(&order_id)
            .ok_or_else(|| HandlerError::NotFound(format!("order {order_id}")))?;
        Ok(f(order))
    }

    /// Orders oldest first, optionally filtered by status.
    #[must_use]
    pub fn list(&self, status: Option<OrderStatus>) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|o| status.is_none_or(|s| o.status() == s))
            .cloned()
            .collect();
        orders.sort_by_key(|o| (o.created_at, o.id));
        orders
    }

    /// Ids of the orders matching `predicate`, oldest first.
    #[must_use]
    pub fn ids_where(&self, predicate: impl Fn(&Order) -> bool) -> Vec<Uuid> {
        let mut matching: Vec<(chrono::DateTime<chrono::Utc>, Uuid)> = self
            .orders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|o| predicate(o))
            .map(|o| (o.created_at, o.id))
            .collect();
        matching.sort();
        matching.into_iter().map(|(_, id)| id).collect()
    }
}
