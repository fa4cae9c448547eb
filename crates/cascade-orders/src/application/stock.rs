//! Stock ledger: catalog prices, on-hand counts and per-order reservations.
//!
//! Reservations are all-or-nothing and keyed by order, which makes reserving
//! and releasing idempotent. Releasing an order that holds no reservation is
//! a no-op, so compensations may run before or without the forward step.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::domain::events::LineItem;

/// Stock for one catalog product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockItem {
    pub product_id: u64,
    pub name: String,
    pub price_cents: u64,
    pub on_hand: u32,
    pub reserved: u32,
    /// Low-stock alerts fire at or below this many available units.
    pub reorder_threshold: u32,
    pub reorder_quantity: u32,
}

impl StockItem {
    #[must_use]
    pub fn new(product_id: u64, name: impl Into<String>, price_cents: u64, on_hand: u32) -> Self {
        Self {
            product_id,
            name: name.into(),
            price_cents,
            on_hand,
            reserved: 0,
            reorder_threshold: 10,
            reorder_quantity: 50,
        }
    }

    #[must_use]
    pub fn with_reorder(mut self, threshold: u32, quantity: u32) -> Self {
        self.reorder_threshold = threshold;
        self.reorder_quantity = quantity;
        self
    }

    /// Units that are neither shipped nor reserved.
    #[must_use]
    pub fn available(&self) -> u32 {
        self.on_hand.saturating_sub(self.reserved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StockError {
    #[error("product {0} is not in the catalog")]
    UnknownProduct(u64),

    #[error("product {product_id} has {available} available, {requested} requested")]
    Insufficient {
        product_id: u64,
        available: u32,
        requested: u32,
    },
}

impl StockError {
    #[must_use]
    pub fn product_id(&self) -> u64 {
        match self {
            Self::UnknownProduct(product_id) | Self::Insufficient { product_id, .. } => *product_id,
        }
    }
}

#[derive(Debug, Default)]
struct Ledger {
    items: BTreeMap<u64, StockItem>,
    reservations: HashMap<Uuid, Vec<LineItem>>,
    pending_reorders: BTreeMap<u64, u32>,
}

#[derive(Debug, Default)]
pub struct StockLedger {
    ledger: Mutex<Ledger>,
}

impl StockLedger {
    #[must_use]
    pub fn new(items: impl IntoIterator<Item = StockItem>) -> Self {
        let ledger = Ledger {
            items: items.into_iter().map(|i| (i.product_id, i)).collect(),
            ..Ledger::default()
        };
        Self {
            ledger: Mutex::new(ledger),
        }
    }

    /// A small catalog with one healthy, one low and one empty product.
    #[must_use]
    pub fn demo() -> Self {
        Self::new([
            StockItem::new(1, "Widget", 2999, 100),
            StockItem::new(2, "Gadget", 1499, 8),
            StockItem::new(3, "Gizmo", 4999, 0).with_reorder(5, 25),
        ])
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn price_of(&self, product_id: u64) -> Option<u64> {
        self.ledger().items.get(&product_id).map(|i| i.price_cents)
    }

    #[must_use]
    pub fn get(&self, product_id: u64) -> Option<StockItem> {
        self.ledger().items.get(&product_id).cloned()
    }

    /// Every product, by id.
    #[must_use]
    pub fn items(&self) -> Vec<StockItem> {
        self.ledger().items.values().cloned().collect()
    }

    /// Reserves every line for `order_id`, or nothing. Reserving again for
    /// the same order returns the existing reservation.
    ///
    /// # Errors
    ///
    /// Returns the first line that cannot be satisfied.
    pub fn reserve(&self, order_id: Uuid, items: &[LineItem]) -> Result<Vec<LineItem>, StockError> {
        let mut ledger = self.ledger();
        if let Some(existing) = ledger.reservations.get(&order_id) {
            return Ok(existing.clone());
        }
        for line in items {
            let item = ledger
                .items
                .get(&line.product_id)
                .ok_or(StockError::UnknownProduct(line.product_id))?;
            if item.available() < line.quantity {
                return Err(StockError::Insufficient {
                    product_id: line.product_id,
                    available: item.available(),
                    requested: line.quantity,
                });
            }
        }
        for line in items {
            if let Some(item) = ledger.items.get_mut(&line.product_id) {
                item.reserved += line.quantity;
            }
        }
        ledger.reservations.insert(order_id, items.to_vec());
        Ok(items.to_vec())
    }

    /// Returns an order's reserved units to the shelf. `None` when the order
    /// holds no reservation.
    pub fn release(&self, order_id: Uuid) -> Option<Vec<LineItem>> {
        let mut ledger = self.ledger();
        let released = ledger.reservations.remove(&order_id)?;
        for line in &released {
            if let Some(item) = ledger.items.get_mut(&line.product_id) {
                item.reserved = item.reserved.saturating_sub(line.quantity);
            }
        }
        Some(released)
    }

    /// Converts an order's reservation into shipped units.
    pub fn commit(&self, order_id: Uuid) -> Option<Vec<LineItem>> {
        let mut ledger = self.ledger();
        let shipped = ledger.reservations.remove(&order_id)?;
        for line in &shipped {
            if let Some(item) = ledger.items.get_mut(&line.product_id) {
                item.reserved = item.reserved.saturating_sub(line.quantity);
                item.on_hand = item.on_hand.saturating_sub(line.quantity);
            }
        }
        Some(shipped)
    }

    #[must_use]
    pub fn is_reserved(&self, order_id: Uuid) -> bool {
        self.ledger().reservations.contains_key(&order_id)
    }

    /// Products with some stock left, but at or below their threshold.
    #[must_use]
    pub fn low_stock(&self) -> Vec<StockItem> {
        self.ledger()
            .items
            .values()
            .filter(|i| i.available() > 0 && i.available() <= i.reorder_threshold)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn out_of_stock(&self) -> Vec<StockItem> {
        self.ledger()
            .items
            .values()
            .filter(|i| i.available() == 0)
            .cloned()
            .collect()
    }

    /// Records a purchase order for `product_id`. Returns the quantity
    /// ordered, or `None` if one is already pending.
    pub fn request_reorder(&self, product_id: u64) -> Option<u32> {
        let mut ledger = self.ledger();
        let quantity = ledger.items.get(&product_id)?.reorder_quantity;
        if ledger.pending_reorders.contains_key(&product_id) {
            return None;
        }
        ledger.pending_reorders.insert(product_id, quantity);
        Some(quantity)
    }

    /// Books a delivery from the supplier and clears the pending reorder.
    pub fn restock(&self, product_id: u64, quantity: u32) {
        let mut ledger = self.ledger();
        ledger.pending_reorders.remove(&product_id);
        if let Some(item) = ledger.items.get_mut(&product_id) {
            item.on_hand += quantity;
        }
    }

    #[must_use]
    pub fn pending_reorders(&self) -> Vec<(u64, u32)> {
        self.ledger()
            .pending_reorders
            .iter()
            .map(|(p, q)| (*p, *q))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(product_id: u64, quantity: u32) -> LineItem {
        LineItem {
            product_id,
            quantity,
        }
    }

    #[test]
    fn test_reserve_is_all_or_nothing() {
        // Arrange
        let ledger = StockLedger::demo();
        let order_id = Uuid::new_v4();

        // Act
        let result = ledger.reserve(order_id, &[line(1, 5), line(2, 9)]);

        // Assert
        assert_eq!(
            result,
            Err(StockError::Insufficient {
                product_id: 2,
                available: 8,
                requested: 9
            })
        );
        assert_eq!(ledger.get(1).unwrap().reserved, 0);
        assert!(!ledger.is_reserved(order_id));
    }

    #[test]
    fn test_reserve_twice_for_same_order_reserves_once() {
        let ledger = StockLedger::demo();
        let order_id = Uuid::new_v4();

        ledger.reserve(order_id, &[line(1, 5)]).unwrap();
        ledger.reserve(order_id, &[line(1, 5)]).unwrap();

        assert_eq!(ledger.get(1).unwrap().available(), 95);
    }

    #[test]
    fn test_release_without_reservation_is_noop() {
        let ledger = StockLedger::demo();

        assert_eq!(ledger.release(Uuid::new_v4()), None);
        assert_eq!(ledger.get(1).unwrap().available(), 100);
    }

    #[test]
    fn test_release_returns_units_and_is_idempotent() {
        let ledger = StockLedger::demo();
        let order_id = Uuid::new_v4();
        ledger.reserve(order_id, &[line(2, 3)]).unwrap();

        let first = ledger.release(order_id);
        let second = ledger.release(order_id);

        assert_eq!(first, Some(vec![line(2, 3)]));
        assert_eq!(second, None);
        assert_eq!(ledger.get(2).unwrap().available(), 8);
    }

    #[test]
    fn test_commit_reduces_on_hand() {
        let ledger = StockLedger::demo();
        let order_id = Uuid::new_v4();
        ledger.reserve(order_id, &[line(1, 4)]).unwrap();

        ledger.commit(order_id);

        let item = ledger.get(1).unwrap();
        assert_eq!((item.on_hand, item.reserved), (96, 0));
    }

    #[test]
    fn test_low_and_out_of_stock_reports() {
        let ledger = StockLedger::demo();

        let low: Vec<u64> = ledger.low_stock().iter().map(|i| i.product_id).collect();
        let out: Vec<u64> = ledger.out_of_stock().iter().map(|i| i.product_id).collect();

        assert_eq!(low, vec![2]);
        assert_eq!(out, vec![3]);
    }

    #[test]
    fn test_reorder_is_requested_once_until_restocked() {
        let ledger = StockLedger::demo();

        assert_eq!(ledger.request_reorder(3), Some(25));
        assert_eq!(ledger.request_reorder(3), None);
        ledger.restock(3, 25);

        assert!(ledger.pending_reorders().is_empty());
        assert_eq!(ledger.get(3).unwrap().available(), 25);
    }
}
