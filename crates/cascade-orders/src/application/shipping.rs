//! Simulated carrier.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A booked shipment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shipment {
    pub shipping_id: String,
    pub tracking_number: String,
    pub estimated_delivery: DateTime<Utc>,
}

/// Books shipments and reports delivery.
#[derive(Debug)]
pub struct ShippingService {
    transit_time: chrono::Duration,
    next_tracking: AtomicU64,
}

impl Default for ShippingService {
    fn default() -> Self {
        Self::new(chrono::Duration::days(3))
    }
}

impl ShippingService {
    #[must_use]
    pub fn new(transit_time: chrono::Duration) -> Self {
        Self {
            transit_time,
            next_tracking: AtomicU64::new(1),
        }
    }

    /// Books a shipment leaving at `now`.
    pub fn book(&self, order_id: Uuid, now: DateTime<Utc>) -> Shipment {
        let n = self.next_tracking.fetch_add(1, Ordering::Relaxed);
        Shipment {
            shipping_id: format!("ship_{}", order_id.simple()),
            tracking_number: format!("TRACK{n:06}"),
            estimated_delivery: now + self.transit_time,
        }
    }
}
