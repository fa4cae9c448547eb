//! Payment gateway port and its simulated adapter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cascade_core::rng::DeterministicRng;
use uuid::Uuid;

/// Why a charge or refund did not go through.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentError {
    /// The issuer declined. Not retried.
    #[error("payment declined: {0}")]
    Declined(String),

    /// The gateway could not be reached.
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),
}

/// Port to an external payment processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charges `amount_cents` for `order_id` and returns the payment id.
    async fn charge(&self, order_id: Uuid, amount_cents: u64) -> Result<String, PaymentError>;

    /// Refunds a captured payment and returns the refund id.
    async fn refund(&self, payment_id: &str, amount_cents: u64) -> Result<String, PaymentError>;
}

/// Gateway that approves a configurable share of charges.
///
/// A charge is approved when the next draw from the RNG is below
/// `approval_rate`. Refunds always succeed.
pub struct SimulatedPaymentGateway {
    rng: Mutex<Box<dyn DeterministicRng>>,
    approval_rate: f64,
    latency: Duration,
    sequence: AtomicU64,
}

impl std::fmt::Debug for SimulatedPaymentGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedPaymentGateway")
            .field("approval_rate", &self.approval_rate)
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

impl SimulatedPaymentGateway {
    #[must_use]
    pub fn new(rng: Box<dyn DeterministicRng>, approval_rate: f64) -> Self {
        Self {
            rng: Mutex::new(rng),
            approval_rate: approval_rate.clamp(0.0, 1.0),
            latency: Duration::ZERO,
            sequence: AtomicU64::new(0),
        }
    }

    /// Delay applied to every call, to mimic a network round trip.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn next_id(&self, prefix: &str, order_ref: &str) -> String {
        let n = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}_{order_ref}_{n:06}")
    }

    async fn round_trip(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl PaymentGateway for SimulatedPaymentGateway {
    async fn charge(&self, order_id: Uuid, _amount_cents: u64) -> Result<String, PaymentError> {
        self.round_trip().await;
        let draw = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_f64();
        if draw < self.approval_rate {
            Ok(self.next_id("pay", &order_id.simple().to_string()[..8]))
        } else {
            Err(PaymentError::Declined("insufficient funds".into()))
        }
    }

    async fn refund(&self, payment_id: &str, _amount_cents: u64) -> Result<String, PaymentError> {
        self.round_trip().await;
        let order_ref = payment_id.split('_').nth(1).unwrap_or("unknown");
        Ok(self.next_id("ref", order_ref))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_test_support::SequenceRng;

    #[tokio::test]
    async fn test_charge_approves_below_rate() {
        // Arrange
        let gateway =
            SimulatedPaymentGateway::new(Box::new(SequenceRng::floats(vec![0.2, 0.95])), 0.9);
        let order_id = Uuid::new_v4();

        // Act
        let approved = gateway.charge(order_id, 2999).await;
        let declined = gateway.charge(order_id, 2999).await;

        // Assert
        assert!(approved.unwrap().starts_with("pay_"));
        assert_eq!(declined, Err(PaymentError::Declined("insufficient funds".into())));
    }

    #[tokio::test]
    async fn test_refund_reuses_order_reference() {
        let gateway = SimulatedPaymentGateway::new(Box::new(SequenceRng::floats(vec![0.0])), 1.0);
        let payment_id = gateway.charge(Uuid::new_v4(), 100).await.unwrap();

        let refund_id = gateway.refund(&payment_id, 100).await.unwrap();

        assert_eq!(refund_id.split('_').nth(1), payment_id.split('_').nth(1));
        assert!(refund_id.starts_with("ref_"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_delays_the_call() {
        let gateway = SimulatedPaymentGateway::new(Box::new(SequenceRng::floats(vec![0.0])), 1.0)
            .with_latency(Duration::from_millis(250));
        let started = tokio::time::Instant::now();

        gateway.charge(Uuid::new_v4(), 100).await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(250));
    }
}
