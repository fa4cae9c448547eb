//! Shared state handed to every order handler.

use std::sync::Arc;

use cascade_core::clock::Clock;
use cascade_core::rng::DeterministicRng;
use cascade_dispatch::ConfigError;

use super::connections::ConnectionRegistry;
use super::notifier::Outbox;
use super::payment::{PaymentGateway, SimulatedPaymentGateway};
use super::shipping::ShippingService;
use super::stock::StockLedger;
use super::store::OrderStore;

pub const ORDER_TTL_VAR: &str = "CASCADE_ORDER_TTL_SECS";
pub const APPROVAL_RATE_VAR: &str = "CASCADE_PAYMENT_APPROVAL_RATE";

/// Tunables of the order context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderSettings {
    /// How long an unpaid order lives before it expires.
    pub order_ttl: chrono::Duration,
    /// Share of charges the simulated gateway approves, in `[0, 1]`.
    pub approval_rate: f64,
}

impl Default for OrderSettings {
    fn default() -> Self {
        Self {
            order_ttl: chrono::Duration::minutes(15),
            approval_rate: 0.9,
        }
    }
}

impl OrderSettings {
    /// Loads from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a variable is set but unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a value is set but unusable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        if let Some(raw) = lookup(ORDER_TTL_VAR) {
            let secs: i64 = raw
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| invalid(ORDER_TTL_VAR, &raw, e.to_string()))?;
            if secs < 1 {
                return Err(invalid(ORDER_TTL_VAR, &raw, "must be at least 1".into()));
            }
            settings.order_ttl = chrono::Duration::seconds(secs);
        }
        if let Some(raw) = lookup(APPROVAL_RATE_VAR) {
            let rate: f64 = raw
                .trim()
                .parse()
                .map_err(|e: std::num::ParseFloatError| {
                    invalid(APPROVAL_RATE_VAR, &raw, e.to_string())
                })?;
            if !(0.0..=1.0).contains(&rate) {
                return Err(invalid(APPROVAL_RATE_VAR, &raw, "must be between 0 and 1".into()));
            }
            settings.approval_rate = rate;
        }
        Ok(settings)
    }
}

fn invalid(key: &str, value: &str, reason: String) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_owned(),
        value: value.to_owned(),
        reason,
    }
}

/// Stores and external-system adapters used by the order handlers.
#[derive(Clone)]
pub struct OrderServices {
    pub clock: Arc<dyn Clock>,
    pub settings: OrderSettings,
    pub orders: Arc<OrderStore>,
    pub stock: Arc<StockLedger>,
    pub payments: Arc<dyn PaymentGateway>,
    pub shipping: Arc<ShippingService>,
    pub outbox: Arc<Outbox>,
    pub connections: Arc<ConnectionRegistry>,
}

impl std::fmt::Debug for OrderServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderServices")
            .field("settings", &self.settings)
            .field("orders", &self.orders)
            .field("stock", &self.stock)
            .finish_non_exhaustive()
    }
}

impl OrderServices {
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        settings: OrderSettings,
        stock: StockLedger,
        payments: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            clock,
            settings,
            orders: Arc::new(OrderStore::new()),
            stock: Arc::new(stock),
            payments,
            shipping: Arc::new(ShippingService::default()),
            outbox: Arc::new(Outbox::new()),
            connections: Arc::new(ConnectionRegistry::new()),
        }
    }

    /// Demo catalog and a simulated gateway drawing from `rng`.
    #[must_use]
    pub fn simulated(
        clock: Arc<dyn Clock>,
        settings: OrderSettings,
        rng: Box<dyn DeterministicRng>,
    ) -> Self {
        let gateway = SimulatedPaymentGateway::new(rng, settings.approval_rate);
        Self::new(clock, settings, StockLedger::demo(), Arc::new(gateway))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_settings_default_without_variables() {
        let settings = OrderSettings::from_lookup(lookup(&[])).unwrap();

        assert_eq!(settings, OrderSettings::default());
    }

    #[test]
    fn test_settings_read_variables() {
        let settings =
            OrderSettings::from_lookup(lookup(&[(ORDER_TTL_VAR, "60"), (APPROVAL_RATE_VAR, "0.5")]))
                .unwrap();

        assert_eq!(settings.order_ttl, chrono::Duration::seconds(60));
        assert!((settings.approval_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_settings_reject_rate_out_of_range() {
        let result = OrderSettings::from_lookup(lookup(&[(APPROVAL_RATE_VAR, "1.5")]));

        assert!(matches!(
            result,
            Err(ConfigError::Invalid { ref key, .. }) if key == APPROVAL_RATE_VAR
        ));
    }

    #[test]
    fn test_settings_reject_zero_ttl() {
        let result = OrderSettings::from_lookup(lookup(&[(ORDER_TTL_VAR, "0")]));

        assert!(result.is_err());
    }
}
