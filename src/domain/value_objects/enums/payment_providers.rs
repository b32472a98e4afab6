use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// The five supported payment networks. `PRIORITY_ORDER` is the fixed
/// precedence used when a tenant has more than one provider enabled and
/// the caller did not name one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    Stripe,
    Paypal,
    Square,
    Checkout,
    Mollie,
}

impl PaymentProvider {
    pub const PRIORITY_ORDER: [PaymentProvider; 5] = [
        PaymentProvider::Stripe,
        PaymentProvider::Paypal,
        PaymentProvider::Square,
        PaymentProvider::Checkout,
        PaymentProvider::Mollie,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Stripe => "stripe",
            PaymentProvider::Paypal => "paypal",
            PaymentProvider::Square => "square",
            PaymentProvider::Checkout => "checkout",
            PaymentProvider::Mollie => "mollie",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "stripe" => Some(PaymentProvider::Stripe),
            "paypal" => Some(PaymentProvider::Paypal),
            "square" => Some(PaymentProvider::Square),
            "checkout" => Some(PaymentProvider::Checkout),
            "mollie" => Some(PaymentProvider::Mollie),
            _ => None,
        }
    }
}

impl Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_provider() {
        for provider in PaymentProvider::PRIORITY_ORDER {
            assert_eq!(PaymentProvider::from_str(provider.as_str()), Some(provider));
        }
    }

    #[test]
    fn rejects_unknown_provider() {
        assert_eq!(PaymentProvider::from_str("worldpay"), None);
    }
}
