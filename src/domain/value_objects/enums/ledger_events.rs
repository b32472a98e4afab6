use std::fmt::Display;

use super::transaction_statuses::TransactionStatus;
use super::transaction_types::TransactionType;

/// Internal vocabulary that every provider's webhook event set is mapped
/// into. Unrecognized events are acknowledged but never applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEvent {
    PaymentSucceeded,
    PaymentFailed,
    RefundCompleted,
    VoidCompleted,
    Unrecognized,
}

impl LedgerEvent {
    /// The ledger row a confirmation of this kind collapses into.
    pub fn ledger_row(&self) -> Option<(TransactionType, TransactionStatus)> {
        match self {
            LedgerEvent::PaymentSucceeded => {
                Some((TransactionType::Payment, TransactionStatus::Succeeded))
            }
            LedgerEvent::PaymentFailed => {
                Some((TransactionType::Payment, TransactionStatus::Failed))
            }
            LedgerEvent::RefundCompleted => {
                Some((TransactionType::Refund, TransactionStatus::Succeeded))
            }
            LedgerEvent::VoidCompleted => {
                Some((TransactionType::Void, TransactionStatus::Succeeded))
            }
            LedgerEvent::Unrecognized => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEvent::PaymentSucceeded => "payment-succeeded",
            LedgerEvent::PaymentFailed => "payment-failed",
            LedgerEvent::RefundCompleted => "refund-completed",
            LedgerEvent::VoidCompleted => "void-completed",
            LedgerEvent::Unrecognized => "unrecognized",
        }
    }
}

impl Display for LedgerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
