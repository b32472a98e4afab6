use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Ledger row kinds. Refunds and voids are separate rows referencing the
/// same tenant, never edits of the original payment row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Payment,
    Capture,
    Refund,
    Void,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Payment => "payment",
            TransactionType::Capture => "capture",
            TransactionType::Refund => "refund",
            TransactionType::Void => "void",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "payment" => Some(TransactionType::Payment),
            "capture" => Some(TransactionType::Capture),
            "refund" => Some(TransactionType::Refund),
            "void" => Some(TransactionType::Void),
            _ => None,
        }
    }
}

impl Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
