use serde::{Deserialize, Serialize};

use super::enums::payment_providers::PaymentProvider;
use super::enums::transaction_statuses::TransactionStatus;

/// One unified payment operation, already validated by the HTTP edge.
/// `amount_minor` is always integer minor-currency units; adapters convert
/// to their native unit internally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOperation {
    Charge(ChargeRequest),
    AuthorizeOnly(ChargeRequest),
    Capture {
        transaction_id: String,
        amount_minor: Option<i64>,
        currency: String,
    },
    Refund {
        transaction_id: String,
        amount_minor: Option<i64>,
        currency: String,
    },
    Void {
        transaction_id: String,
    },
    GetStatus {
        transaction_id: String,
    },
}

impl PaymentOperation {
    pub fn name(&self) -> &'static str {
        match self {
            PaymentOperation::Charge(_) => "charge",
            PaymentOperation::AuthorizeOnly(_) => "authorize_only",
            PaymentOperation::Capture { .. } => "capture",
            PaymentOperation::Refund { .. } => "refund",
            PaymentOperation::Void { .. } => "void",
            PaymentOperation::GetStatus { .. } => "get_status",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChargeRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub customer_email: Option<String>,
    /// Provider-specific payment instrument reference (payment method id,
    /// order token, source id, ...). Opaque to the router.
    pub source: Option<String>,
    pub description: Option<String>,
}

/// The normalized outcome every gateway operation collapses into. Raw
/// provider error shapes never leak past the adapter boundary; callers
/// only ever see this.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentResult {
    pub success: bool,
    pub provider: PaymentProvider,
    pub transaction_id: Option<String>,
    pub status: Option<TransactionStatus>,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
    pub error: Option<String>,
    pub metadata: serde_json::Value,
}

impl PaymentResult {
    pub fn failure(provider: PaymentProvider, error: impl Into<String>) -> Self {
        Self {
            success: false,
            provider,
            transaction_id: None,
            status: None,
            amount_minor: None,
            currency: None,
            error: Some(error.into()),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Ledger row as exposed over the API.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionDto {
    pub id: uuid::Uuid,
    pub external_id: String,
    pub provider: String,
    pub amount_minor: i64,
    pub currency: String,
    pub status: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub customer_email: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<crate::domain::entities::transactions::TransactionEntity> for TransactionDto {
    fn from(entity: crate::domain::entities::transactions::TransactionEntity) -> Self {
        Self {
            id: entity.id,
            external_id: entity.external_id,
            provider: entity.provider,
            amount_minor: entity.amount_minor,
            currency: entity.currency,
            status: entity.status,
            type_: entity.type_,
            customer_email: entity.customer_email,
            metadata: entity.metadata,
            created_at: entity.created_at,
        }
    }
}

/// One row of the per-tenant provider diagnostics surface.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatusDto {
    pub provider: PaymentProvider,
    pub configured: bool,
    pub enabled: bool,
    pub test_mode: bool,
    /// Where this provider should post its callbacks for this tenant,
    /// derived from the public base URL.
    pub webhook_url: String,
}

/// Read-only credential check result for the diagnostics surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionCheck {
    pub ok: bool,
    pub detail: String,
    pub test_mode: bool,
}
