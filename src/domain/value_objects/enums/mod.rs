pub mod ledger_events;
pub mod payment_providers;
pub mod transaction_statuses;
pub mod transaction_types;
