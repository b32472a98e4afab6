pub mod payment_settings;
pub mod transactions;
pub mod webhook_deliveries;
pub mod webhook_registrations;
