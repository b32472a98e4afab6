pub mod inbound_webhooks;
pub mod payments;
pub mod provider_status;
pub mod webhook_registrations;
