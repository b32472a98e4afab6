pub mod delivery_retry;
pub mod inbound_webhook;
pub mod payment_gateway;
pub mod provider_status;
pub mod webhook_dispatcher;
