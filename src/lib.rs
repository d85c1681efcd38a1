pub mod app_state;
pub mod authentication;
pub mod configuration;
pub mod context;
pub mod directory_client;
pub mod domain;
pub mod email_client;
pub mod lifecycle;
pub mod notification_worker;
pub mod notifications;
pub mod payment_client;
pub mod pricing;
pub mod renewal;
pub mod renewal_worker;
pub mod routes;
pub mod startup;
pub mod store;
pub mod telemetry;
pub mod usage_client;
