//! Adapters: the MQTT transport and the static key validator.

pub mod auth;
pub mod mqtt;

pub use auth::StaticKeyValidator;
