//! Storage abstractions for the client.
//!
//! Defines the key/value port used to persist channel identity and the
//! message cache. Implementations live in backplane-infra.

pub mod state_store;

pub use state_store::StateStore;
