//! Event bus for client lifecycle events.
//!
//! Provides an `EventBus` that distributes `ClientEvent` messages to all
//! subscribers via a `tokio::sync::broadcast` channel.

pub mod bus;

pub use bus::EventBus;
