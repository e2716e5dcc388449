//! Shared domain types for the Backplane polling client.
//!
//! This crate contains the types used across the workspace: channels,
//! messages, client configuration, persisted record schemas, lifecycle
//! events, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod persisted;
