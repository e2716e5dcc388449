//! Infrastructure layer for the Backplane client.
//!
//! Contains implementations of the ports defined in `backplane-core`:
//! SQLite and in-memory state stores, the reqwest-backed retrieval
//! transport, plus the config loader and data directory resolution.

pub mod config;
pub mod filesystem;
pub mod memory;
pub mod sqlite;
pub mod transport;
