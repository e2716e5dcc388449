//! SQLite storage for persisted client state.

pub mod pool;
pub mod state;
