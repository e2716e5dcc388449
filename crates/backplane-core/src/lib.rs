//! Polling scheduler, message cache, and session logic for the Backplane client.
//!
//! This crate defines the "ports" (`StateStore`, `RetrievalTransport`) that
//! the infrastructure layer implements, plus every piece of client logic:
//! channel identity, the bounded message cache, expectation tracking, the
//! poll scheduler, response processing, and subscriber fan-out. It depends
//! only on `backplane-types` -- never on `backplane-infra` or any IO crate.

pub mod cache;
pub mod clock;
pub mod event;
pub mod expectation;
pub mod identity;
pub mod processor;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod subscriber;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use session::{BackplaneClient, SessionPhase};
