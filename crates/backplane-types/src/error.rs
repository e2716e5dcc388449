use thiserror::Error;

/// Errors returned to callers of the public client operations.
///
/// The polling loop itself never surfaces errors; these only describe
/// calls that were rejected before any state was touched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackplaneError {
    #[error("client is not initialized")]
    NotInitialized,

    #[error("client is already initialized")]
    AlreadyInitialized,

    #[error("missing required configuration: {0}")]
    MissingConfig(&'static str),

    #[error("expectation interval must be greater than zero")]
    InvalidInterval,
}

/// Errors from the retrieval transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Errors from state store operations (used by trait definitions in backplane-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),
}

/// A persisted record could not be turned back into typed state.
///
/// Callers treat every variant as "no usable state" and fall back to empty.
#[derive(Debug, Error)]
pub enum PersistedStateError {
    #[error("corrupt persisted state: {0}")]
    CorruptPersistedState(String),

    #[error("unsupported persisted schema version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}
