//! Retrieval transports.
//!
//! `HttpTransport` implements `RetrievalTransport` from `backplane-core`
//! over reqwest. Server responses may be JSONP-wrapped; `jsonp` strips the
//! wrapper before decoding.

pub mod http;
pub mod jsonp;

pub use http::HttpTransport;
