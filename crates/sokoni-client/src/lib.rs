//! Network side of the Sokoni client: an HTTP [`Gateway`] and the
//! realtime change feed.
//!
//! [`Gateway`]: sokoni_core::gateway::Gateway

pub mod http;
pub mod realtime;

pub use http::HttpGateway;
