//! Transport and authenticated request execution.
//!
//! `CredentialGateway` wraps a `Transport`, attaches the bearer token from
//! the session store, and recovers from an expired access token with one
//! refresh-and-retry cycle.

pub mod error;
pub mod gateway;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use error::{ApiError, TransportError};
pub use gateway::{ApiRequest, CredentialGateway};
pub use transport::{ApiResponse, ReqwestTransport, Transport, TransportRequest};
