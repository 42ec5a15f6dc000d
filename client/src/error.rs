//! Error types for the Graphene API client.
//!
//! Every fallible operation in this crate returns an [`ApiError`]. The
//! variants follow the failure taxonomy of the connection layer: bad
//! configuration is caught before any socket activity, connect failures are
//! surfaced once and never retried here, remote errors stay scoped to the
//! call that caused them, and a dead or closed socket shows up as
//! [`ApiError::ConnectionClosed`] on every call still in flight.

use thiserror::Error;

use crate::capability::Capability;
use crate::wire::RpcError;

/// Errors produced by connections, proxies, and sessions.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    /// The request was rejected before touching the network (empty endpoint,
    /// no capability enabled, inconsistent heartbeat budgets).
    #[error("not configured: {0}")]
    NotConfigured(String),

    /// The socket could not be opened.
    #[error("failed to connect to {endpoint}: {reason}")]
    ConnectFailed {
        /// Endpoint we tried.
        endpoint: String,
        /// Underlying transport error.
        reason: String,
    },

    /// The socket did not open within the connect timeout.
    #[error("connection attempt to {endpoint} timed out after {timeout_ms}ms")]
    ConnectTimeout {
        /// Endpoint we tried.
        endpoint: String,
        /// Configured timeout in milliseconds.
        timeout_ms: u64,
    },

    /// No open socket to send on.
    #[error("not connected")]
    NotConnected,

    /// The caller asked for a sub-API that was never enabled or whose
    /// bring-up failed.
    #[error("{0} API disabled by session config")]
    CapabilityDisabled(Capability),

    /// The node answered with an `error` object.
    #[error("remote error: {0}")]
    Protocol(RpcError),

    /// The socket closed (or was presumed dead) while the call was in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// The API was used incorrectly, e.g. unsubscribing with a listener that
    /// was never registered.
    #[error("usage error: {0}")]
    Usage(String),

    /// The chain id has not been discovered (database API disabled or not
    /// yet initialized).
    #[error("chain id not found")]
    ChainIdNotFound,

    /// A frame could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ApiError {
    /// Whether the error originated from the remote node rather than from
    /// the transport or the caller.
    pub fn is_remote(&self) -> bool {
        matches!(self, ApiError::Protocol(_))
    }
}
