//! Error types for pool operations

use std::time::Duration;

use crate::transport::{ConnectionState, TransportError};

/// Errors returned by [`ConnectionPool`](crate::pool::ConnectionPool) operations
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The service name is not present in the service directory.
    ///
    /// This is a caller bug and is never retried.
    #[error("service {0} not found in configuration")]
    ConfigNotFound(String),

    /// Every dial attempt failed; wraps the last transport error.
    #[error("failed to dial {service} at {target} after {attempts} attempts")]
    DialFailure {
        service: String,
        target: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// The connect succeeded but the channel never reached a usable state
    /// within the ready-wait window.
    #[error("connection to {service} at {target} not ready after {waited:?} (state: {state})")]
    ReadyTimeout {
        service: String,
        target: String,
        waited: Duration,
        state: ConnectionState,
    },

    /// The pool is tearing down; no new connections are handed out.
    #[error("connection pool is shutting down")]
    ShutdownInProgress,

    /// Some connections could not be pre-established by
    /// [`initialize_all`](crate::pool::ConnectionPool::initialize_all).
    #[error("failed to initialize {failed} of {total} connections")]
    InitFailure { failed: usize, total: usize },

    /// A channel reported an error while being closed during teardown.
    #[error("error while closing pooled connection")]
    CloseFailure(#[source] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PoolError::ConfigNotFound("billing-service".to_string());
        assert_eq!(
            err.to_string(),
            "service billing-service not found in configuration"
        );

        let err = PoolError::InitFailure { failed: 2, total: 5 };
        assert_eq!(err.to_string(), "failed to initialize 2 of 5 connections");
    }

    #[test]
    fn test_dial_failure_carries_source() {
        let err = PoolError::DialFailure {
            service: "trip-service".to_string(),
            target: "localhost:50051".to_string(),
            attempts: 3,
            source: TransportError::ConnectTimeout("localhost:50051".to_string()),
        };

        assert!(err.to_string().contains("after 3 attempts"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
