//! Transport abstraction for pooled channels
//!
//! The pool only cares about two things: dialing a target and reading the
//! live state of a channel it previously dialed. Both sit behind traits so
//! the policy logic (retry, eviction, health monitoring) can be exercised
//! against scripted transports in tests, while production uses the HTTP/2
//! dialer in [`http2`].

use std::future::Future;
use std::time::Duration;

pub mod http2;

pub use http2::{Http2Channel, Http2Transport};

/// Transport-reported channel state.
///
/// The pool mirrors whatever the transport reports at read time; it never
/// invents a state of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Established but currently carrying no calls
    Idle,
    /// Connection establishment still resolving
    Connecting,
    /// Established and usable
    Ready,
    /// Temporarily failing; may recover without a redial
    TransientFailure,
    /// Terminally closed
    Shutdown,
}

impl ConnectionState {
    /// States in which a cached channel may be handed to a caller.
    ///
    /// `Connecting` counts as usable because transports resolve to `Ready`
    /// asynchronously on first real use.
    pub fn is_usable(&self) -> bool {
        matches!(
            self,
            ConnectionState::Ready | ConnectionState::Idle | ConnectionState::Connecting
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Ready => "Ready",
            ConnectionState::TransientFailure => "TransientFailure",
            ConnectionState::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

/// Error types for transport operations
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection to {0} timed out")]
    ConnectTimeout(String),

    #[error("failed to connect to {target}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid target address: {0}")]
    InvalidTarget(String),

    #[error("handshake with {target} failed: {message}")]
    Handshake { target: String, message: String },

    #[error("message of {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("channel is closed")]
    ChannelClosed,

    #[error("request to {target} failed: {message}")]
    Request { target: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Options applied by a transport on every connect attempt
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Upper bound on a single connect attempt
    pub connect_timeout: Duration,

    /// Keepalive ping interval
    pub keepalive_interval: Duration,

    /// How long to wait for a keepalive ack before the channel is declared
    /// dead
    pub keepalive_timeout: Duration,

    /// Maximum outbound message size in bytes
    pub max_message_size: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(60),
            keepalive_timeout: Duration::from_secs(20),
            max_message_size: 4 * 1024 * 1024,
        }
    }
}

/// A reusable, possibly multiplexed connection to a remote service.
///
/// Handles are cheap to clone; clones share the underlying connection.
pub trait Channel: Clone + Send + Sync + 'static {
    /// Live state as reported by the underlying transport
    fn state(&self) -> ConnectionState;

    /// Release the connection. Safe to call on an already closed channel.
    fn close(&self) -> Result<(), TransportError>;
}

/// Performs one connection attempt to a target
pub trait Transport: Send + Sync + 'static {
    type Channel: Channel;

    fn connect(
        &self,
        target: &str,
    ) -> impl Future<Output = Result<Self::Channel, TransportError>> + Send;
}
