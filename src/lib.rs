//! meshpool - client-side RPC channel pool for service meshes
//!
//! Maps logical service names to live transport channels, reuses healthy
//! channels across calls, redials with capped exponential backoff, and runs
//! a background monitor that heals unhealthy channels without caller
//! involvement.
//!
//! ```no_run
//! use meshpool::{config, ConnectionPool};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = config::load_config(Some("meshpool.yaml"))?;
//! let pool = ConnectionPool::from_config(&config);
//!
//! pool.initialize_all().await?;
//! let channel = pool.get_connection("payment-service").await?;
//! // ... issue calls over `channel` ...
//! pool.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod directory;
pub mod error;
pub mod interceptor;
pub mod pool;
pub mod transport;

pub use config::{Config, PoolOptions, PoolSettings, ServiceConfig};
pub use directory::ServiceDirectory;
pub use error::PoolError;
pub use interceptor::{
    CallInfo, CallInterceptor, CallKind, CallOutcome, InterceptorChain, LoggingInterceptor,
    TracingInterceptor,
};
pub use pool::{BackoffPolicy, ConnectionInfo, ConnectionPool};
pub use transport::{
    Channel, ConnectionState, Http2Channel, Http2Transport, Transport, TransportError,
    TransportOptions,
};
