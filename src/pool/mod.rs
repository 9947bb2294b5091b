//! Connection pool and channel lifecycle
//!
//! This module provides:
//! - A shared registry of logical service name -> live channel
//! - Reuse-vs-redial decisions based on transport-reported state
//! - Bounded-retry dialing with capped exponential backoff
//! - A background health monitor that evicts and redials unhealthy channels

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{Config, PoolOptions};
use crate::directory::ServiceDirectory;
use crate::error::PoolError;
use crate::interceptor::InterceptorChain;
use crate::transport::{
    Channel, ConnectionState, Http2Transport, Transport, TransportError, TransportOptions,
};

pub mod backoff;
mod monitor;

pub use backoff::BackoffPolicy;

/// How often the ready-wait loop re-reads the channel state
const READY_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);

/// One pooled channel plus its bookkeeping. Owned exclusively by the pool;
/// callers only ever receive a clone of the channel handle.
struct ConnectionEntry<C> {
    target: String,
    state: ConnectionState,
    created_at: Instant,
    last_used: Instant,
    channel: C,
}

impl<C: Channel> ConnectionEntry<C> {
    fn info(&self, service_name: &str) -> ConnectionInfo {
        ConnectionInfo {
            service_name: service_name.to_string(),
            target: self.target.clone(),
            // Snapshot the live transport state, not the last bookkeeping
            // value.
            state: self.channel.state(),
            created_at: self.created_at,
            last_used: self.last_used,
        }
    }
}

/// Read-only diagnostic snapshot of a pooled connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub service_name: String,
    pub target: String,
    pub state: ConnectionState,
    pub created_at: Instant,
    pub last_used: Instant,
}

/// Shared registry of service name -> channel with health-driven lifecycle.
///
/// Construct with [`ConnectionPool::new`] (or [`from_config`] for the HTTP/2
/// transport); this spawns the health monitor, so a Tokio runtime must be
/// running. Call [`close`] to tear down — the monitor task holds a reference
/// to the pool and keeps it alive until then.
///
/// [`from_config`]: ConnectionPool::from_config
/// [`close`]: ConnectionPool::close
pub struct ConnectionPool<T: Transport> {
    transport: T,
    directory: Arc<ServiceDirectory>,
    options: PoolOptions,
    backoff: BackoffPolicy,

    /// The only shared mutable state: one entry per service name
    entries: RwLock<HashMap<String, ConnectionEntry<T::Channel>>>,

    /// Per-service dial guards so concurrent first-time callers serialize on
    /// one dial instead of racing
    dial_guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,

    shutdown_tx: watch::Sender<bool>,
    monitor: StdMutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ConnectionPool<Http2Transport> {
    /// Build a pool over the HTTP/2 transport from loaded configuration,
    /// with the standard interceptor chain
    pub fn from_config(config: &Config) -> Arc<Self> {
        let options = config.pool.to_options();
        let directory = Arc::new(ServiceDirectory::new(
            config.services.clone(),
            options.namespace.clone(),
        ));
        let transport = Http2Transport::new(
            TransportOptions {
                connect_timeout: options.dial_timeout,
                keepalive_interval: options.keepalive_interval,
                keepalive_timeout: options.keepalive_timeout,
                max_message_size: options.max_message_size,
            },
            InterceptorChain::standard(),
        );

        Self::new(transport, directory, options)
    }
}

impl<T: Transport> ConnectionPool<T> {
    /// Create a pool and start its health monitor
    pub fn new(transport: T, directory: Arc<ServiceDirectory>, options: PoolOptions) -> Arc<Self> {
        let backoff = BackoffPolicy::new(
            options.backoff_base,
            options.backoff_cap,
            options.max_attempts,
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let pool = Arc::new(Self {
            transport,
            directory,
            options,
            backoff,
            entries: RwLock::new(HashMap::new()),
            dial_guards: Mutex::new(HashMap::new()),
            shutdown_tx,
            monitor: StdMutex::new(None),
            closed: AtomicBool::new(false),
        });

        let handle = tokio::spawn(monitor::run(Arc::clone(&pool), shutdown_rx));
        if let Ok(mut slot) = pool.monitor.lock() {
            *slot = Some(handle);
        }

        pool
    }

    pub fn directory(&self) -> &ServiceDirectory {
        &self.directory
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Get a channel to the named service, dialing if necessary.
    ///
    /// A cached channel in a usable state is returned immediately; an
    /// unhealthy one is evicted and replaced by a fresh dial. Fails with
    /// [`PoolError::ConfigNotFound`] for names absent from the directory and
    /// [`PoolError::ShutdownInProgress`] once teardown has begun.
    pub async fn get_connection(&self, service_name: &str) -> Result<T::Channel, PoolError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PoolError::ShutdownInProgress);
        }

        if let Some(channel) = self.lookup(service_name).await {
            return Ok(channel);
        }

        let target = self
            .directory
            .target(service_name)
            .ok_or_else(|| PoolError::ConfigNotFound(service_name.to_string()))?;

        // Serialize dials per service: whoever loses the race finds the
        // winner's entry on the re-check and reuses it.
        let guard = {
            let mut guards = self.dial_guards.lock().await;
            Arc::clone(
                guards
                    .entry(service_name.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        let _dialing = guard.lock().await;

        if let Some(channel) = self.lookup(service_name).await {
            return Ok(channel);
        }

        let channel = self.dial_with_retry(service_name, &target).await?;
        let channel = self.wait_for_ready(service_name, &target, channel).await?;

        let state = channel.state();
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        // close() may have drained the registry while the dial was in
        // flight; a late insert would leak the channel past teardown.
        if self.closed.load(Ordering::SeqCst) {
            drop(entries);
            let _ = channel.close();
            return Err(PoolError::ShutdownInProgress);
        }
        entries.insert(
            service_name.to_string(),
            ConnectionEntry {
                target: target.clone(),
                state,
                created_at: now,
                last_used: now,
                channel: channel.clone(),
            },
        );
        drop(entries);

        info!(service = %service_name, target_addr = %target, state = %state, "connected");
        Ok(channel)
    }

    /// Concurrently pre-connect to every configured service.
    ///
    /// Dials are independent; one failure never aborts the others. Reports
    /// the failure count once all dials have settled.
    pub async fn initialize_all(self: &Arc<Self>) -> Result<(), PoolError> {
        let names: Vec<String> = self.directory.names().map(String::from).collect();
        let total = names.len();

        info!(services = total, "initializing all connections");

        let mut tasks = Vec::with_capacity(total);
        for name in names {
            let pool = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                match pool.get_connection(&name).await {
                    Ok(_) => {
                        debug!(service = %name, "initialized connection");
                        true
                    }
                    Err(err) => {
                        error!(service = %name, error = %err, "failed to initialize connection");
                        false
                    }
                }
            }));
        }

        let mut failed = 0;
        for task in tasks {
            if !task.await.unwrap_or(false) {
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(PoolError::InitFailure { failed, total });
        }

        info!(services = total, "all connections initialized");
        Ok(())
    }

    /// Tear down the pool: stop the health monitor, close every channel, and
    /// clear the registry.
    ///
    /// Every remaining channel is closed even if an earlier close fails; the
    /// first error is returned. Safe to call more than once — later calls
    /// find an empty pool.
    pub async fn close(&self) -> Result<(), PoolError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("close called on an already closed pool");
        }

        // Stop the monitor and wait for its current iteration, so teardown
        // never races a sweep.
        let _ = self.shutdown_tx.send(true);
        let handle = self.monitor.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "health monitor task did not shut down cleanly");
            }
        }

        let mut entries = self.entries.write().await;
        let mut first_err = None;
        let count = entries.len();

        for (name, entry) in entries.drain() {
            match entry.channel.close() {
                Ok(()) => debug!(service = %name, "closed connection"),
                Err(err) => {
                    error!(service = %name, error = %err, "error closing connection");
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }
        drop(entries);

        info!(connections = count, "connection pool shut down");
        match first_err {
            Some(err) => Err(PoolError::CloseFailure(err)),
            None => Ok(()),
        }
    }

    /// Diagnostic snapshot for one service, if pooled
    pub async fn get_connection_info(&self, service_name: &str) -> Option<ConnectionInfo> {
        let entries = self.entries.read().await;
        entries.get(service_name).map(|entry| entry.info(service_name))
    }

    /// Diagnostic snapshots for every pooled connection
    pub async fn get_all_connections(&self) -> HashMap<String, ConnectionInfo> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.info(name)))
            .collect()
    }

    /// Cache lookup. Returns a usable cached channel after refreshing its
    /// bookkeeping, evicts an unhealthy one, and reports a miss otherwise.
    async fn lookup(&self, service_name: &str) -> Option<T::Channel> {
        let state = {
            let entries = self.entries.read().await;
            entries.get(service_name)?.channel.state()
        };

        if state.is_usable() {
            let mut entries = self.entries.write().await;
            let entry = entries.get_mut(service_name)?;
            entry.last_used = Instant::now();
            entry.state = state;
            return Some(entry.channel.clone());
        }

        warn!(service = %service_name, state = %state, "cached connection unhealthy, evicting");
        self.evict(service_name).await;
        None
    }

    /// Remove an unhealthy entry and close its channel. Close errors are
    /// logged; the entry is gone either way.
    ///
    /// The eviction decision is made from a sampled state; a healthy
    /// replacement may have landed in the meantime, so the live state is
    /// re-checked under the write lock and a usable entry is left in place.
    async fn evict(&self, service_name: &str) {
        let mut entries = self.entries.write().await;
        let stale = entries
            .get(service_name)
            .is_some_and(|entry| !entry.channel.state().is_usable());
        if !stale {
            return;
        }

        if let Some(entry) = entries.remove(service_name) {
            if let Err(err) = entry.channel.close() {
                warn!(service = %service_name, error = %err, "error closing evicted connection");
            }
        }
    }

    async fn dial_with_retry(
        &self,
        service_name: &str,
        target: &str,
    ) -> Result<T::Channel, PoolError> {
        let attempts = self.backoff.max_attempts();
        let mut attempt = 0;

        let last_err = loop {
            match self.transport.connect(target).await {
                Ok(channel) => {
                    if attempt > 0 {
                        debug!(
                            service = %service_name,
                            attempt = attempt + 1,
                            "dial succeeded after retry"
                        );
                    }
                    return Ok(channel);
                }
                Err(err) => {
                    attempt += 1;
                    if attempt >= attempts {
                        break err;
                    }

                    let delay = self.backoff.delay(attempt - 1);
                    warn!(
                        service = %service_name,
                        target_addr = %target,
                        attempt,
                        max_attempts = attempts,
                        retry_in = ?delay,
                        error = %err,
                        "dial attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        Err(PoolError::DialFailure {
            service: service_name.to_string(),
            target: target.to_string(),
            attempts,
            source: last_err,
        })
    }

    /// Poll the freshly dialed channel until it is usable.
    ///
    /// A channel still in `Connecting` when the window expires is accepted;
    /// it will finish resolving on first use. Anything else unhealthy at the
    /// deadline is closed and reported.
    async fn wait_for_ready(
        &self,
        service_name: &str,
        target: &str,
        channel: T::Channel,
    ) -> Result<T::Channel, PoolError> {
        let deadline = tokio::time::Instant::now() + self.options.ready_timeout;

        loop {
            let state = channel.state();
            match state {
                ConnectionState::Ready | ConnectionState::Idle => return Ok(channel),
                ConnectionState::Shutdown => {
                    let _ = channel.close();
                    return Err(PoolError::ReadyTimeout {
                        service: service_name.to_string(),
                        target: target.to_string(),
                        waited: self.options.ready_timeout,
                        state,
                    });
                }
                ConnectionState::Connecting | ConnectionState::TransientFailure => {
                    if tokio::time::Instant::now() >= deadline {
                        if state == ConnectionState::Connecting {
                            debug!(
                                service = %service_name,
                                target_addr = %target,
                                "still connecting, will become ready on first use"
                            );
                            return Ok(channel);
                        }

                        let _ = channel.close();
                        return Err(PoolError::ReadyTimeout {
                            service: service_name.to_string(),
                            target: target.to_string(),
                            waited: self.options.ready_timeout,
                            state,
                        });
                    }
                }
            }

            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}
