//! Background connection health monitor
//!
//! One task per pool. Each sweep re-reads the transport state of every
//! pooled entry and heals what it can: terminally dead channels are dropped
//! immediately, channels stuck in transient failure are dropped and redialed
//! in the background. Callers are never blocked by the monitor; redials go
//! through the same `get_connection` path (and the same locks) as
//! caller-initiated dials.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::transport::{Channel, ConnectionState, Transport};

use super::ConnectionPool;

pub(super) async fn run<T: Transport>(
    pool: Arc<ConnectionPool<T>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = pool.options.health_interval;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; consume it so sweeps start one
    // full period after construction.
    ticker.tick().await;

    debug!(interval = ?interval, "health monitor started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("health monitor stopping");
                return;
            }
            _ = ticker.tick() => sweep(&pool).await,
        }
    }
}

async fn sweep<T: Transport>(pool: &Arc<ConnectionPool<T>>) {
    let interval = pool.options.health_interval;

    let names: Vec<String> = {
        let entries = pool.entries.read().await;
        entries.keys().cloned().collect()
    };

    for name in names {
        // Entries can disappear between the snapshot and this read.
        let snapshot = {
            let entries = pool.entries.read().await;
            entries
                .get(&name)
                .map(|entry| (entry.channel.state(), entry.last_used))
        };
        let Some((state, last_used)) = snapshot else {
            continue;
        };

        match state {
            ConnectionState::Shutdown => {
                warn!(service = %name, "connection shut down, removing from pool");
                pool.evict(&name).await;
            }
            ConnectionState::TransientFailure => {
                // Give the transport two full sweep periods to recover on
                // its own before forcing a redial.
                if last_used.elapsed() > interval * 2 {
                    warn!(
                        service = %name,
                        stuck_for = ?last_used.elapsed(),
                        "connection stuck in transient failure, reconnecting"
                    );
                    pool.evict(&name).await;
                    redial(Arc::clone(pool), name);
                }
            }
            ConnectionState::Ready | ConnectionState::Idle => {
                let mut entries = pool.entries.write().await;
                if let Some(entry) = entries.get_mut(&name) {
                    entry.state = state;
                    entry.last_used = Instant::now();
                }
            }
            ConnectionState::Connecting => {
                // Still resolving; leave it alone.
            }
        }
    }
}

/// Fire-and-forget reconnect; the outcome only lands in the logs
fn redial<T: Transport>(pool: Arc<ConnectionPool<T>>, name: String) {
    tokio::spawn(async move {
        match pool.get_connection(&name).await {
            Ok(_) => info!(service = %name, "reconnected"),
            Err(err) => error!(service = %name, error = %err, "background reconnect failed"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::super::tests::{test_directory, MockTransport};
    use crate::config::PoolOptions;
    use crate::pool::ConnectionPool;
    use crate::transport::{Channel, ConnectionState};
    use std::time::Duration;

    fn monitor_options(interval_ms: u64) -> PoolOptions {
        PoolOptions {
            dial_timeout: Duration::from_millis(200),
            max_attempts: 3,
            backoff_base: Duration::from_millis(10),
            backoff_cap: Duration::from_millis(40),
            ready_timeout: Duration::from_millis(200),
            health_interval: Duration::from_millis(interval_ms),
            ..PoolOptions::default()
        }
    }

    #[tokio::test]
    async fn test_transient_failure_evicted_after_two_intervals() {
        let mock = MockTransport::new();
        let pool = ConnectionPool::new(
            mock.clone(),
            test_directory(&["trip-service"]),
            monitor_options(50),
        );

        let channel = pool.get_connection("trip-service").await.unwrap();
        channel.set_state(ConnectionState::TransientFailure);

        // One sweep in, the entry has not been failing for two intervals yet
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(pool.get_connection_info("trip-service").await.is_some());
        assert_eq!(mock.dial_count(), 1);

        // Past two intervals the monitor evicts and redials in the background
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(mock.dial_count(), 2);
        assert!(mock.channel(0).is_closed());

        let info = pool.get_connection_info("trip-service").await.unwrap();
        assert_eq!(info.state, ConnectionState::Ready);

        pool.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_entry_evicted_without_redial() {
        let mock = MockTransport::new();
        let pool = ConnectionPool::new(
            mock.clone(),
            test_directory(&["trip-service"]),
            monitor_options(50),
        );

        let channel = pool.get_connection("trip-service").await.unwrap();
        channel.close().unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(pool.get_connection_info("trip-service").await.is_none());
        assert_eq!(mock.dial_count(), 1);

        pool.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_healthy_entries_left_in_place() {
        let mock = MockTransport::new();
        let pool = ConnectionPool::new(
            mock.clone(),
            test_directory(&["trip-service"]),
            monitor_options(50),
        );

        pool.get_connection("trip-service").await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;

        let info = pool.get_connection_info("trip-service").await.unwrap();
        assert_eq!(info.state, ConnectionState::Ready);
        // Sweeps refresh the bookkeeping of healthy entries
        assert!(info.last_used.elapsed() < Duration::from_millis(100));
        assert_eq!(mock.dial_count(), 1);

        pool.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_redial_failure_never_surfaces() {
        let mock = MockTransport::new();
        let pool = ConnectionPool::new(
            mock.clone(),
            test_directory(&["trip-service"]),
            monitor_options(50),
        );

        let channel = pool.get_connection("trip-service").await.unwrap();
        mock.fail_all(true);
        channel.set_state(ConnectionState::TransientFailure);

        tokio::time::sleep(Duration::from_millis(350)).await;

        // Entry was evicted; the failed background redial left no residue
        assert!(pool.get_connection_info("trip-service").await.is_none());
        assert!(mock.dial_count() >= 2);

        pool.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_stops_monitor_mid_interval() {
        let mock = MockTransport::new();
        let pool = ConnectionPool::new(
            mock,
            test_directory(&["trip-service"]),
            monitor_options(60_000),
        );

        // Close must not wait out the 60s tick
        tokio::time::timeout(Duration::from_secs(1), pool.close())
            .await
            .expect("close blocked on the monitor interval")
            .unwrap();
    }
}
