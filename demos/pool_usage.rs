//! Example demonstrating connection pool usage
//!
//! This example shows how to:
//! 1. Configure the pool and its service directory
//! 2. Pre-connect to every configured service
//! 3. Issue calls over pooled channels
//! 4. Inspect connection diagnostics and shut down cleanly

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hyper::Method;
use tracing::{info, warn};

use meshpool::{
    ConnectionPool, Http2Transport, InterceptorChain, PoolOptions, ServiceConfig,
    ServiceDirectory, TransportOptions,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Services this process talks to. In production these come from
    // meshpool.yaml or MESHPOOL_* environment variables; see
    // `meshpool::config::load_config`.
    let directory = Arc::new(ServiceDirectory::new(
        vec![
            ServiceConfig {
                name: "payment-service".to_string(),
                host: "10.0.0.5".to_string(),
                port: 50055,
            },
            ServiceConfig {
                name: "trip-service".to_string(),
                host: "10.0.0.7".to_string(),
                port: 50051,
            },
        ],
        None,
    ));

    let options = PoolOptions {
        dial_timeout: Duration::from_secs(10),
        max_attempts: 3,
        health_interval: Duration::from_secs(30),
        ..PoolOptions::default()
    };

    let transport = Http2Transport::new(
        TransportOptions {
            connect_timeout: options.dial_timeout,
            ..TransportOptions::default()
        },
        InterceptorChain::standard(),
    );

    let pool = ConnectionPool::new(transport, directory, options);

    // Warm up every configured service; failures are summarized, not fatal
    if let Err(err) = pool.initialize_all().await {
        warn!("some connections failed to initialize: {}", err);
    }

    // Issue a few calls; the pool hands back the same multiplexed channel
    // each time
    for i in 0..5 {
        match pool.get_connection("payment-service").await {
            Ok(channel) => {
                info!("call #{} over {}", i + 1, channel.target());

                let response = channel
                    .request(
                        Method::POST,
                        "/payments.v1.PaymentService/Charge",
                        Bytes::from_static(b"{\"amount_cents\":1250}"),
                    )
                    .await;

                match response {
                    Ok(response) => info!("call #{} -> {}", i + 1, response.status()),
                    Err(err) => warn!("call #{} failed: {}", i + 1, err),
                }
            }
            Err(err) => warn!("no connection for payment-service: {}", err),
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    // Print diagnostics
    println!("\n=== CONNECTION STATUS ===\n");
    for (name, info) in pool.get_all_connections().await {
        println!("  Service: {}", name);
        println!("    Target: {}", info.target);
        println!("    State: {}", info.state);
        println!("    Age: {:?}", info.created_at.elapsed());
        println!("    Last used: {:?} ago", info.last_used.elapsed());
        println!();
    }

    pool.close().await?;
    info!("pool shut down");

    Ok(())
}
