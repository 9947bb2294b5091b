//! End-to-end tests for the HTTP/2 transport against a real local server

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpListener;

use meshpool::{
    Channel, ConnectionPool, ConnectionState, Http2Transport, InterceptorChain, PoolError,
    PoolOptions, ServiceConfig, ServiceDirectory, TransportError, TransportOptions,
};

/// Echo server speaking prior-knowledge HTTP/2; returns the bound port
async fn spawn_echo_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let service = service_fn(|req: Request<Incoming>| async move {
                    let path = req.uri().path().to_string();
                    let body = req.into_body().collect().await.unwrap().to_bytes();
                    let response = Response::builder()
                        .status(StatusCode::OK)
                        .header("x-echo-path", path)
                        .body(Full::new(body))
                        .unwrap();
                    Ok::<_, Infallible>(response)
                });
                let _ = hyper::server::conn::http2::Builder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    port
}

fn transport() -> Http2Transport {
    let options = TransportOptions {
        connect_timeout: Duration::from_secs(2),
        ..TransportOptions::default()
    };
    Http2Transport::new(options, InterceptorChain::standard())
}

#[tokio::test]
async fn test_connect_and_round_trip() {
    use meshpool::Transport;

    let port = spawn_echo_server().await;
    let channel = transport()
        .connect(&format!("127.0.0.1:{port}"))
        .await
        .unwrap();

    assert!(channel.state().is_usable());

    let response = channel
        .request(Method::POST, "/payments.v1.PaymentService/Charge", Bytes::from_static(b"hello"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["x-echo-path"],
        "/payments.v1.PaymentService/Charge"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, Bytes::from_static(b"hello"));
}

#[tokio::test]
async fn test_oversize_message_rejected_locally() {
    use meshpool::Transport;

    let port = spawn_echo_server().await;
    let options = TransportOptions {
        connect_timeout: Duration::from_secs(2),
        max_message_size: 16,
        ..TransportOptions::default()
    };
    let transport = Http2Transport::new(options, InterceptorChain::new());
    let channel = transport
        .connect(&format!("127.0.0.1:{port}"))
        .await
        .unwrap();

    let err = channel
        .request(Method::POST, "/echo", Bytes::from(vec![0u8; 64]))
        .await
        .unwrap_err();
    match err {
        TransportError::MessageTooLarge { size, limit } => {
            assert_eq!(size, 64);
            assert_eq!(limit, 16);
        }
        other => panic!("expected MessageTooLarge, got {:?}", other),
    }

    // The channel itself is untouched by the local rejection
    let response = channel
        .request(Method::POST, "/echo", Bytes::from_static(b"ok"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_closed_channel_refuses_calls() {
    use meshpool::Transport;

    let port = spawn_echo_server().await;
    let channel = transport()
        .connect(&format!("127.0.0.1:{port}"))
        .await
        .unwrap();

    channel.close().unwrap();
    assert_eq!(channel.state(), ConnectionState::Shutdown);

    let err = channel
        .request(Method::POST, "/echo", Bytes::from_static(b"late"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::ChannelClosed));
}

#[tokio::test]
async fn test_pool_over_real_transport() {
    let port = spawn_echo_server().await;

    let directory = Arc::new(ServiceDirectory::new(
        vec![ServiceConfig {
            name: "echo-service".to_string(),
            host: "127.0.0.1".to_string(),
            port,
        }],
        None,
    ));
    let options = PoolOptions {
        dial_timeout: Duration::from_secs(2),
        ready_timeout: Duration::from_secs(2),
        ..PoolOptions::default()
    };
    let pool = ConnectionPool::new(transport(), directory, options);

    let channel = pool.get_connection("echo-service").await.unwrap();
    let response = channel
        .request(Method::POST, "/echo", Bytes::from_static(b"pooled"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Second lookup hands back the same multiplexed session
    let again = pool.get_connection("echo-service").await.unwrap();
    assert_eq!(again.target(), channel.target());

    let info = pool.get_connection_info("echo-service").await.unwrap();
    assert_eq!(info.state, ConnectionState::Ready);
    assert_eq!(info.target, format!("127.0.0.1:{port}"));

    pool.close().await.unwrap();
    assert_eq!(channel.state(), ConnectionState::Shutdown);
}

#[tokio::test]
async fn test_pool_reports_dial_failure() {
    // Nothing listens on port 1
    let directory = Arc::new(ServiceDirectory::new(
        vec![ServiceConfig {
            name: "dead-service".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1,
        }],
        None,
    ));
    let options = PoolOptions {
        dial_timeout: Duration::from_millis(500),
        max_attempts: 2,
        backoff_base: Duration::from_millis(10),
        backoff_cap: Duration::from_millis(20),
        ready_timeout: Duration::from_millis(500),
        ..PoolOptions::default()
    };
    let pool = ConnectionPool::new(transport(), directory, options);

    let err = pool.get_connection("dead-service").await.unwrap_err();
    match err {
        PoolError::DialFailure {
            service,
            target,
            attempts,
            ..
        } => {
            assert_eq!(service, "dead-service");
            assert_eq!(target, "127.0.0.1:1");
            assert_eq!(attempts, 2);
        }
        other => panic!("expected DialFailure, got {:?}", other),
    }

    pool.close().await.unwrap();
}
