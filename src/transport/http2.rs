//! HTTP/2 transport for intra-mesh RPC channels
//!
//! Dials a plaintext TCP connection (the mesh handles link security), layers
//! an HTTP/2 session on top, and drives it from a background task. One
//! session multiplexes all calls to the peer, so the pool only ever needs a
//! single channel per service.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::http2;
use hyper::{Method, Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::interceptor::{CallInfo, InterceptorChain};

use super::{Channel, ConnectionState, Transport, TransportError, TransportOptions};

/// Dials HTTP/2 channels with keepalive and message-size limits applied
#[derive(Debug, Clone)]
pub struct Http2Transport {
    options: TransportOptions,
    interceptors: Arc<InterceptorChain>,
}

impl Http2Transport {
    pub fn new(options: TransportOptions, interceptors: InterceptorChain) -> Self {
        Self {
            options,
            interceptors: Arc::new(interceptors),
        }
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    async fn dial(&self, target: &str) -> Result<Http2Channel, TransportError> {
        if !target.contains(':') {
            return Err(TransportError::InvalidTarget(target.to_string()));
        }

        debug!(target_addr = %target, "dialing");

        let stream = tokio::time::timeout(self.options.connect_timeout, TcpStream::connect(target))
            .await
            .map_err(|_| TransportError::ConnectTimeout(target.to_string()))?
            .map_err(|source| TransportError::Connect {
                target: target.to_string(),
                source,
            })?;

        // OS-level TCP keepalive in addition to HTTP/2 pings
        let socket = socket2::Socket::from(stream.into_std()?);
        socket.set_keepalive(true)?;
        let stream = TcpStream::from_std(socket.into())?;

        let (sender, conn) = http2::Builder::new(TokioExecutor::new())
            .timer(TokioTimer::new())
            .keep_alive_interval(self.options.keepalive_interval)
            .keep_alive_timeout(self.options.keepalive_timeout)
            // Only ping while calls are in flight; idle pinging trips peer
            // ping-abuse protection.
            .keep_alive_while_idle(false)
            .handshake(TokioIo::new(stream))
            .await
            .map_err(|err| TransportError::Handshake {
                target: target.to_string(),
                message: err.to_string(),
            })?;

        let closed = Arc::new(AtomicBool::new(false));

        // Drive the session until it ends; the flag is how handles learn
        // the session is gone.
        let driver_target = target.to_string();
        let driver_closed = Arc::clone(&closed);
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                warn!(target_addr = %driver_target, error = %err, "HTTP/2 session error");
            } else {
                debug!(target_addr = %driver_target, "HTTP/2 session closed");
            }
            driver_closed.store(true, Ordering::SeqCst);
        });

        Ok(Http2Channel {
            target: Arc::from(target),
            sender,
            closed,
            max_message_size: self.options.max_message_size,
            interceptors: Arc::clone(&self.interceptors),
        })
    }
}

impl Transport for Http2Transport {
    type Channel = Http2Channel;

    fn connect(
        &self,
        target: &str,
    ) -> impl Future<Output = Result<Http2Channel, TransportError>> + Send {
        self.dial(target)
    }
}

/// Handle to one HTTP/2 session.
///
/// Clones share the session; dropping the last handle tears it down.
#[derive(Clone)]
pub struct Http2Channel {
    target: Arc<str>,
    sender: http2::SendRequest<Full<Bytes>>,
    closed: Arc<AtomicBool>,
    max_message_size: usize,
    interceptors: Arc<InterceptorChain>,
}

impl Http2Channel {
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Issue a unary call over the channel, wrapped by the interceptor chain
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Bytes,
    ) -> Result<Response<Incoming>, TransportError> {
        self.send(CallInfo::unary(self.target.as_ref(), path), method, path, body)
            .await
    }

    /// Issue a call that opens a stream; the response body is consumed
    /// incrementally by the caller
    pub async fn open_stream(
        &self,
        method: Method,
        path: &str,
        body: Bytes,
    ) -> Result<Response<Incoming>, TransportError> {
        self.send(CallInfo::streaming(self.target.as_ref(), path), method, path, body)
            .await
    }

    async fn send(
        &self,
        call: CallInfo,
        method: Method,
        path: &str,
        body: Bytes,
    ) -> Result<Response<Incoming>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }

        if body.len() > self.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: body.len(),
                limit: self.max_message_size,
            });
        }

        // HTTP/2 requests need an absolute URI carrying the authority
        let uri = format!("http://{}{}", self.target, path);
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(body))
            .map_err(|err| TransportError::Request {
                target: self.target.to_string(),
                message: err.to_string(),
            })?;

        let mut sender = self.sender.clone();
        let target = Arc::clone(&self.target);
        let interceptors = Arc::clone(&self.interceptors);

        interceptors
            .wrap(call, async move {
                sender
                    .send_request(request)
                    .await
                    .map_err(|err| TransportError::Request {
                        target: target.to_string(),
                        message: err.to_string(),
                    })
            })
            .await
    }
}

impl Channel for Http2Channel {
    fn state(&self) -> ConnectionState {
        if self.closed.load(Ordering::SeqCst) || self.sender.is_closed() {
            ConnectionState::Shutdown
        } else if self.sender.is_ready() {
            ConnectionState::Ready
        } else {
            // A session with no free stream capacity reports not-ready; from
            // the pool's perspective it is still resolving.
            ConnectionState::Connecting
        }
    }

    fn close(&self) -> Result<(), TransportError> {
        // Marking the handle closed stops new calls; the driver task winds
        // down once the remaining sender clones drop.
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl std::fmt::Debug for Http2Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http2Channel")
            .field("target", &self.target)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_target_rejected() {
        let transport = Http2Transport::new(TransportOptions::default(), InterceptorChain::new());

        let err = transport.connect("not-an-address").await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidTarget(_)));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let transport = Http2Transport::new(TransportOptions::default(), InterceptorChain::new());

        // Port 1 is essentially never listening
        let err = transport.connect("127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
