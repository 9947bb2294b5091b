//! Call interceptors for observability
//!
//! Every outbound call issued over a pooled channel is wrapped by an ordered
//! chain of interceptors that record start time, outcome, and duration.
//! Interceptors are stateless with respect to the pool and must never alter
//! the result of the call they observe.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

/// Whether a call is a single request/response exchange or opens a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Unary,
    Streaming,
}

impl CallKind {
    fn label(&self) -> &'static str {
        match self {
            CallKind::Unary => "unary",
            CallKind::Streaming => "streaming",
        }
    }
}

/// Identity of a single outbound call
#[derive(Debug, Clone)]
pub struct CallInfo {
    /// Dial target the call is issued against
    pub target: String,

    /// Method path (e.g., "/payments.Payments/Charge")
    pub method: String,

    pub kind: CallKind,
}

impl CallInfo {
    pub fn unary(target: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            method: method.into(),
            kind: CallKind::Unary,
        }
    }

    pub fn streaming(target: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            method: method.into(),
            kind: CallKind::Streaming,
        }
    }
}

/// Result of a completed call, as seen by interceptors
#[derive(Debug, Clone)]
pub enum CallOutcome {
    Success,
    Failure(String),
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success)
    }
}

/// Hook invoked around every outbound call
pub trait CallInterceptor: Send + Sync {
    /// Called immediately before the call is issued
    fn on_start(&self, _call: &CallInfo) {}

    /// Called once the call has resolved, with its outcome and duration
    fn on_complete(&self, call: &CallInfo, outcome: &CallOutcome, elapsed: Duration);
}

/// Emits one structured log line per completed call
#[derive(Debug, Default)]
pub struct LoggingInterceptor;

impl CallInterceptor for LoggingInterceptor {
    fn on_complete(&self, call: &CallInfo, outcome: &CallOutcome, elapsed: Duration) {
        match outcome {
            CallOutcome::Success => info!(
                target_addr = %call.target,
                method = %call.method,
                kind = call.kind.label(),
                duration_ms = elapsed.as_millis() as u64,
                "call succeeded"
            ),
            CallOutcome::Failure(error) => warn!(
                target_addr = %call.target,
                method = %call.method,
                kind = call.kind.label(),
                duration_ms = elapsed.as_millis() as u64,
                error = %error,
                "call failed"
            ),
        }
    }
}

/// Emits fine-grained start/finish events for tracing backends
#[derive(Debug, Default)]
pub struct TracingInterceptor;

impl CallInterceptor for TracingInterceptor {
    fn on_start(&self, call: &CallInfo) {
        debug!(
            target_addr = %call.target,
            method = %call.method,
            kind = call.kind.label(),
            "call started"
        );
    }

    fn on_complete(&self, call: &CallInfo, outcome: &CallOutcome, elapsed: Duration) {
        debug!(
            target_addr = %call.target,
            method = %call.method,
            success = outcome.is_success(),
            duration_us = elapsed.as_micros() as u64,
            "call finished"
        );
    }
}

/// Ordered list of interceptors applied around each call.
///
/// Interceptors run in insertion order for both `on_start` and `on_complete`.
/// The chain is cheap to clone and share; it holds no per-call state.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn CallInterceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self {
            interceptors: Vec::new(),
        }
    }

    /// The stock chain: logging plus tracing events
    pub fn standard() -> Self {
        Self::new()
            .with(LoggingInterceptor)
            .with(TracingInterceptor)
    }

    /// Append an interceptor to the chain
    pub fn with(mut self, interceptor: impl CallInterceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run a call future under the chain.
    ///
    /// The result is returned exactly as produced by the future; the chain
    /// only observes it.
    pub async fn wrap<T, E, F>(&self, call: CallInfo, fut: F) -> Result<T, E>
    where
        F: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        for interceptor in &self.interceptors {
            interceptor.on_start(&call);
        }

        let start = Instant::now();
        let result = fut.await;
        let elapsed = start.elapsed();

        let outcome = match &result {
            Ok(_) => CallOutcome::Success,
            Err(err) => CallOutcome::Failure(err.to_string()),
        };

        for interceptor in &self.interceptors {
            interceptor.on_complete(&call, &outcome, elapsed);
        }

        result
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}
