/*!
 * Tracing
 * Subscriber setup and operation spans for dispatch and rendezvous paths
 *
 * Features:
 * - JSON or compact human-readable output, selected by environment
 * - Per-operation sequence IDs for log correlation
 * - Slow-operation warnings against a frame-budget threshold
 */

use crate::core::limits::{SLOW_DISPATCH_THRESHOLD, TRACE_JSON_ENV};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

fn json_requested() -> bool {
    std::env::var(TRACE_JSON_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Initialize the global subscriber
///
/// Environment variables:
/// - RUST_LOG: log filter (default: info)
/// - FRAME_SYNC_TRACE_JSON: JSON output when `1` or `true`
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing() -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if json_requested() {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .is_ok()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .compact(),
            )
            .try_init()
            .is_ok()
    };

    if installed {
        info!(json = json_requested(), "Tracing initialized");
    }
    installed
}

/// Debug-level subscriber for tests; safe to call repeatedly
pub fn init_test_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("debug"))
        .with(tracing_subscriber::fmt::layer().compact().with_test_writer())
        .try_init();
}

/// Timed span around one operation; logs on drop
pub struct OperationSpan {
    span: tracing::Span,
    start: Instant,
    id: u64,
    slow_threshold: Duration,
}

impl OperationSpan {
    pub fn new(operation: &'static str) -> Self {
        let id = NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed);
        let span = span!(
            Level::DEBUG,
            "operation",
            op_id = id,
            operation = operation,
            duration_us = tracing::field::Empty,
            items = tracing::field::Empty,
        );

        Self {
            span,
            start: Instant::now(),
            id,
            slow_threshold: SLOW_DISPATCH_THRESHOLD,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    pub fn record_items(&self, count: usize) {
        self.span.record("items", count);
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn is_slow(&self) -> bool {
        self.elapsed() > self.slow_threshold
    }
}

impl Drop for OperationSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        let _entered = self.span.enter();
        self.span.record("duration_us", duration.as_micros() as u64);

        if duration > self.slow_threshold {
            warn!(
                op_id = self.id,
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "slow operation detected"
            );
        } else {
            debug!(
                op_id = self.id,
                duration_us = duration.as_micros() as u64,
                "operation completed"
            );
        }
    }
}

/// Open a timed span for `name`
#[inline]
pub fn span_operation(name: &'static str) -> OperationSpan {
    OperationSpan::new(name)
}
