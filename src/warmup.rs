//! Warm-up burst used to size the main phase.

use std::time::Duration;

use futures_util::future::try_join_all;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::Transfer;
use crate::error::Result;
use crate::transport::Transport;

/// Throughput estimate from a warm-up burst.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WarmUp {
    /// Estimated speed in Mbit/s.
    pub mbps: f64,
    /// Wall-clock span of the burst.
    pub span: Duration,
}

/// Mbit/s for `total_mb` megabytes moved in `span`, with `latency` taken off
/// the span.
///
/// On very fast links the burst can finish in less than the latency; the raw
/// span is used then. A zero span yields zero.
pub fn warmup_mbps(total_mb: f64, span: Duration, latency: Duration) -> f64 {
    let effective = match span.checked_sub(latency) {
        Some(corrected) if !corrected.is_zero() => corrected,
        _ => span,
    };
    if effective.is_zero() {
        return 0.0;
    }
    total_mb * 8.0 / effective.as_secs_f64()
}

/// Run `streams` copies of `transfer` concurrently, without a deadline.
///
/// The first failing transfer fails the warm-up; the others are dropped.
pub(crate) async fn run(
    transport: &dyn Transport,
    transfer: &Transfer,
    streams: usize,
    megabytes_per_stream: f64,
    latency: Duration,
    cancel: &CancellationToken,
) -> Result<WarmUp> {
    let start = Instant::now();
    try_join_all((0..streams).map(|_| transfer.run(transport, None, cancel))).await?;
    let span = start.elapsed();

    let mbps = warmup_mbps(streams as f64 * megabytes_per_stream, span, latency);
    debug!(streams, span_ms = span.as_millis() as u64, mbps, "warm-up finished");
    Ok(WarmUp { mbps, span })
}
