//! Adaptive throughput measurement.
//!
//! A measurement runs in two phases:
//!
//! 1. A warm-up burst of fixed size estimates the link speed
//!    (see [`crate::warmup`]).
//! 2. The estimate picks a stream count and payload size
//!    (see [`crate::budget`]), and a main phase keeps that many transfers in
//!    flight until the deadline passes. Transfers admitted before the deadline
//!    are allowed to finish; the elapsed time includes that drain.
//!
//! Every transfer of the main phase feeds one shared byte counter. The speed
//! is computed from it once all transfers have been joined.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::budget::StreamBudget;
use crate::config::EngineConfig;
use crate::error::{Result, SpeedtestError};
use crate::params;
use crate::progress::{ByteCounter, ProgressSink, Tee};
use crate::server::{Server, ServerKind, TestKind};
use crate::transport::Transport;
use crate::{download, upload, warmup};

/// Parameters of one download or upload measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementRequest {
    /// Direction to measure.
    pub test: TestKind,
    /// Cap concurrency at the configured conservative allotment.
    pub conservative: bool,
    /// Length of the main phase.
    pub duration: Duration,
}

/// A single transfer, cloned once per stream.
#[derive(Debug, Clone)]
pub(crate) enum Transfer {
    Download { url: Url },
    Upload { url: Url, payload: Bytes },
}

impl Transfer {
    /// Build the transfer of `test` for a payload of `size`.
    fn for_size(server: &Server, test: TestKind, size: u32) -> Result<Self> {
        let endpoint = server.kind.endpoint();
        Ok(match test {
            TestKind::Download => Transfer::Download {
                url: endpoint.download_url(&server.url, size)?,
            },
            TestKind::Upload => Transfer::Upload {
                url: endpoint.upload_url(&server.url)?,
                payload: upload::payload(size),
            },
        })
    }

    pub(crate) async fn run(
        &self,
        transport: &dyn Transport,
        progress: Option<Arc<dyn ProgressSink>>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        match self {
            Transfer::Download { url } => {
                download::run(transport, url.clone(), progress.as_deref(), cancel).await
            }
            Transfer::Upload { url, payload } => {
                upload::run(transport, url.clone(), payload.clone(), progress, cancel).await
            }
        }
    }
}

/// Mbit/s for `total_bytes` moved in `elapsed`, corrected by `compensation`.
///
/// Zero elapsed time yields zero.
pub fn compensated_mbps(total_bytes: u64, elapsed: Duration, compensation: f64) -> f64 {
    if elapsed.is_zero() {
        return 0.0;
    }
    total_bytes as f64 / params::MEGABYTE * compensation * 8.0 / elapsed.as_secs_f64()
}

/// What a main phase observed.
#[derive(Debug, Default)]
pub(crate) struct PhaseOutcome {
    pub total_bytes: u64,
    pub elapsed: Duration,
    pub launched: usize,
    pub failed: usize,
    /// Failures classified as the server being unreachable.
    pub fatal: usize,
    pub first_error: Option<SpeedtestError>,
}

impl PhaseOutcome {
    fn record(&mut self, joined: std::result::Result<Result<u64>, tokio::task::JoinError>) {
        let err = match joined {
            Ok(Ok(_)) => return,
            Ok(Err(e)) => e,
            Err(e) => SpeedtestError::from(e),
        };
        self.failed += 1;
        let fatal = err.is_transport_fatal();
        if fatal {
            self.fatal += 1;
        }
        if self.first_error.is_none() {
            warn!(error = %err, fatal, "transfer failed");
            self.first_error = Some(err);
        } else {
            debug!(error = %err, fatal, "transfer failed");
        }
    }

    /// Turn the outcome into a speed.
    ///
    /// A phase that admitted nothing reports `warmup_mbps`; a phase where
    /// every transfer failed is an error rather than a near-zero speed.
    pub(crate) fn into_speed(
        self,
        test: TestKind,
        compensation: f64,
        warmup_mbps: f64,
        cancelled: bool,
    ) -> Result<f64> {
        if cancelled && self.total_bytes == 0 {
            return Err(SpeedtestError::Cancelled);
        }
        if self.launched == 0 {
            return Ok(warmup_mbps);
        }
        if self.failed == self.launched
            && !cancelled
            && let Some(source) = self.first_error
        {
            return Err(SpeedtestError::AllTransfersFailed {
                test,
                attempts: self.launched,
                source: Box::new(source),
            });
        }
        if self.failed > 0 {
            warn!(
                failed = self.failed,
                fatal = self.fatal,
                launched = self.launched,
                "some transfers failed"
            );
        }
        Ok(compensated_mbps(self.total_bytes, self.elapsed, compensation))
    }
}

/// Keep up to `streams` copies of `transfer` in flight until `duration`
/// has passed or `cancel` fires, then wait for the admitted ones.
pub(crate) async fn main_phase(
    transport: &Arc<dyn Transport>,
    transfer: &Transfer,
    streams: usize,
    duration: Duration,
    sink: Option<Arc<dyn ProgressSink>>,
    cancel: &CancellationToken,
) -> PhaseOutcome {
    let counter = ByteCounter::new();
    let tee: Arc<dyn ProgressSink> = Arc::new(Tee::new(counter.clone(), sink));
    let gate = Arc::new(Semaphore::new(streams));
    let mut tasks = JoinSet::new();
    let mut outcome = PhaseOutcome::default();

    let start = Instant::now();
    let deadline = start + duration;
    loop {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = Arc::clone(&gate).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        if Instant::now() >= deadline || cancel.is_cancelled() {
            break;
        }

        let transport = Arc::clone(transport);
        let transfer = transfer.clone();
        let tee = Arc::clone(&tee);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let result = transfer.run(transport.as_ref(), Some(tee), &cancel).await;
            drop(permit);
            result
        });
        outcome.launched += 1;

        while let Some(joined) = tasks.try_join_next() {
            outcome.record(joined);
        }
    }

    while let Some(joined) = tasks.join_next().await {
        outcome.record(joined);
    }
    outcome.elapsed = start.elapsed();
    outcome.total_bytes = counter.total();
    outcome
}

/// Warm up, size and run one measurement against `server`. Returns Mbit/s.
pub(crate) async fn measure(
    transport: &Arc<dyn Transport>,
    config: &EngineConfig,
    server: &Server,
    request: &MeasurementRequest,
    cancel: &CancellationToken,
) -> Result<f64> {
    let test = request.test;
    let direction = config.direction(test);

    let warmup_size = match server.kind {
        ServerKind::Classic => direction.warmup_size,
        ServerKind::Lightweight => direction.lightweight_warmup_size,
    };
    let warmup_mb = match test {
        TestKind::Download => server.kind.endpoint().size_to_megabytes(warmup_size),
        TestKind::Upload => upload::size_to_megabytes(warmup_size),
    };
    let latency = if config.correct_warmup_for_latency {
        server.latency
    } else {
        Duration::ZERO
    };
    let warm_transfer = Transfer::for_size(server, test, warmup_size)?;
    let warm = warmup::run(
        transport.as_ref(),
        &warm_transfer,
        direction.warmup_streams,
        warmup_mb,
        latency,
        cancel,
    )
    .await
    .map_err(|e| match e {
        SpeedtestError::Cancelled => SpeedtestError::Cancelled,
        e => SpeedtestError::WarmUpFailed {
            test,
            source: Box::new(e),
        },
    })?;

    let Some(budget) = StreamBudget::select(
        direction,
        test,
        server.kind,
        request.conservative,
        warm.mbps,
        request.duration,
    ) else {
        info!(?test, mbps = warm.mbps, "link too slow, reporting warm-up estimate");
        return Ok(warm.mbps);
    };
    debug!(
        ?test,
        warmup_mbps = warm.mbps,
        streams = budget.streams,
        payload_size = budget.payload_size,
        "main phase sized"
    );

    let transfer = Transfer::for_size(server, test, budget.payload_size)?;
    let outcome = main_phase(
        transport,
        &transfer,
        budget.streams,
        request.duration,
        server.progress_handler(),
        cancel,
    )
    .await;
    debug!(
        ?test,
        launched = outcome.launched,
        failed = outcome.failed,
        bytes = outcome.total_bytes,
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        "main phase finished"
    );

    let mbps = outcome.into_speed(
        test,
        config.compensation_factor,
        warm.mbps,
        cancel.is_cancelled(),
    )?;
    info!(?test, mbps, "measurement complete");
    Ok(mbps)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use tracing_test::traced_test;

    use super::*;
    use crate::transport::testing::MockTransport;

    fn secs(n: f64) -> Duration {
        Duration::from_secs_f64(n)
    }

    fn download_transfer() -> Transfer {
        Transfer::Download {
            url: Url::parse("http://x/random1500x1500.jpg").unwrap(),
        }
    }

    fn request(test: TestKind, conservative: bool, duration: Duration) -> MeasurementRequest {
        MeasurementRequest {
            test,
            conservative,
            duration,
        }
    }

    #[test]
    fn compensated_speed() {
        let ten_mib = 10 * 1024 * 1024;
        let mbps = compensated_mbps(ten_mib, secs(8.0), 1.04);
        assert!((mbps - 10.4).abs() < 1e-9);
        assert_eq!(compensated_mbps(ten_mib, Duration::ZERO, 1.04), 0.0);
        assert_eq!(compensated_mbps(0, secs(1.0), 1.04), 0.0);
    }

    #[test]
    fn speed_ignores_completion_order() {
        let contributions = [4096u64, 1 << 20, 17, 65536, 999_999];
        let forward = ByteCounter::new();
        contributions.iter().for_each(|b| forward.add(*b));
        let backward = ByteCounter::new();
        contributions.iter().rev().for_each(|b| backward.add(*b));

        assert_eq!(forward.total(), backward.total());
        assert_eq!(
            compensated_mbps(forward.total(), secs(3.0), 1.04),
            compensated_mbps(backward.total(), secs(3.0), 1.04)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn main_phase_keeps_streams_saturated_until_deadline() {
        let mock = Arc::new(MockTransport::new(secs(0.1), 1000));
        let transport: Arc<dyn Transport> = mock.clone();

        let outcome = main_phase(
            &transport,
            &download_transfer(),
            4,
            secs(1.0),
            None,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(mock.max_in_flight(), 4);
        assert_eq!(outcome.launched, 40);
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.total_bytes, 40 * 1000);
        assert_eq!(outcome.elapsed, secs(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn admitted_transfers_drain_past_the_deadline() {
        let mock = Arc::new(MockTransport::new(secs(2.5), 1000));
        let transport: Arc<dyn Transport> = mock.clone();

        let outcome = main_phase(
            &transport,
            &download_transfer(),
            3,
            secs(1.0),
            None,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome.launched, 3);
        assert_eq!(outcome.elapsed, secs(2.5));
    }

    #[tokio::test(start_paused = true)]
    async fn progress_sink_sees_phase_bytes() {
        let transport: Arc<dyn Transport> = Arc::new(MockTransport::new(secs(0.5), 2048));
        let seen = ByteCounter::new();

        let outcome = main_phase(
            &transport,
            &download_transfer(),
            2,
            secs(1.0),
            Some(Arc::new(seen.clone())),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome.total_bytes, 4 * 2048);
        assert_eq!(seen.total(), outcome.total_bytes);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_duration_admits_nothing_and_reuses_warmup() {
        let mock = Arc::new(MockTransport::new(secs(0.1), 1000));
        let transport: Arc<dyn Transport> = mock.clone();

        let outcome = main_phase(
            &transport,
            &download_transfer(),
            8,
            Duration::ZERO,
            None,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome.launched, 0);
        assert_eq!(mock.calls(), 0);
        let mbps = outcome
            .into_speed(TestKind::Download, 1.04, 7.5, false)
            .unwrap();
        assert_eq!(mbps, 7.5);
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn all_failures_are_an_error() {
        let transport: Arc<dyn Transport> =
            Arc::new(MockTransport::new(secs(0.2), 1000).failing_when(|_, _| true));

        let outcome = main_phase(
            &transport,
            &download_transfer(),
            4,
            secs(1.0),
            None,
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(outcome.failed, outcome.launched);

        let err = outcome
            .into_speed(TestKind::Download, 1.04, 30.0, false)
            .unwrap_err();
        assert!(matches!(
            err,
            SpeedtestError::AllTransfersFailed {
                test: TestKind::Download,
                attempts: 20,
                ..
            }
        ));
        assert!(logs_contain("transfer failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_failures_count_only_successes() {
        let transport: Arc<dyn Transport> =
            Arc::new(MockTransport::new(secs(0.5), 1000).failing_when(|call, _| call % 2 == 1));

        let outcome = main_phase(
            &transport,
            &download_transfer(),
            2,
            secs(1.0),
            None,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome.launched, 4);
        assert_eq!(outcome.failed, 2);
        assert_eq!(outcome.total_bytes, 2 * 1000);
        let mbps = outcome
            .into_speed(TestKind::Download, 1.0, 0.0, false)
            .unwrap();
        assert!(mbps > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start() {
        let transport: Arc<dyn Transport> = Arc::new(MockTransport::new(secs(0.1), 1000));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = main_phase(&transport, &download_transfer(), 4, secs(1.0), None, &cancel).await;
        assert_eq!(outcome.launched, 0);
        assert!(matches!(
            outcome.into_speed(TestKind::Download, 1.04, 10.0, true),
            Err(SpeedtestError::Cancelled)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_mid_phase_reports_partial_speed() {
        let transport: Arc<dyn Transport> = Arc::new(MockTransport::new(secs(0.5), 4096));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(secs(1.25)).await;
            trigger.cancel();
        });

        let outcome = main_phase(&transport, &download_transfer(), 2, secs(10.0), None, &cancel).await;

        // two rounds of two complete, the third round is cut off
        assert_eq!(outcome.launched, 6);
        assert_eq!(outcome.failed, 2);
        assert_eq!(outcome.total_bytes, 4 * 4096);
        assert_eq!(outcome.elapsed, secs(1.25));
        let mbps = outcome
            .into_speed(TestKind::Download, 1.04, 50.0, true)
            .unwrap();
        let expected = compensated_mbps(4 * 4096, secs(1.25), 1.04);
        assert!((mbps - expected).abs() < 1e-9, "{mbps} != {expected}");
    }

    #[tokio::test(start_paused = true)]
    async fn fast_classic_download_uses_top_tier() {
        // 10 warm-up requests of 1.125 MB in 1.5 s: 60 Mbit/s.
        let mut mock = MockTransport::new(secs(1.5), 256 * 1024);
        mock.chunk_len = 64 * 1024;
        let mock = Arc::new(mock);
        let transport: Arc<dyn Transport> = mock.clone();
        let server = Server::new("http://x/upload.php", ServerKind::Classic);

        let mbps = measure(
            &transport,
            &EngineConfig::default(),
            &server,
            &request(TestKind::Download, false, secs(3.0)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let urls = mock.urls();
        assert!(urls[..10].iter().all(|u| u == "http://x/random750x750.jpg"));
        assert_eq!(urls.len(), 10 + 64);
        assert!(urls[10..].iter().all(|u| u == "http://x/random2500x2500.jpg"));
        assert_eq!(mock.max_in_flight(), 32);
        let expected = 16.0 * 1.04 * 8.0 / 3.0;
        assert!((mbps - expected).abs() < 1e-9, "{mbps} != {expected}");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_link_reports_warmup_estimate() {
        // 11.25 MB in 40 s is 2.25 Mbit/s, below the lowest tier.
        let mock = Arc::new(MockTransport::new(secs(40.0), 1000));
        let transport: Arc<dyn Transport> = mock.clone();
        let server = Server::new("http://x/upload.php", ServerKind::Classic);

        let mbps = measure(
            &transport,
            &EngineConfig::default(),
            &server,
            &request(TestKind::Download, false, secs(10.0)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(mbps, 11.25 * 8.0 / 40.0);
        assert_eq!(mock.calls(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn conservative_upload_uses_single_stream() {
        let mock = Arc::new(MockTransport::new(secs(1.0), 16));
        let transport: Arc<dyn Transport> = mock.clone();
        let server = Server::new("http://x/upload.php", ServerKind::Classic);

        let mbps = measure(
            &transport,
            &EngineConfig::default(),
            &server,
            &request(TestKind::Upload, true, secs(2.0)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let warm_body = upload::payload(1000).len();
        let main_body = upload::payload(3000).len();
        assert_eq!(mock.calls(), 2 + 2);
        assert_eq!(
            mock.uploaded.load(Ordering::SeqCst),
            2 * warm_body + 2 * main_body
        );
        let expected = compensated_mbps(2 * main_body as u64, secs(2.0), 1.04);
        assert!((mbps - expected).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn warmup_failure_is_reported_as_such() {
        let transport: Arc<dyn Transport> =
            Arc::new(MockTransport::new(secs(0.1), 10).failing_when(|call, _| call == 0));
        let server = Server::new("http://y", ServerKind::Lightweight);

        let err = measure(
            &transport,
            &EngineConfig::default(),
            &server,
            &request(TestKind::Download, false, secs(1.0)),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            SpeedtestError::WarmUpFailed {
                test: TestKind::Download,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn lightweight_download_requests_duration_sized_payloads() {
        // 10 x 1 MB in 0.5 s: 160 Mbit/s -> 32 streams of 160/8/32*4 = 2.5 MB.
        let mock = Arc::new(MockTransport::new(secs(0.5), 100));
        let transport: Arc<dyn Transport> = mock.clone();
        let server = Server::new("http://y", ServerKind::Lightweight);

        measure(
            &transport,
            &EngineConfig::default(),
            &server,
            &request(TestKind::Download, false, secs(4.0)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let urls = mock.urls();
        assert_eq!(urls[0], "http://y/garbage?cors=true&ckSize=1");
        assert!(urls[10..].iter().all(|u| u == "http://y/garbage?cors=true&ckSize=2"));
    }
}
