//! Latency probe: a few sequential minimal requests.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::{Result, SpeedtestError};
use crate::transport::{TransferRequest, Transport};

/// Half of the shortest round trip, or `None` without samples.
pub fn one_way(round_trips: &[Duration]) -> Option<Duration> {
    round_trips.iter().min().map(|rtt| *rtt / 2)
}

/// Time `samples` round trips to `url` one after another and return the
/// one-way latency. Any failed round trip fails the probe.
pub(crate) async fn probe(
    transport: &dyn Transport,
    url: &Url,
    samples: usize,
    cancel: &CancellationToken,
) -> Result<Duration> {
    let mut round_trips = Vec::with_capacity(samples);
    for sample in 1..=samples {
        let start = Instant::now();
        let response = transport
            .send(TransferRequest::get(url.clone()), cancel)
            .await?;
        let rtt = start.elapsed();
        // only the time to first response matters
        drop(response);

        debug!(sample, rtt_us = rtt.as_micros() as u64, "latency sample");
        round_trips.push(rtt);
    }
    one_way(&round_trips)
        .ok_or_else(|| SpeedtestError::InvalidConfig("latency probe needs at least one sample".into()))
}
