//! Main-phase sizing from the warm-up estimate.

use std::time::Duration;

use crate::config::{Allotment, DirectionConfig};
use crate::server::{ServerKind, TestKind};

/// Streams and per-request payload size for one main phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamBudget {
    /// Transfers kept in flight.
    pub streams: usize,
    /// Payload size in the unit of the direction's size table, or megabytes
    /// for lightweight downloads.
    pub payload_size: u32,
}

/// Pick the allotment for `warmup_mbps`. `None` means the link is too slow
/// for a main phase to be worth running.
pub fn allotment(
    direction: &DirectionConfig,
    conservative: bool,
    warmup_mbps: f64,
) -> Option<Allotment> {
    if conservative {
        return Some(direction.conservative);
    }
    direction
        .tiers
        .iter()
        .find(|tier| warmup_mbps > tier.above_mbps)
        .map(|tier| tier.allotment())
}

impl StreamBudget {
    /// Size the main phase of `test` against a `kind` server.
    ///
    /// Lightweight downloads ask for enough megabytes per request to keep
    /// every stream busy for `duration`; everything else comes from the
    /// size table.
    pub fn select(
        direction: &DirectionConfig,
        test: TestKind,
        kind: ServerKind,
        conservative: bool,
        warmup_mbps: f64,
        duration: Duration,
    ) -> Option<StreamBudget> {
        let allotment = allotment(direction, conservative, warmup_mbps)?;
        let payload_size = match (kind, test) {
            (ServerKind::Lightweight, TestKind::Download) => {
                let mb = warmup_mbps / 8.0 / allotment.streams as f64 * duration.as_secs_f64();
                (mb as u32).max(1)
            }
            _ => direction.sizes[allotment.size_index],
        };
        Some(StreamBudget {
            streams: allotment.streams,
            payload_size,
        })
    }
}
