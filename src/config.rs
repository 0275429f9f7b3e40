//! Engine tuning.
//!
//! The defaults reproduce the empirically derived tables speed test servers
//! are sized for. Every value can be overridden from a JSON file; missing
//! fields fall back to the defaults.

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, SpeedtestError};
use crate::params;
use crate::server::TestKind;

/// Streams and payload-table index used by a main phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allotment {
    /// Transfers kept in flight.
    pub streams: usize,
    /// Index into [`DirectionConfig::sizes`].
    pub size_index: usize,
}

/// Allotment chosen when the warm-up speed is strictly above `above_mbps`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    /// Exclusive lower bound of the warm-up speed, in Mbit/s.
    pub above_mbps: f64,
    /// Transfers kept in flight.
    pub streams: usize,
    /// Index into [`DirectionConfig::sizes`].
    pub size_index: usize,
}

impl Tier {
    const fn new(above_mbps: f64, streams: usize, size_index: usize) -> Self {
        Tier {
            above_mbps,
            streams,
            size_index,
        }
    }

    /// Streams and size index of this tier.
    pub fn allotment(&self) -> Allotment {
        Allotment {
            streams: self.streams,
            size_index: self.size_index,
        }
    }
}

/// Sizing rules for one direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionConfig {
    /// Concurrent requests in the warm-up.
    pub warmup_streams: usize,
    /// Warm-up payload size against classic servers.
    pub warmup_size: u32,
    /// Warm-up payload size against lightweight servers.
    pub lightweight_warmup_size: u32,
    /// Payload size table indexed by `size_index`.
    pub sizes: Vec<u32>,
    /// Tiers in descending `above_mbps` order. Speeds at or below the last
    /// threshold skip the main phase.
    pub tiers: Vec<Tier>,
    /// Allotment used in conservative mode, whatever the warm-up speed.
    pub conservative: Allotment,
}

impl DirectionConfig {
    /// Default download sizing.
    pub fn download() -> Self {
        DirectionConfig {
            warmup_streams: params::DOWNLOAD_WARMUP_STREAMS,
            warmup_size: params::DOWNLOAD_SIZES[2],
            lightweight_warmup_size: 1,
            sizes: params::DOWNLOAD_SIZES.to_vec(),
            tiers: vec![
                Tier::new(50.0, 32, 6),
                Tier::new(10.0, 16, 4),
                Tier::new(4.0, 8, 4),
                Tier::new(2.5, 4, 4),
            ],
            conservative: Allotment {
                streams: 6,
                size_index: 3,
            },
        }
    }

    /// Default upload sizing.
    ///
    /// Warm-up requests carry 1000 kB and are counted as 1 MB. Older clients
    /// sent 1500 kB under the same count, which read 1.5 times slower, so
    /// the tier thresholds are crossed at somewhat lower real speeds than
    /// with those clients.
    pub fn upload() -> Self {
        DirectionConfig {
            warmup_streams: params::UPLOAD_WARMUP_STREAMS,
            warmup_size: params::UPLOAD_SIZES[4],
            lightweight_warmup_size: params::UPLOAD_SIZES[4],
            sizes: params::UPLOAD_SIZES.to_vec(),
            tiers: vec![
                Tier::new(50.0, 40, 9),
                Tier::new(10.0, 16, 9),
                Tier::new(4.0, 8, 9),
                Tier::new(2.5, 4, 5),
            ],
            conservative: Allotment {
                streams: 1,
                size_index: 7,
            },
        }
    }

    fn validate(&self, test: TestKind) -> Result<()> {
        let invalid = |msg: String| Err(SpeedtestError::InvalidConfig(format!("{test:?}: {msg}")));

        if self.warmup_streams == 0 {
            return invalid("warmup_streams must be positive".into());
        }
        let max_size = match test {
            TestKind::Download => params::MAX_DOWNLOAD_SIZE,
            TestKind::Upload => params::MAX_UPLOAD_SIZE,
        };
        let sizes = self
            .sizes
            .iter()
            .chain([&self.warmup_size, &self.lightweight_warmup_size]);
        for &size in sizes {
            if size == 0 || size > max_size {
                return invalid(format!("payload size {size} outside 1..={max_size}"));
            }
        }
        let allotments = self
            .tiers
            .iter()
            .map(Tier::allotment)
            .chain(std::iter::once(self.conservative));
        for a in allotments {
            if a.streams == 0 {
                return invalid("stream counts must be positive".into());
            }
            if a.size_index >= self.sizes.len() {
                return invalid(format!(
                    "size index {} out of range for {} sizes",
                    a.size_index,
                    self.sizes.len()
                ));
            }
        }
        if self
            .tiers
            .windows(2)
            .any(|w| w[0].above_mbps <= w[1].above_mbps)
        {
            return invalid("tiers must be in strictly descending order".into());
        }
        Ok(())
    }
}

/// A direction object read from a file. Absent fields keep the direction's
/// defaults.
#[derive(Debug, Deserialize)]
struct DirectionOverrides {
    warmup_streams: Option<usize>,
    warmup_size: Option<u32>,
    lightweight_warmup_size: Option<u32>,
    sizes: Option<Vec<u32>>,
    tiers: Option<Vec<Tier>>,
    conservative: Option<Allotment>,
}

impl DirectionOverrides {
    fn apply(self, mut base: DirectionConfig) -> DirectionConfig {
        if let Some(v) = self.warmup_streams {
            base.warmup_streams = v;
        }
        if let Some(v) = self.warmup_size {
            base.warmup_size = v;
        }
        if let Some(v) = self.lightweight_warmup_size {
            base.lightweight_warmup_size = v;
        }
        if let Some(v) = self.sizes {
            base.sizes = v;
        }
        if let Some(v) = self.tiers {
            base.tiers = v;
        }
        if let Some(v) = self.conservative {
            base.conservative = v;
        }
        base
    }
}

fn download_overrides<'de, D>(d: D) -> std::result::Result<DirectionConfig, D::Error>
where
    D: Deserializer<'de>,
{
    DirectionOverrides::deserialize(d).map(|o| o.apply(DirectionConfig::download()))
}

fn upload_overrides<'de, D>(d: D) -> std::result::Result<DirectionConfig, D::Error>
where
    D: Deserializer<'de>,
{
    DirectionOverrides::deserialize(d).map(|o| o.apply(DirectionConfig::upload()))
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Multiplier correcting counted payload bytes for protocol overhead.
    pub compensation_factor: f64,
    /// Subtract the server latency from the warm-up span when it is shorter
    /// than the span.
    pub correct_warmup_for_latency: bool,
    /// Round trips taken by the latency probe.
    pub ping_samples: usize,
    /// Download sizing.
    #[serde(deserialize_with = "download_overrides")]
    pub download: DirectionConfig,
    /// Upload sizing.
    #[serde(deserialize_with = "upload_overrides")]
    pub upload: DirectionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            compensation_factor: params::COMPENSATION_FACTOR,
            correct_warmup_for_latency: true,
            ping_samples: params::PING_SAMPLES,
            download: DirectionConfig::download(),
            upload: DirectionConfig::upload(),
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a JSON file and validate it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Sizing rules for `test`.
    pub fn direction(&self, test: TestKind) -> &DirectionConfig {
        match test {
            TestKind::Download => &self.download,
            TestKind::Upload => &self.upload,
        }
    }

    /// Reject configurations the engine cannot run.
    pub fn validate(&self) -> Result<()> {
        if !(self.compensation_factor.is_finite() && self.compensation_factor > 0.0) {
            return Err(SpeedtestError::InvalidConfig(
                "compensation_factor must be a positive number".into(),
            ));
        }
        if self.ping_samples == 0 {
            return Err(SpeedtestError::InvalidConfig(
                "ping_samples must be positive".into(),
            ));
        }
        self.download.validate(TestKind::Download)?;
        self.upload.validate(TestKind::Upload)
    }
}
