//! Protocol constants and default tuning parameters.

use std::time::Duration;

/// Download payload table for classic servers: edge length in pixels of the
/// square `randomNxN.jpg` resources.
pub const DOWNLOAD_SIZES: [u32; 10] = [350, 500, 750, 1000, 1500, 2000, 2500, 3000, 3500, 4000];

/// Upload payload table in kilobytes.
pub const UPLOAD_SIZES: [u32; 10] = [100, 300, 500, 800, 1000, 1500, 2500, 3000, 3500, 4000];

/// Largest download size accepted from configuration, either a classic edge
/// length in pixels or a lightweight chunk count in megabytes.
pub const MAX_DOWNLOAD_SIZE: u32 = 10_000;

/// Largest upload size accepted from configuration, in kilobytes.
pub const MAX_UPLOAD_SIZE: u32 = 100_000;

/// Multiplier applied to counted payload bytes to account for protocol overhead (4%).
pub const COMPENSATION_FACTOR: f64 = 1.04;

/// Number of concurrent requests in the download warm-up.
pub const DOWNLOAD_WARMUP_STREAMS: usize = 10;

/// Number of concurrent requests in the upload warm-up.
pub const UPLOAD_WARMUP_STREAMS: usize = 2;

/// Number of sequential round trips taken by the latency probe.
pub const PING_SAMPLES: usize = 3;

/// Bytes per megabyte when converting counted bytes into Mbit/s.
pub const MEGABYTE: f64 = 1024.0 * 1024.0;

/// Repeated block used to synthesize upload bodies.
pub const UPLOAD_BLOCK: &str = "0123456789";

/// Blocks removed from every upload body so the encoded form matches the
/// server's size bucket.
pub const UPLOAD_FRAMING_BLOCKS: u32 = 51;

/// Size of the slices an upload body is written in.
pub const UPLOAD_CHUNK_SIZE: usize = 32 * 1024;

/// Content type of synthesized upload bodies.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Path suffix of a classic server URL. Classic servers are addressed by their upload URL.
pub const CLASSIC_UPLOAD_SUFFIX: &str = "/upload.php";

/// Default length of the main measurement phase.
pub const DEFAULT_TEST_DURATION: Duration = Duration::from_secs(15);

/// Interval between live progress updates in the CLI.
pub const UPDATE_INTERVAL: Duration = Duration::from_millis(250);
