//! Measurement targets and test identifiers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::endpoint::{Classic, Endpoint, Lightweight};
use crate::progress::ProgressSink;

/// Protocol family spoken by a speed test server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    /// speedtest.net style server addressed by its `upload.php` URL.
    Classic,
    /// LibreSpeed style server exposing `garbage` and `empty` endpoints.
    Lightweight,
}

impl ServerKind {
    /// URL strategy for this protocol family.
    pub fn endpoint(self) -> &'static dyn Endpoint {
        match self {
            ServerKind::Classic => &Classic,
            ServerKind::Lightweight => &Lightweight,
        }
    }
}

/// Direction of a throughput measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestKind {
    /// Server-to-client.
    Download,
    /// Client-to-server.
    Upload,
}

/// One measurement target and the results measured against it.
///
/// Only `latency`, `download_mbps` and `upload_mbps` are written by the
/// client, and only when the corresponding test succeeds.
#[derive(Clone)]
pub struct Server {
    /// Base URL. For classic servers this is the upload URL.
    pub url: String,
    /// Protocol family.
    pub kind: ServerKind,
    /// One-way latency from the last ping test, zero if never measured.
    pub latency: Duration,
    /// Download speed in Mbit/s from the last download test.
    pub download_mbps: Option<f64>,
    /// Upload speed in Mbit/s from the last upload test.
    pub upload_mbps: Option<f64>,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl Server {
    /// A server with no results yet.
    pub fn new(url: impl Into<String>, kind: ServerKind) -> Self {
        Server {
            url: url.into(),
            kind,
            latency: Duration::ZERO,
            download_mbps: None,
            upload_mbps: None,
            progress: None,
        }
    }

    /// Install a sink that receives live byte counts during the main phase.
    pub fn set_progress_handler(&mut self, sink: Arc<dyn ProgressSink>) {
        self.progress = Some(sink);
    }

    /// Remove the progress sink.
    pub fn clear_progress_handler(&mut self) {
        self.progress = None;
    }

    /// The installed progress sink, if any.
    pub fn progress_handler(&self) -> Option<Arc<dyn ProgressSink>> {
        self.progress.clone()
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("url", &self.url)
            .field("kind", &self.kind)
            .field("latency", &self.latency)
            .field("download_mbps", &self.download_mbps)
            .field("upload_mbps", &self.upload_mbps)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}
