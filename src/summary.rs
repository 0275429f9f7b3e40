//! Final results of a run.

use serde::Serialize;

use crate::server::{Server, ServerKind};

/// Results measured against one server.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    /// Server base URL.
    pub server_url: String,
    /// Protocol family.
    pub kind: ServerKind,
    /// One-way latency in milliseconds.
    pub latency_ms: Option<f64>,
    /// Download speed in Mbit/s.
    pub download_mbps: Option<f64>,
    /// Upload speed in Mbit/s.
    pub upload_mbps: Option<f64>,
}

impl Summary {
    /// Collect the results measured against `server`. Latency is omitted
    /// when it was never measured.
    pub fn from_server(server: &Server) -> Self {
        Summary {
            server_url: server.url.clone(),
            kind: server.kind,
            latency_ms: (!server.latency.is_zero()).then(|| server.latency.as_micros() as f64 / 1000.0),
            download_mbps: server.download_mbps,
            upload_mbps: server.upload_mbps,
        }
    }
}
