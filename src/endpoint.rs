//! URL construction for the supported server protocol families.
//!
//! Classic servers are addressed by their upload URL
//! (`http://host/speedtest/upload.php`); download and ping resources live next
//! to it. Lightweight servers expose query endpoints under a common base URL.
//! Nothing here performs I/O.

use url::Url;

use crate::error::Result;
use crate::params;
use crate::server::ServerKind;

/// Builds request URLs for one protocol family.
pub trait Endpoint: Send + Sync {
    /// Resource used by the latency probe.
    fn ping_url(&self, base: &str) -> Result<Url>;
    /// Download resource sized by `size` (table value or megabytes, per family).
    fn download_url(&self, base: &str, size: u32) -> Result<Url>;
    /// Upload target.
    fn upload_url(&self, base: &str) -> Result<Url>;
    /// Megabytes transferred by one download of `size`.
    fn size_to_megabytes(&self, size: u32) -> f64;
}

/// speedtest.net style servers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Classic;

/// LibreSpeed style servers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lightweight;

fn classic_root(base: &str) -> &str {
    base.split(params::CLASSIC_UPLOAD_SUFFIX)
        .next()
        .unwrap_or(base)
}

impl Endpoint for Classic {
    fn ping_url(&self, base: &str) -> Result<Url> {
        Ok(Url::parse(&format!("{}/latency.txt", classic_root(base)))?)
    }

    fn download_url(&self, base: &str, size: u32) -> Result<Url> {
        Ok(Url::parse(&format!(
            "{}/random{size}x{size}.jpg",
            classic_root(base)
        ))?)
    }

    fn upload_url(&self, base: &str) -> Result<Url> {
        Ok(Url::parse(base)?)
    }

    // matches the jpg resources served by classic servers
    fn size_to_megabytes(&self, size: u32) -> f64 {
        let size = size as f64;
        size * size * 2.0 / 1_000_000.0
    }
}

impl Endpoint for Lightweight {
    fn ping_url(&self, base: &str) -> Result<Url> {
        Ok(Url::parse(&format!(
            "{}/empty?cors=true&ckSize=1",
            base.trim_end_matches('/')
        ))?)
    }

    fn download_url(&self, base: &str, size: u32) -> Result<Url> {
        Ok(Url::parse(&format!(
            "{}/garbage?cors=true&ckSize={size}",
            base.trim_end_matches('/')
        ))?)
    }

    fn upload_url(&self, base: &str) -> Result<Url> {
        Ok(Url::parse(&format!(
            "{}/empty?cors=true&ckSize=10",
            base.trim_end_matches('/')
        ))?)
    }

    fn size_to_megabytes(&self, size: u32) -> f64 {
        size as f64
    }
}

/// Megabytes transferred by one download of `size` from a server of `kind`.
pub fn size_to_megabytes(kind: ServerKind, size: u32) -> f64 {
    kind.endpoint().size_to_megabytes(size)
}
