//! An adaptive multi-stream HTTP speed test client library.
//!
//! Download and upload throughput are measured against speedtest.net style
//! ("classic") or LibreSpeed style ("lightweight") servers. Each measurement
//! starts with a short warm-up burst whose throughput decides how many
//! concurrent transfers, and of what size, the timed main phase keeps in
//! flight. Latency is the shortest of a few sequential round trips, halved.
//!
//! # Quick start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use speedtest_client::client::ClientBuilder;
//! use speedtest_client::server::{Server, ServerKind};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ClientBuilder::new("my-app", "0.1.0").build()?;
//! let mut server = Server::new("http://speedtest.example.net/upload.php", ServerKind::Classic);
//!
//! client.ping_test(&mut server).await?;
//! client.download_test(&mut server, false, Duration::from_secs(10)).await?;
//! client.upload_test(&mut server, false, Duration::from_secs(10)).await?;
//! println!("{:?}", server);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod budget;
pub mod client;
pub mod config;
pub mod download;
pub mod emitter;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod latency;
pub mod params;
pub mod progress;
pub mod server;
pub mod summary;
pub mod transport;
pub mod upload;
pub mod warmup;
