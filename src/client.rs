//! Public entry points for running speed tests.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::EngineConfig;
use crate::engine::{self, MeasurementRequest};
use crate::error::Result;
use crate::latency;
use crate::server::{Server, TestKind};
use crate::transport::{ReqwestTransport, Transport};

/// Configures and builds a [`Client`].
pub struct ClientBuilder {
    client_name: String,
    client_version: String,
    config: EngineConfig,
    transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    /// Start a builder. `client_name` and `client_version` prefix the
    /// user agent sent to servers.
    pub fn new(client_name: impl Into<String>, client_version: impl Into<String>) -> Self {
        ClientBuilder {
            client_name: client_name.into(),
            client_version: client_version.into(),
            config: EngineConfig::default(),
            transport: None,
        }
    }

    /// Replace the default engine tuning.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `transport` instead of a reqwest client.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Validate the configuration and build the client. Without an explicit
    /// transport a reqwest client is created.
    pub fn build(self) -> Result<Client> {
        self.config.validate()?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&self.user_agent())?),
        };
        Ok(Client {
            transport,
            config: self.config,
        })
    }

    fn user_agent(&self) -> String {
        format!(
            "{}/{} {}/{}",
            &self.client_name,
            &self.client_version,
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        )
    }
}

/// Runs latency and throughput tests against [`Server`]s.
///
/// A test that fails leaves the corresponding field of the server untouched.
pub struct Client {
    transport: Arc<dyn Transport>,
    config: EngineConfig,
}

impl Client {
    /// Engine tuning in use.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Measure the server's one-way latency into `server.latency`.
    pub async fn ping_test(&self, server: &mut Server) -> Result<()> {
        self.ping_test_with_cancel(server, &CancellationToken::new())
            .await
    }

    /// Like [`Client::ping_test`], giving up with
    /// [`SpeedtestError::Cancelled`](crate::error::SpeedtestError::Cancelled) when `cancel` fires.
    pub async fn ping_test_with_cancel(
        &self,
        server: &mut Server,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let url = server.kind.endpoint().ping_url(&server.url)?;
        let latency =
            latency::probe(self.transport.as_ref(), &url, self.config.ping_samples, cancel).await?;
        info!(server = %server.url, latency_ms = latency.as_secs_f64() * 1000.0, "ping complete");
        server.latency = latency;
        Ok(())
    }

    /// Measure download speed into `server.download_mbps`.
    ///
    /// `conservative` caps concurrency for constrained clients; `duration`
    /// bounds the main phase.
    pub async fn download_test(
        &self,
        server: &mut Server,
        conservative: bool,
        duration: Duration,
    ) -> Result<()> {
        self.download_test_with_cancel(server, conservative, duration, &CancellationToken::new())
            .await
    }

    /// Like [`Client::download_test`], stopping early when `cancel` fires.
    /// Bytes already counted in the main phase still produce a speed.
    pub async fn download_test_with_cancel(
        &self,
        server: &mut Server,
        conservative: bool,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mbps = self
            .measure(server, TestKind::Download, conservative, duration, cancel)
            .await?;
        server.download_mbps = Some(mbps);
        Ok(())
    }

    /// Measure upload speed into `server.upload_mbps`.
    pub async fn upload_test(
        &self,
        server: &mut Server,
        conservative: bool,
        duration: Duration,
    ) -> Result<()> {
        self.upload_test_with_cancel(server, conservative, duration, &CancellationToken::new())
            .await
    }

    /// Like [`Client::upload_test`], stopping early when `cancel` fires.
    pub async fn upload_test_with_cancel(
        &self,
        server: &mut Server,
        conservative: bool,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mbps = self
            .measure(server, TestKind::Upload, conservative, duration, cancel)
            .await?;
        server.upload_mbps = Some(mbps);
        Ok(())
    }

    async fn measure(
        &self,
        server: &Server,
        test: TestKind,
        conservative: bool,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> Result<f64> {
        let request = MeasurementRequest {
            test,
            conservative,
            duration,
        };
        engine::measure(&self.transport, &self.config, server, &request, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpeedtestError;
    use crate::progress::ByteCounter;
    use crate::server::ServerKind;
    use crate::transport::testing::MockTransport;

    fn client_with(mock: &Arc<MockTransport>) -> Client {
        ClientBuilder::new("test", "0.0.0")
            .transport(mock.clone())
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn ping_sets_latency() {
        let mock = Arc::new(
            MockTransport::new(Duration::ZERO, 0).with_delays(vec![
                Duration::from_millis(40),
                Duration::from_millis(24),
                Duration::from_millis(31),
            ]),
        );
        let mut server = Server::new("http://x/upload.php", ServerKind::Classic);

        client_with(&mock).ping_test(&mut server).await.unwrap();

        assert_eq!(server.latency, Duration::from_millis(12));
        assert_eq!(mock.urls(), vec!["http://x/latency.txt"; 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_ping_keeps_previous_latency() {
        let mock = Arc::new(
            MockTransport::new(Duration::from_millis(5), 0).failing_when(|call, _| call == 1),
        );
        let mut server = Server::new("http://y", ServerKind::Lightweight);
        server.latency = Duration::from_millis(9);

        assert!(client_with(&mock).ping_test(&mut server).await.is_err());
        assert_eq!(server.latency, Duration::from_millis(9));
    }

    #[tokio::test(start_paused = true)]
    async fn download_sets_result_and_reports_progress() {
        let mock = Arc::new(MockTransport::new(Duration::from_millis(500), 4096));
        let progress = ByteCounter::new();
        let mut server = Server::new("http://y", ServerKind::Lightweight);
        server.set_progress_handler(Arc::new(progress.clone()));

        client_with(&mock)
            .download_test(&mut server, false, Duration::from_secs(2))
            .await
            .unwrap();

        let mbps = server.download_mbps.unwrap();
        assert!(mbps > 0.0);
        assert!(progress.total() > 0);
        assert!(server.upload_mbps.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_warmup_keeps_previous_result() {
        let mock = Arc::new(
            MockTransport::new(Duration::from_millis(5), 10).failing_when(|_, _| true),
        );
        let mut server = Server::new("http://x/upload.php", ServerKind::Classic);
        server.upload_mbps = Some(12.5);

        let err = client_with(&mock)
            .upload_test(&mut server, false, Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, SpeedtestError::WarmUpFailed { .. }));
        assert_eq!(server.upload_mbps, Some(12.5));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_upload_leaves_result_unset() {
        let mock = Arc::new(MockTransport::new(Duration::from_millis(5), 10));
        let mut server = Server::new("http://x/upload.php", ServerKind::Classic);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client_with(&mock)
            .upload_test_with_cancel(&mut server, true, Duration::from_secs(1), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, SpeedtestError::Cancelled));
        assert!(server.upload_mbps.is_none());
    }

    #[test]
    fn invalid_config_fails_build() {
        let mut config = EngineConfig::default();
        config.ping_samples = 0;
        let mock = Arc::new(MockTransport::new(Duration::ZERO, 0));
        let built = ClientBuilder::new("test", "0.0.0")
            .config(config)
            .transport(mock)
            .build();
        assert!(matches!(built, Err(SpeedtestError::InvalidConfig(_))));
    }

    #[tokio::test]
    #[ignore]
    async fn test_download_real_server() {
        let client = ClientBuilder::new("speedtest-client-rust", "0.1.0")
            .build()
            .unwrap();
        let mut server = Server::new("https://librespeed.org/backend", ServerKind::Lightweight);
        client.ping_test(&mut server).await.unwrap();
        client
            .download_test(&mut server, false, Duration::from_secs(5))
            .await
            .unwrap();
        println!("{:?}", server);
        assert!(server.download_mbps.unwrap() > 0.0);
    }
}
