use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use speedtest_client::client::{Client, ClientBuilder};
use speedtest_client::config::EngineConfig;
use speedtest_client::emitter::{Emitter, HumanReadableEmitter, JsonEmitter};
use speedtest_client::error::{Result, SpeedtestError};
use speedtest_client::params;
use speedtest_client::progress::ByteCounter;
use speedtest_client::server::{Server, ServerKind, TestKind};
use speedtest_client::summary::Summary;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, clap::ValueEnum)]
enum Format {
    Human,
    Json,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum Kind {
    Classic,
    Lightweight,
}

impl From<Kind> for ServerKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Classic => ServerKind::Classic,
            Kind::Lightweight => ServerKind::Lightweight,
        }
    }
}

#[derive(Parser, Debug)]
struct Cli {
    /// Server URL. Classic servers are addressed by their upload.php URL
    #[arg(long)]
    server_url: String,
    /// Server protocol family
    #[arg(long, default_value = "classic")]
    kind: Kind,
    /// Length of each throughput test in seconds
    #[arg(long, default_value_t = params::DEFAULT_TEST_DURATION.as_secs())]
    duration: u64,
    /// Keep concurrency at the minimum regardless of link speed
    #[arg(long)]
    conservative: bool,
    /// JSON file overriding the engine tuning
    #[arg(long)]
    config: Option<PathBuf>,
    /// Output format to use: 'human' or 'json' for batch processing
    #[arg(long, default_value = "human")]
    format: Format,
    /// Skip latency measurement
    #[arg(long)]
    no_ping: bool,
    /// Skip download measurement
    #[arg(long)]
    no_download: bool,
    /// Skip upload measurement
    #[arg(long)]
    no_upload: bool,
    /// Emit summary and errors only
    #[arg(long)]
    quiet: bool,
}

/// Run one throughput test, reporting live progress until it finishes.
#[allow(clippy::too_many_arguments)]
async fn run_throughput(
    client: &Client,
    server: &mut Server,
    test: TestKind,
    conservative: bool,
    duration: Duration,
    progress: &ByteCounter,
    emitter: &mut dyn Emitter,
    quiet: bool,
) -> Result<f64> {
    progress.reset();
    let measurement = async {
        match test {
            TestKind::Download => {
                client.download_test(server, conservative, duration).await?;
                Ok::<f64, SpeedtestError>(server.download_mbps.unwrap_or_default())
            }
            TestKind::Upload => {
                client.upload_test(server, conservative, duration).await?;
                Ok::<f64, SpeedtestError>(server.upload_mbps.unwrap_or_default())
            }
        }
    };
    tokio::pin!(measurement);

    let mut ticker = interval(params::UPDATE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // the warm-up does not report progress; the clock starts with the first main-phase bytes
    let mut phase_start: Option<Instant> = None;
    loop {
        tokio::select! {
            result = &mut measurement => return result,
            _ = ticker.tick() => {
                let bytes = progress.total();
                if bytes == 0 || quiet {
                    continue;
                }
                let start = *phase_start.get_or_insert_with(Instant::now);
                emitter.on_progress(test, bytes, start.elapsed())?;
            }
        }
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.no_ping && cli.no_download && cli.no_upload {
        eprintln!("error: nothing to do, ping, download and upload are all disabled");
        std::process::exit(1);
    }

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let client = ClientBuilder::new("speedtest-client", env!("CARGO_PKG_VERSION"))
        .config(config)
        .build()?;

    let mut emitter: Box<dyn Emitter> = match cli.format {
        Format::Human => Box::new(HumanReadableEmitter::new(std::io::stdout())),
        Format::Json => Box::new(JsonEmitter::new(std::io::stdout())),
    };

    let progress = ByteCounter::new();
    let mut server = Server::new(cli.server_url.clone(), cli.kind.into());
    server.set_progress_handler(Arc::new(progress.clone()));
    let duration = Duration::from_secs(cli.duration);

    if !cli.no_ping {
        emitter.on_starting("ping")?;
        match client.ping_test(&mut server).await {
            Ok(()) => emitter.on_latency(server.latency)?,
            Err(e) => emitter.on_error("ping", &e.to_string())?,
        }
    }

    let throughput_tests = [
        (TestKind::Download, "download", cli.no_download),
        (TestKind::Upload, "upload", cli.no_upload),
    ];
    for (test, name, skip) in throughput_tests {
        if skip {
            continue;
        }
        emitter.on_starting(name)?;
        let result = run_throughput(
            &client,
            &mut server,
            test,
            cli.conservative,
            duration,
            &progress,
            emitter.as_mut(),
            cli.quiet,
        )
        .await;
        match result {
            Ok(mbps) => emitter.on_complete(test, mbps)?,
            Err(e) => emitter.on_error(name, &e.to_string())?,
        }
    }

    emitter.on_summary(&Summary::from_server(&server))?;

    Ok(())
}
