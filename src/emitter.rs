//! Output formatting for test events.
//!
//! The [`Emitter`] trait defines callbacks for each stage of a test run.
//! Two implementations are provided:
//! - [`HumanReadableEmitter`]: live progress and a formatted summary on a terminal.
//! - [`JsonEmitter`]: one JSON object per line, suitable for machine consumption.

use std::io::Write;
use std::time::Duration;

use serde::Serialize;

use crate::engine::compensated_mbps;
use crate::error::Result;
use crate::server::TestKind;
use crate::summary::Summary;

#[derive(Serialize)]
#[serde(tag = "type")]
enum Event<'a> {
    Starting {
        test: &'a str,
    },
    Error {
        test: &'a str,
        error: &'a str,
    },
    Latency {
        latency_ms: f64,
    },
    Progress {
        test: TestKind,
        bytes: u64,
        elapsed_ms: u64,
        mbps: f64,
    },
    Complete {
        test: TestKind,
        mbps: f64,
    },
    Summary {
        summary: &'a Summary,
    },
}

/// Live speed shown while a main phase runs, without overhead compensation.
fn live_mbps(bytes: u64, elapsed: Duration) -> f64 {
    compensated_mbps(bytes, elapsed, 1.0)
}

/// Callbacks for speed test lifecycle events.
pub trait Emitter {
    /// Called when a test (`"ping"`, `"download"` or `"upload"`) is about to begin.
    fn on_starting(&mut self, test: &str) -> Result<()>;
    /// Called when a test fails.
    fn on_error(&mut self, test: &str, err: &str) -> Result<()>;
    /// Called after the latency probe succeeds.
    fn on_latency(&mut self, latency: Duration) -> Result<()>;
    /// Called periodically with the bytes moved so far in the running test.
    fn on_progress(&mut self, test: TestKind, bytes: u64, elapsed: Duration) -> Result<()>;
    /// Called when a throughput test finishes.
    fn on_complete(&mut self, test: TestKind, mbps: f64) -> Result<()>;
    /// Called after all tests complete, with the final summary.
    fn on_summary(&mut self, s: &Summary) -> Result<()>;
}

/// Emits human-readable progress and results to a writer.
pub struct HumanReadableEmitter<W: Write> {
    out: W,
}

impl<W: Write> HumanReadableEmitter<W> {
    /// Create a new emitter writing to `out`.
    pub fn new(out: W) -> Self {
        HumanReadableEmitter { out }
    }
}

impl<W: Write> Emitter for HumanReadableEmitter<W> {
    fn on_starting(&mut self, test: &str) -> Result<()> {
        write!(self.out, "\rstarting {test}")?;
        self.out.flush()?;
        Ok(())
    }

    fn on_error(&mut self, test: &str, err: &str) -> Result<()> {
        write!(self.out, "\n{test} test failed: {err}\n")?;
        Ok(())
    }

    fn on_latency(&mut self, latency: Duration) -> Result<()> {
        write!(
            self.out,
            "\rLatency: {:>7.1} ms\n",
            latency.as_micros() as f64 / 1000.0
        )?;
        Ok(())
    }

    fn on_progress(&mut self, _test: TestKind, bytes: u64, elapsed: Duration) -> Result<()> {
        if bytes > 0 {
            write!(
                self.out,
                "\rAvg. speed: {:>7.1} Mbit/s",
                live_mbps(bytes, elapsed)
            )?;
            self.out.flush()?;
        }
        Ok(())
    }

    fn on_complete(&mut self, test: TestKind, mbps: f64) -> Result<()> {
        write!(self.out, "\r{:?}: {:>7.1} Mbit/s\n", test, mbps)?;
        Ok(())
    }

    fn on_summary(&mut self, s: &Summary) -> Result<()> {
        writeln!(self.out, "\nTest results\n")?;
        writeln!(self.out, "{:>10}: {}", "Server", s.server_url)?;
        writeln!(self.out, "{:>10}: {:?}", "Protocol", s.kind)?;

        if let Some(latency) = s.latency_ms {
            writeln!(self.out, "{:>10}: {:>7.1} ms", "Latency", latency)?;
        }
        if let Some(dl) = s.download_mbps {
            writeln!(self.out, "{:>10}: {:>7.1} Mbit/s", "Download", dl)?;
        }
        if let Some(ul) = s.upload_mbps {
            writeln!(self.out, "{:>10}: {:>7.1} Mbit/s", "Upload", ul)?;
        }

        Ok(())
    }
}

/// Emits one JSON object per line for each event.
pub struct JsonEmitter<W: Write> {
    out: W,
}

impl<W: Write> JsonEmitter<W> {
    /// Create a new JSON emitter writing to `out`.
    pub fn new(out: W) -> Self {
        JsonEmitter { out }
    }

    fn emit(&mut self, event: &Event) -> Result<()> {
        let json = serde_json::to_string(event)?;
        writeln!(self.out, "{}", json)?;
        Ok(())
    }
}

impl<W: Write> Emitter for JsonEmitter<W> {
    fn on_starting(&mut self, test: &str) -> Result<()> {
        self.emit(&Event::Starting { test })
    }

    fn on_error(&mut self, test: &str, err: &str) -> Result<()> {
        self.emit(&Event::Error { test, error: err })
    }

    fn on_latency(&mut self, latency: Duration) -> Result<()> {
        self.emit(&Event::Latency {
            latency_ms: latency.as_micros() as f64 / 1000.0,
        })
    }

    fn on_progress(&mut self, test: TestKind, bytes: u64, elapsed: Duration) -> Result<()> {
        self.emit(&Event::Progress {
            test,
            bytes,
            elapsed_ms: elapsed.as_millis() as u64,
            mbps: live_mbps(bytes, elapsed),
        })
    }

    fn on_complete(&mut self, test: TestKind, mbps: f64) -> Result<()> {
        self.emit(&Event::Complete { test, mbps })
    }

    fn on_summary(&mut self, s: &Summary) -> Result<()> {
        self.emit(&Event::Summary { summary: s })
    }
}
