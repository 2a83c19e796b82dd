use std::{
    fmt::Write as _,
    io::{self, Write},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, StampedeError},
    stats::{EndpointStats, StatsSnapshot},
};

/// A view of the run handed to a [`Reporter`], periodically while the run is
/// going and once more at the end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub name: String,
    pub elapsed: Duration,
    pub active_users: usize,
    /// Set on the report taken after every user stopped.
    pub final_report: bool,
    pub stats: StatsSnapshot,
}

impl Report {
    /// Requests per second for `stats` over the elapsed time.
    pub fn rps(&self, stats: &EndpointStats) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            stats.count as f64 / secs
        } else {
            0.0
        }
    }
}

/// Sends reports somewhere: a terminal, a file, a database.
///
/// A failing reporter is logged and never stops the run.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, report: &Report) -> Result<()>;
}

/// Prints a table per report to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutReporter;

#[async_trait]
impl Reporter for StdoutReporter {
    async fn report(&self, report: &Report) -> Result<()> {
        let table = render_table(report);
        let mut out = io::stdout().lock();
        out.write_all(table.as_bytes())?;
        out.flush()?;
        Ok(())
    }
}

fn ms(us: u64) -> f64 {
    us as f64 / 1_000.0
}

fn row(out: &mut String, name: &str, stats: &EndpointStats, rps: f64) {
    let p = |q| ms(stats.latency.percentile(q).unwrap_or(0));
    let _ = writeln!(
        out,
        "{name:<40} {:>8} {:>8} {:>6.1}% {:>9.1} {:>9.1} {:>9.1} {:>9.1} {:>9.1} {:>8.1}",
        stats.count,
        stats.failures,
        stats.failure_ratio() * 100.0,
        ms(stats.latency.mean_us),
        p(50.0),
        p(95.0),
        p(99.0),
        ms(stats.latency.max_us),
        rps,
    );
}

/// The table printed by [`StdoutReporter`]. Latencies are in milliseconds.
pub fn render_table(report: &Report) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "\n{} | {:.1}s | {} users{}",
        report.name,
        report.elapsed.as_secs_f64(),
        report.active_users,
        if report.final_report { " | final" } else { "" }
    );
    let _ = writeln!(
        out,
        "{:<40} {:>8} {:>8} {:>7} {:>9} {:>9} {:>9} {:>9} {:>9} {:>8}",
        "name", "reqs", "fails", "fail%", "avg", "p50", "p95", "p99", "max", "req/s"
    );
    for (name, stats) in &report.stats.endpoints {
        row(&mut out, name, stats, report.rps(stats));
    }
    row(&mut out, "Aggregated", &report.stats.total, report.rps(&report.stats.total));

    if !report.stats.skipped.is_empty() {
        let _ = writeln!(out, "\nskipped actions");
        for (action, n) in &report.stats.skipped {
            let _ = writeln!(out, "{action:<40} {n:>8}");
        }
    }

    if report.final_report {
        let failing: Vec<_> = report
            .stats
            .endpoints
            .iter()
            .filter(|(_, s)| !s.failure_reasons.is_empty())
            .collect();
        if !failing.is_empty() {
            let _ = writeln!(out, "\nfailures");
            for (name, stats) in failing {
                for (reason, n) in &stats.failure_reasons {
                    let _ = writeln!(out, "{n:>8} {name}: {reason}");
                }
            }
        }
    }
    out
}

/// Writes every report as one JSON document per line.
#[derive(Debug)]
pub struct JsonReporter<W> {
    out: Mutex<W>,
}

impl JsonReporter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> JsonReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

#[async_trait]
impl<W: Write + Send> Reporter for JsonReporter<W> {
    async fn report(&self, report: &Report) -> Result<()> {
        let line = serde_json::to_string(report)?;
        let mut out = self.out.lock();
        writeln!(out, "{line}").map_err(|e| StampedeError::Report(e.to_string()))?;
        out.flush()?;
        Ok(())
    }
}
