// Run schedule module
//
// Tracks the parameters of the current run in the ramp and the result
// of a completed run. Pure bookkeeping - the orchestrator drives it.

use std::fmt;
use std::time::Instant;

use crate::config::Config;
use crate::console::{format_duration_ms, green, red};
use crate::stats::TimingSnapshot;

/// Parameters of the current run, advanced in place after each run.
///
/// The per-endpoint timeout is the WebSocket connection timeout plus
/// the association timeout; the total accumulates it over the run's
/// endpoints and feeds the wait budget for the Connection Tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSchedule {
    endpoints_increment: u32,
    concurrency_increment: u32,
    endpoint_timeout_ms: u64,
    pub idx: u32,
    pub num_endpoints: u32,
    pub concurrency: u32,
    pub rng_seed: u64,
    pub total_endpoint_timeout_ms: u64,
}

impl RunSchedule {
    pub fn new(config: &Config) -> Self {
        let endpoint_timeout_ms =
            config.connection_timeout_ms + 1000 * config.association_timeout_s;
        Self {
            endpoints_increment: config.endpoints_increment,
            concurrency_increment: config.concurrency_increment,
            endpoint_timeout_ms,
            idx: 1,
            num_endpoints: config.num_endpoints,
            concurrency: config.concurrency,
            rng_seed: config.inter_endpoint_pause_rng_seed,
            total_endpoint_timeout_ms: endpoint_timeout_ms * config.num_endpoints as u64,
        }
    }

    /// Step to the next run of the ramp.
    pub fn advance(&mut self) {
        self.idx += 1;
        self.num_endpoints += self.endpoints_increment;
        self.concurrency += self.concurrency_increment;
        self.rng_seed += 1;
        self.total_endpoint_timeout_ms +=
            self.endpoint_timeout_ms * self.endpoints_increment as u64;
    }

    /// Connection attempts this run will make.
    pub fn total_connections(&self) -> u64 {
        self.num_endpoints as u64 * self.concurrency as u64
    }
}

impl fmt::Display for RunSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {}: {} concurrent sets of {} endpoints",
            self.idx, self.concurrency, self.num_endpoints
        )
    }
}

/// Result of one completed run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub num_endpoints: u32,
    pub concurrency: u32,
    pub num_failures: u64,
    pub duration_ms: u64,
    pub stats: Option<TimingSnapshot>,
    start: Instant,
}

impl RunResult {
    /// Start timing a new run.
    pub fn new(run: &RunSchedule) -> Self {
        Self {
            num_endpoints: run.num_endpoints,
            concurrency: run.concurrency,
            num_failures: 0,
            duration_ms: 0,
            stats: None,
            start: Instant::now(),
        }
    }

    /// Stamp the run duration once all Connection Tasks have reported.
    pub fn set_completion(&mut self) {
        self.duration_ms = self.start.elapsed().as_millis() as u64;
    }

    /// Append-only CSV record, stats fields included when collected.
    pub fn to_csv_record(&self) -> String {
        let mut record = format!(
            "{},{},{},{}",
            self.num_endpoints, self.concurrency, self.num_failures, self.duration_ms
        );
        if let Some(stats) = &self.stats {
            record.push(',');
            record.push_str(&stats.to_csv_fields());
        }
        record
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tot_connections = self.num_endpoints as u64 * self.concurrency as u64;
        if self.num_failures > 0 {
            write!(
                f,
                "{}{} connection failures out of {} connection attempts",
                red("  [FAILURE]  "),
                self.num_failures,
                tot_connections
            )?;
        } else {
            write!(
                f,
                "{}{} successful connections",
                green("  [SUCCESS]  "),
                tot_connections
            )?;
        }
        write!(f, " in {}", format_duration_ms(self.duration_ms))
    }
}
