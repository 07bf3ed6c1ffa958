// Timing statistics module

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Connection phases tracked by the collector.
///
/// TCP establishment and the WebSocket opening handshake are measured
/// in microseconds; association and session lifetime in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Tcp,
    WsHandshake,
    Association,
    Session,
}

/// Per-phase duration buffers, sharded to reduce lock contention when
/// many Connection Task threads record at once.
struct PhaseBuffers {
    shards: Vec<Mutex<Vec<Duration>>>,
}

impl PhaseBuffers {
    fn new(shard_count: usize) -> Self {
        Self {
            shards: (0..shard_count).map(|_| Mutex::new(Vec::new())).collect(),
        }
    }

    fn record(&self, shard_idx: usize, duration: Duration) {
        self.shards[shard_idx].lock().unwrap().push(duration);
    }

    fn merged(&self) -> Vec<Duration> {
        let mut all = Vec::new();
        for shard in &self.shards {
            let guard = shard.lock().unwrap();
            all.extend_from_slice(&guard);
        }
        all
    }
}

/// Thread-safe collector for connection timings and failure tallies.
/// Shared by the Connection Task threads of one run; the orchestrator
/// takes a snapshot once all tasks have reported.
pub struct TimingCollector {
    tcp: PhaseBuffers,
    ws_handshake: PhaseBuffers,
    association: PhaseBuffers,
    session: PhaseBuffers,
    failure_kinds: DashMap<String, AtomicU64>,
    shard_count: usize,
}

impl TimingCollector {
    pub fn new() -> Self {
        let shard_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            tcp: PhaseBuffers::new(shard_count),
            ws_handshake: PhaseBuffers::new(shard_count),
            association: PhaseBuffers::new(shard_count),
            session: PhaseBuffers::new(shard_count),
            failure_kinds: DashMap::new(),
            shard_count,
        }
    }

    /// Record a duration for one connection phase.
    pub fn record(&self, phase: Phase, duration: Duration) {
        let idx = self.shard_index();
        match phase {
            Phase::Tcp => self.tcp.record(idx, duration),
            Phase::WsHandshake => self.ws_handshake.record(idx, duration),
            Phase::Association => self.association.record(idx, duration),
            Phase::Session => self.session.record(idx, duration),
        }
    }

    /// Count one failure of the given kind.
    pub fn record_failure_kind(&self, kind: &str) {
        self.failure_kinds
            .entry(kind.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Select a shard based on the current thread ID.
    fn shard_index(&self) -> usize {
        let thread_id = std::thread::current().id();
        let hash = format!("{:?}", thread_id);
        let mut h: usize = 0;
        for b in hash.bytes() {
            h = h.wrapping_mul(31).wrapping_add(b as usize);
        }
        h % self.shard_count
    }

    /// Take a snapshot of everything recorded so far.
    pub fn snapshot(&self) -> TimingSnapshot {
        let mut failure_map = HashMap::new();
        for entry in self.failure_kinds.iter() {
            failure_map.insert(entry.key().clone(), entry.value().load(Ordering::Relaxed));
        }

        TimingSnapshot {
            tcp: PhaseSummary::from_durations(&self.tcp.merged()),
            ws_handshake: PhaseSummary::from_durations(&self.ws_handshake.merged()),
            association: PhaseSummary::from_durations(&self.association.merged()),
            session: PhaseSummary::from_durations(&self.session.merged()),
            failure_kinds: failure_map,
        }
    }
}

impl Default for TimingCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// count/min/mean/max summary of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub count: u64,
    pub min: Duration,
    pub mean: Duration,
    pub max: Duration,
}

impl PhaseSummary {
    pub fn from_durations(durations: &[Duration]) -> Self {
        if durations.is_empty() {
            return Self {
                count: 0,
                min: Duration::ZERO,
                mean: Duration::ZERO,
                max: Duration::ZERO,
            };
        }

        let mut min = durations[0];
        let mut max = durations[0];
        let mut total_nanos: u128 = 0;
        for &d in durations {
            if d < min {
                min = d;
            }
            if d > max {
                max = d;
            }
            total_nanos += d.as_nanos();
        }
        let mean = Duration::from_nanos((total_nanos / durations.len() as u128) as u64);

        Self {
            count: durations.len() as u64,
            min,
            mean,
            max,
        }
    }

    /// CSV fields in microseconds: `count,min,mean,max` with one
    /// decimal on the mean.
    pub fn to_csv_fields_us(&self) -> String {
        format!(
            "{},{},{:.1},{}",
            self.count,
            self.min.as_micros(),
            self.mean.as_secs_f64() * 1_000_000.0,
            self.max.as_micros()
        )
    }

    /// CSV fields in milliseconds: `count,min,mean,max` with one
    /// decimal on the mean.
    pub fn to_csv_fields_ms(&self) -> String {
        format!(
            "{},{},{:.1},{}",
            self.count,
            self.min.as_millis(),
            self.mean.as_secs_f64() * 1000.0,
            self.max.as_millis()
        )
    }
}

/// A point-in-time snapshot of collected timings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingSnapshot {
    pub tcp: PhaseSummary,
    pub ws_handshake: PhaseSummary,
    pub association: PhaseSummary,
    pub session: PhaseSummary,
    pub failure_kinds: HashMap<String, u64>,
}

impl TimingSnapshot {
    /// Stats segment of a CSV record: 16 numeric fields, microseconds
    /// for TCP and handshake, milliseconds for association and session.
    pub fn to_csv_fields(&self) -> String {
        format!(
            "{},{},{},{}",
            self.tcp.to_csv_fields_us(),
            self.ws_handshake.to_csv_fields_us(),
            self.association.to_csv_fields_ms(),
            self.session.to_csv_fields_ms()
        )
    }
}

impl fmt::Display for TimingSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "                connection stats (count/min/mean/max):")?;
        writeln!(
            f,
            "                  tcp us: {}/{}/{:.1}/{}",
            self.tcp.count,
            self.tcp.min.as_micros(),
            self.tcp.mean.as_secs_f64() * 1_000_000.0,
            self.tcp.max.as_micros()
        )?;
        writeln!(
            f,
            "                  ws open handshake us: {}/{}/{:.1}/{}",
            self.ws_handshake.count,
            self.ws_handshake.min.as_micros(),
            self.ws_handshake.mean.as_secs_f64() * 1_000_000.0,
            self.ws_handshake.max.as_micros()
        )?;
        writeln!(
            f,
            "                  association ms: {}/{}/{:.1}/{}",
            self.association.count,
            self.association.min.as_millis(),
            self.association.mean.as_secs_f64() * 1000.0,
            self.association.max.as_millis()
        )?;
        write!(
            f,
            "                  session ms: {}/{}/{:.1}/{}",
            self.session.count,
            self.session.min.as_millis(),
            self.session.mean.as_secs_f64() * 1000.0,
            self.session.max.as_millis()
        )
    }
}
