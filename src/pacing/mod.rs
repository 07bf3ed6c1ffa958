// Pacing generator module
//
// Pure computation module that produces the inter-endpoint pause
// schedule for each Connection Task before the task threads start.
// Does not sleep itself - the dispatcher applies the pauses serially.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Exp};

use crate::error::BrokerLoadTestError;

/// Draws exponentially distributed pauses whose mean equals the
/// configured inter-endpoint pause. The rate parameter is the mean
/// connection rate in Hz (1000 / mean_pause_ms); samples come out in
/// seconds and are rounded to whole milliseconds.
#[derive(Debug)]
pub struct ExponentialPacer {
    rng: StdRng,
    dist: Exp<f64>,
}

impl ExponentialPacer {
    /// Create a pacer with the given mean pause and deterministic seed.
    pub fn new(mean_pause_ms: u64, seed: u64) -> Result<Self, BrokerLoadTestError> {
        if mean_pause_ms == 0 {
            return Err(BrokerLoadTestError::ConfigError(
                "mean inter-endpoint pause must be greater than 0 ms".to_string(),
            ));
        }
        let rate_hz = 1000.0 / mean_pause_ms as f64;
        let dist = Exp::new(rate_hz).map_err(|e| {
            BrokerLoadTestError::ConfigError(format!(
                "invalid connection rate {} Hz: {}",
                rate_hz, e
            ))
        })?;
        Ok(Self {
            rng: StdRng::seed_from_u64(seed),
            dist,
        })
    }

    /// Next pause, rounded to whole milliseconds.
    pub fn next_pause(&mut self) -> Duration {
        let seconds = self.dist.sample(&mut self.rng);
        Duration::from_millis((seconds * 1000.0).round() as u64)
    }
}

/// Pause schedule for one Connection Task.
///
/// - Constant: a single value every endpoint waits after connecting.
/// - PerEndpoint: one pre-drawn randomized pause per endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacingSchedule {
    Constant(Duration),
    PerEndpoint(Vec<Duration>),
}

impl PacingSchedule {
    /// Pause to apply after connecting endpoint `idx`.
    pub fn pause_for(&self, idx: usize) -> Duration {
        match self {
            Self::Constant(pause) => *pause,
            Self::PerEndpoint(pauses) => pauses[idx],
        }
    }

    /// Total pause the schedule adds to a task of `num_endpoints`.
    pub fn total_pause(&self, num_endpoints: u32) -> Duration {
        match self {
            Self::Constant(pause) => *pause * num_endpoints,
            Self::PerEndpoint(pauses) => pauses.iter().sum(),
        }
    }
}

/// Pacing for all Connection Tasks of one run.
///
/// `max_total_pause` is the largest per-task total; the run timeout
/// budget adds it to the per-endpoint timeouts so that a fully paced
/// task is not declared timed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPacing {
    pub schedules: Vec<PacingSchedule>,
    pub max_total_pause: Duration,
}

impl RunPacing {
    /// Constant pacing: every task gets the same single-valued schedule.
    pub fn constant(num_endpoints: u32, concurrency: u32, pause_ms: u64) -> Self {
        let pause = Duration::from_millis(pause_ms);
        let schedules = vec![PacingSchedule::Constant(pause); concurrency as usize];
        Self {
            max_total_pause: pause * num_endpoints,
            schedules,
        }
    }

    /// Randomized pacing: draw one pause per endpoint for every task.
    pub fn randomized(num_endpoints: u32, concurrency: u32, pacer: &mut ExponentialPacer) -> Self {
        let mut schedules = Vec::with_capacity(concurrency as usize);
        let mut max_total_pause = Duration::ZERO;

        for _ in 0..concurrency {
            let pauses: Vec<Duration> =
                (0..num_endpoints).map(|_| pacer.next_pause()).collect();
            let total: Duration = pauses.iter().sum();
            if total > max_total_pause {
                max_total_pause = total;
            }
            schedules.push(PacingSchedule::PerEndpoint(pauses));
        }

        Self {
            schedules,
            max_total_pause,
        }
    }
}
