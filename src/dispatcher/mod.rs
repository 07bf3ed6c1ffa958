// Connection Task dispatcher
//
// One task connects its batch of clients serially, pacing each
// connection with the schedule it was given. Tasks for the same run
// execute on parallel worker threads; this module is the body of one
// such worker.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::client::BrokerClient;
use crate::console::format_duration_ms;
use crate::error::BrokerLoadTestError;
use crate::pacing::PacingSchedule;
use crate::stats::{Phase, TimingCollector};

/// What happened to a single endpoint of a Connection Task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointOutcome {
    /// Connected and still associated after the pacing pause.
    Connected,
    /// Connected, then the association did not survive the pause.
    LostAssociation,
    /// The connection attempt itself failed.
    ConnectFailed,
    /// The client failed in some way other than the connection attempt.
    ClientFailed,
}

impl EndpointOutcome {
    /// Failure-kind label for the stats collector, None on success.
    pub fn failure_label(self) -> Option<&'static str> {
        match self {
            EndpointOutcome::Connected => None,
            EndpointOutcome::LostAssociation => Some("lost_association"),
            EndpointOutcome::ConnectFailed => Some("connect_error"),
            EndpointOutcome::ClientFailed => Some("client_error"),
        }
    }

    pub fn is_failure(self) -> bool {
        self.failure_label().is_some()
    }
}

/// Result of one completed Connection Task. The clients ride along so
/// the caller can hand them to the keep-alive thread or close them.
pub struct TaskOutcome {
    pub task_id: usize,
    pub num_failures: u64,
    pub clients: Vec<Box<dyn BrokerClient>>,
}

/// Connect one endpoint, record its timings, pace, and verify the
/// association held. Every path spends the pause so pacing stays
/// uniform whether the endpoint succeeded or not.
fn connect_and_verify(
    client: &mut dyn BrokerClient,
    pause: Duration,
    collector: Option<&TimingCollector>,
) -> EndpointOutcome {
    match client.connect(1) {
        Ok(()) => {}
        Err(BrokerLoadTestError::ConnectionError(e)) => {
            warn!(
                "failed to connect ({}) - will wait {} ms",
                e,
                pause.as_millis()
            );
            std::thread::sleep(pause);
            return EndpointOutcome::ConnectFailed;
        }
        Err(e) => {
            warn!(
                "unexpected error for client {} ({}) - will wait {} ms",
                client.name(),
                e,
                pause.as_millis()
            );
            std::thread::sleep(pause);
            return EndpointOutcome::ClientFailed;
        }
    }

    let mut associated = client.is_associated();
    if let Some(collector) = collector {
        let timings = client.connection_timings();
        collector.record(Phase::Tcp, timings.tcp);
        collector.record(Phase::WsHandshake, timings.opening_handshake);
        if associated {
            collector.record(Phase::Association, client.association_timings().association);
        }
    }

    std::thread::sleep(pause);
    associated &= client.is_associated();
    if !associated {
        warn!(
            "client {} is not associated after {} ms",
            client.name(),
            pause.as_millis()
        );
        return EndpointOutcome::LostAssociation;
    }
    EndpointOutcome::Connected
}

/// Run one Connection Task to completion: connect every client in the
/// batch serially and count the endpoints that failed.
pub fn run_connection_task(
    task_id: usize,
    mut clients: Vec<Box<dyn BrokerClient>>,
    schedule: &PacingSchedule,
    collector: Option<&TimingCollector>,
) -> TaskOutcome {
    let start = Instant::now();
    let mut num_failures: u64 = 0;

    for (idx, client) in clients.iter_mut().enumerate() {
        let pause = schedule.pause_for(idx);
        let outcome = connect_and_verify(client.as_mut(), pause, collector);
        if let Some(label) = outcome.failure_label() {
            num_failures += 1;
            if let Some(collector) = collector {
                collector.record_failure_kind(label);
            }
        }
    }

    // Session durations so far, for the clients that are still up
    if let Some(collector) = collector {
        for client in &clients {
            if client.is_associated() {
                collector.record(Phase::Session, client.association_timings().session);
            }
        }
    }

    info!(
        "Connection Task {}: completed in {}",
        task_id,
        format_duration_ms(start.elapsed().as_millis() as u64)
    );

    TaskOutcome {
        task_id,
        num_failures,
        clients,
    }
}
