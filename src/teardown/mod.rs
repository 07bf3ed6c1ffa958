// Connection teardown
//
// Groups map onto the Connection Tasks (or keep-alive intake batches)
// that produced the clients. With several groups, each one closes on
// its own worker thread to keep large teardowns bounded.

use std::thread;

use tracing::warn;

use crate::client::BrokerClient;

/// Close every client in every group. Close failures are logged and do
/// not stop the rest of the group.
pub fn close_all(groups: Vec<Vec<Box<dyn BrokerClient>>>) {
    if groups.len() > 1 {
        let mut workers = Vec::with_capacity(groups.len());
        for group in groups {
            workers.push(thread::spawn(move || close_group(group)));
        }
        for worker in workers {
            if worker.join().is_err() {
                warn!("connection close worker panicked");
            }
        }
    } else {
        for group in groups {
            close_group(group);
        }
    }
}

fn close_group(mut group: Vec<Box<dyn BrokerClient>>) {
    for client in group.iter_mut() {
        if let Err(e) = client.close() {
            warn!(
                "failed to close connection for client {} ({})",
                client.name(),
                e
            );
        }
    }
}
