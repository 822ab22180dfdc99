//! Periodic state broadcast to every connected client

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, trace};

use crate::ws::protocol::ServerMsg;

use super::server::Outbox;
use super::snapshot::DiffBuilder;

/// Turns published snapshots into diffs on its own clock, independent of
/// the tick rate.
pub struct BroadcastLoop {
    outbox: Arc<Outbox>,
    sender: broadcast::Sender<ServerMsg>,
    diff: DiffBuilder,
    period: Duration,
}

impl BroadcastLoop {
    pub fn new(outbox: Arc<Outbox>, sender: broadcast::Sender<ServerMsg>, rate_hz: u32) -> Self {
        Self {
            outbox,
            sender,
            diff: DiffBuilder::new(),
            period: Duration::from_micros(1_000_000 / rate_hz.max(1) as u64),
        }
    }

    pub async fn run(mut self) {
        info!(period_ms = self.period.as_millis() as u64, "Broadcast loop started");

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.flush();
        }
    }

    /// Send one round of messages, returns how many went out.
    pub fn flush(&mut self) -> usize {
        let (snapshot, events) = self.outbox.take();
        let messages = self.diff.build(&snapshot, events);
        let count = messages.len();

        for msg in messages {
            // no subscribers is fine, the diff baseline still advances
            if self.sender.send(msg).is_err() {
                trace!(tick = snapshot.tick, "No clients to broadcast to");
                break;
            }
        }
        count
    }
}
