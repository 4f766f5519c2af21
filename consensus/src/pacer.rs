//! Gossip pacer: bounds outbound header/reveal broadcasts to the
//! critically-damped interval.
//!
//! The broadcast interval is I = 1/λ with λ = 1/√2, the marginal-stability
//! boundary of the two-state propagation/absorption model - the fastest
//! response without oscillation. Pending items queue; each tick flushes the
//! whole queue as one batch in enqueue order. Deviating from the interval
//! breaks no consensus rule, it only raises reorg exposure.

use coinjecture_core::types::{BlockHeader, Reveal};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// An item awaiting broadcast
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundItem {
    Header(Box<BlockHeader>),
    Reveal {
        header_hash: [u8; 32],
        reveal: Box<Reveal>,
    },
}

/// Synchronous pacing queue; the async task below drives it on a timer
pub struct GossipPacer {
    queue: VecDeque<OutboundItem>,
    interval: Duration,
}

impl GossipPacer {
    pub fn new(pace_hz: f64) -> Self {
        Self {
            queue: VecDeque::new(),
            interval: interval_for(pace_hz),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn enqueue(&mut self, item: OutboundItem) {
        self.queue.push_back(item);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Drain the queue as one batch, enqueue order preserved
    pub fn flush(&mut self) -> Vec<OutboundItem> {
        self.queue.drain(..).collect()
    }
}

/// Broadcast interval for a pacing rate
pub fn interval_for(pace_hz: f64) -> Duration {
    Duration::from_secs_f64(1.0 / pace_hz)
}

/// Spawn the pacer actor: items in, batches out on each tick.
///
/// Closes when the item channel closes; a final flush empties the queue.
pub fn spawn_pacer(
    pace_hz: f64,
    mut items: mpsc::Receiver<OutboundItem>,
    batches: mpsc::Sender<Vec<OutboundItem>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pacer = GossipPacer::new(pace_hz);
        let mut ticker = tokio::time::interval(pacer.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                item = items.recv() => match item {
                    Some(item) => {
                        trace!(pending = pacer.pending() + 1, "pacer enqueued");
                        pacer.enqueue(item);
                    }
                    None => {
                        let batch = pacer.flush();
                        if !batch.is_empty() {
                            let _ = batches.send(batch).await;
                        }
                        debug!("pacer shut down");
                        return;
                    }
                },
                _ = ticker.tick() => {
                    if pacer.pending() > 0 {
                        let batch = pacer.flush();
                        debug!(batch = batch.len(), "pacer flushed");
                        if batches.send(batch).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    })
}
