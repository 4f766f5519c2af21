//! Actor wrapper around the synchronous engine.
//!
//! Layout follows the concurrency contract: an ingress/tree actor owns the
//! engine (single writer), a bounded blocking pool runs budget-limited
//! verification, and completions re-enter the actor queue where attachment
//! is serialized by (height, arrival sequence). Verification tasks observe
//! cancellation at budget checkpoints and never leak partial state into
//! the tree. Every cross-actor wait carries a timeout.

use crate::admission::PeerId;
use crate::engine::{ChainView, ConsensusEngine, RevealAdmission, RevealTicket, SubmitStatus};
use crate::events::{ConsensusEvent, HeaderHash};
use crate::pacer::OutboundItem;
use coinjecture_core::errors::ConsensusError;
use coinjecture_core::problem;
use coinjecture_core::types::Reveal;
use coinjecture_network::wire::{decode_message, Message};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Parallel verification slots
const VERIFIER_POOL_SIZE: usize = 4;

/// Bound on the command queue; provides backpressure to ingress
const COMMAND_QUEUE_DEPTH: usize = 256;

/// Every cross-actor wait times out rather than blocking forever
const ACTOR_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum ActorError {
    #[error("engine actor is gone")]
    Closed,

    #[error("engine actor timed out")]
    Timeout,
}

/// Persistable summary of one tree node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeEntry {
    pub parent_hash: HeaderHash,
    pub cumulative_work: f64,
    pub height: u64,
    pub state: u8,
    pub work_score: f64,
}

enum Command {
    SubmitBytes {
        peer: PeerId,
        bytes: Vec<u8>,
        now_secs: i64,
        resp: oneshot::Sender<SubmitStatus>,
    },
    Snapshot {
        resp: oneshot::Sender<ChainView>,
    },
    NodeEntry {
        hash: HeaderHash,
        resp: oneshot::Sender<Option<NodeEntry>>,
    },
    Shutdown,
}

struct Completion {
    peer: PeerId,
    ticket: RevealTicket,
    reveal: Reveal,
    /// None when the task observed cancellation at a checkpoint
    outcome: Option<coinjecture_core::types::VerifyOutcome>,
    arrival: u64,
    resp: oneshot::Sender<SubmitStatus>,
}

/// Handle for submitting work to the engine actor
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
}

impl EngineHandle {
    pub async fn submit_bytes(
        &self,
        peer: PeerId,
        bytes: Vec<u8>,
        now_secs: i64,
    ) -> Result<SubmitStatus, ActorError> {
        let (resp, rx) = oneshot::channel();
        self.commands
            .send(Command::SubmitBytes {
                peer,
                bytes,
                now_secs,
                resp,
            })
            .await
            .map_err(|_| ActorError::Closed)?;
        tokio::time::timeout(ACTOR_TIMEOUT, rx)
            .await
            .map_err(|_| ActorError::Timeout)?
            .map_err(|_| ActorError::Closed)
    }

    pub async fn snapshot(&self) -> Result<ChainView, ActorError> {
        let (resp, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot { resp })
            .await
            .map_err(|_| ActorError::Closed)?;
        tokio::time::timeout(ACTOR_TIMEOUT, rx)
            .await
            .map_err(|_| ActorError::Timeout)?
            .map_err(|_| ActorError::Closed)
    }

    /// Tree entry for a header hash, for persistence layers
    pub async fn node_entry(&self, hash: HeaderHash) -> Result<Option<NodeEntry>, ActorError> {
        let (resp, rx) = oneshot::channel();
        self.commands
            .send(Command::NodeEntry { hash, resp })
            .await
            .map_err(|_| ActorError::Closed)?;
        tokio::time::timeout(ACTOR_TIMEOUT, rx)
            .await
            .map_err(|_| ActorError::Timeout)?
            .map_err(|_| ActorError::Closed)
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

/// Channels the actor publishes into
pub struct EngineOutputs {
    pub events: mpsc::Receiver<ConsensusEvent>,
    pub outbound: mpsc::Receiver<OutboundItem>,
    pub replies: mpsc::Receiver<(PeerId, Message)>,
}

/// Spawn the engine actor and its verifier pool
pub fn spawn_engine(engine: ConsensusEngine) -> (EngineHandle, EngineOutputs, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (event_tx, event_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (outbound_tx, outbound_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (reply_tx, reply_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);

    let actor = EngineActor {
        engine,
        event_tx,
        outbound_tx,
        reply_tx,
        verifier_slots: Arc::new(Semaphore::new(VERIFIER_POOL_SIZE)),
        cancel_flags: HashMap::new(),
        arrival_counter: 0,
        pending_attach: BTreeMap::new(),
    };

    let join = tokio::spawn(actor.run(command_rx));
    (
        EngineHandle {
            commands: command_tx,
        },
        EngineOutputs {
            events: event_rx,
            outbound: outbound_rx,
            replies: reply_rx,
        },
        join,
    )
}

struct EngineActor {
    engine: ConsensusEngine,
    event_tx: mpsc::Sender<ConsensusEvent>,
    outbound_tx: mpsc::Sender<OutboundItem>,
    reply_tx: mpsc::Sender<(PeerId, Message)>,
    verifier_slots: Arc<Semaphore>,
    cancel_flags: HashMap<HeaderHash, Vec<Arc<AtomicBool>>>,
    arrival_counter: u64,
    pending_attach: BTreeMap<(u64, u64), Completion>,
}

impl EngineActor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let (completion_tx, mut completions) = mpsc::channel::<Completion>(COMMAND_QUEUE_DEPTH);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::SubmitBytes { peer, bytes, now_secs, resp }) => {
                        self.handle_bytes(peer, bytes, now_secs, resp, &completion_tx);
                        self.publish().await;
                    }
                    Some(Command::Snapshot { resp }) => {
                        let _ = resp.send(self.engine.snapshot());
                    }
                    Some(Command::NodeEntry { hash, resp }) => {
                        let entry = self.engine.tree().get(&hash).map(|node| NodeEntry {
                            parent_hash: node.parent_hash,
                            cumulative_work: node.cumulative_work,
                            height: node.height,
                            state: node.state.as_u8(),
                            work_score: node.work_score,
                        });
                        let _ = resp.send(entry);
                    }
                    Some(Command::Shutdown) | None => {
                        debug!("engine actor shutting down");
                        return;
                    }
                },
                completion = completions.recv() => {
                    let Some(completion) = completion else { return };
                    // Gather everything already finished, then attach in
                    // (height, arrival) order.
                    self.queue_completion(completion);
                    while let Ok(more) = completions.try_recv() {
                        self.queue_completion(more);
                    }
                    self.drain_attachments();
                    self.publish().await;
                }
            }
        }
    }

    fn queue_completion(&mut self, completion: Completion) {
        self.pending_attach
            .insert((completion.ticket.height, completion.arrival), completion);
    }

    fn drain_attachments(&mut self) {
        while let Some((_, completion)) = self.pending_attach.pop_first() {
            let Completion {
                peer,
                ticket,
                reveal,
                outcome,
                resp,
                ..
            } = completion;

            self.unregister_cancel(&ticket.header_hash);

            let status = match outcome {
                None => {
                    // Cancelled: superior tip made the result irrelevant
                    debug!(height = ticket.height, "verification cancelled");
                    SubmitStatus::Rejected(ConsensusError::ParentUnknown)
                }
                Some(outcome) => {
                    let result = self.engine.attach_reveal(&ticket, reveal, outcome);
                    self.engine.resolve(peer, result)
                }
            };
            let _ = resp.send(status);
        }
        self.cancel_stale();
    }

    fn handle_bytes(
        &mut self,
        peer: PeerId,
        bytes: Vec<u8>,
        now_secs: i64,
        resp: oneshot::Sender<SubmitStatus>,
        completion_tx: &mpsc::Sender<Completion>,
    ) {
        // Reveals detach into the verifier pool; everything else is cheap
        // enough to run on the actor itself.
        let message = match decode_message(&bytes) {
            Ok(message) => message,
            Err(_) => {
                let status = self.engine.on_bytes_in(peer, &bytes, now_secs);
                let _ = resp.send(status);
                return;
            }
        };

        let Message::Reveal {
            header_hash,
            reveal,
        } = message
        else {
            let status = self.engine.on_bytes_in(peer, &bytes, now_secs);
            let _ = resp.send(status);
            return;
        };

        let ticket = match self.engine.admit_reveal(peer, &header_hash, &reveal, now_secs) {
            Err(e) => {
                let status = self.engine.resolve(peer, Err(e));
                let _ = resp.send(status);
                return;
            }
            Ok(RevealAdmission::Duplicate) => {
                let _ = resp.send(SubmitStatus::AcceptedDuplicate);
                return;
            }
            Ok(RevealAdmission::Proceed(ticket)) => ticket,
        };

        // Saturated pool: shed load instead of buffering indefinitely
        let Ok(permit) = Arc::clone(&self.verifier_slots).try_acquire_owned() else {
            warn!(peer, "verifier pool saturated; dropping reveal");
            let _ = resp.send(SubmitStatus::Rejected(ConsensusError::RateLimited));
            return;
        };

        self.arrival_counter += 1;
        let arrival = self.arrival_counter;
        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel_flags
            .entry(ticket.header_hash)
            .or_default()
            .push(Arc::clone(&cancel));

        let completion_tx = completion_tx.clone();
        tokio::task::spawn_blocking(move || {
            let outcome =
                problem::verify_cancellable(&reveal.problem, &reveal.solution, &ticket.budget, &cancel);
            drop(permit);
            let _ = completion_tx.blocking_send(Completion {
                peer,
                ticket,
                reveal,
                outcome,
                arrival,
                resp,
            });
        });
    }

    fn unregister_cancel(&mut self, hash: &HeaderHash) {
        if let Some(flags) = self.cancel_flags.get_mut(hash) {
            flags.pop();
            if flags.is_empty() {
                self.cancel_flags.remove(hash);
            }
        }
    }

    /// Cancel in-flight verifications whose header left the tree (pruned
    /// or expired); they observe the flag at the next budget checkpoint.
    fn cancel_stale(&mut self) {
        for (hash, flags) in &self.cancel_flags {
            if !self.engine.tree().contains(hash) {
                for flag in flags {
                    flag.store(true, Ordering::Relaxed);
                }
            }
        }
    }

    async fn publish(&mut self) {
        for event in self.engine.take_events() {
            if tokio::time::timeout(ACTOR_TIMEOUT, self.event_tx.send(event))
                .await
                .map(|r| r.is_err())
                .unwrap_or(true)
            {
                warn!("event consumer stalled; dropping");
                break;
            }
        }
        for item in self.engine.take_outbound() {
            if self.outbound_tx.try_send(item).is_err() {
                warn!("outbound queue full; pacer will catch up from peers");
                break;
            }
        }
        for reply in self.engine.take_replies() {
            if self.reply_tx.try_send(reply).is_err() {
                break;
            }
        }
    }
}
