// Node service
// Wires storage, the engine actor, and the gossip pacer; exposes submit()

use anyhow::{Context, Result};
use coinjecture_consensus::engine::{ConsensusEngine, SubmitStatus};
use coinjecture_consensus::events::ConsensusEvent;
use coinjecture_consensus::miner::BlockProducer;
use coinjecture_consensus::pacer::{spawn_pacer, OutboundItem};
use coinjecture_consensus::{spawn_engine, EngineHandle, PeerId};
use coinjecture_core::codec;
use coinjecture_core::commitment::epoch_salt;
use coinjecture_core::crypto::KeyPair;
use coinjecture_core::params::ChainParams;
use coinjecture_core::types::HardwareTier;
use coinjecture_network::wire::{encode_message, Message};
use coinjecture_storage::{ChainStore, StateTransition, TreeEntry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Peer id reserved for locally produced blocks
const LOCAL_PEER: PeerId = 0;

pub struct NodeService {
    params: ChainParams,
    store: Arc<ChainStore>,
    handle: EngineHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeService {
    /// Open the store, replay the consensus log, and spawn the actors
    pub async fn start(params: ChainParams, store: ChainStore) -> Result<Self> {
        let mut engine = ConsensusEngine::new(params.clone())
            .context("building consensus engine")?;

        // Recovery: replay accepted headers/reveals in height order. The
        // log is our own; the rate gate does not apply to it.
        let chain = store.load_chain().context("loading consensus log")?;
        let mut replayed = 0usize;
        for (header, reveal) in chain {
            engine.replay_accepted(header, reveal);
            replayed += 1;
        }
        if replayed > 0 {
            info!(blocks = replayed, height = engine.snapshot().tip.height, "chain recovered");
        }
        // Replay produces no new outbound traffic
        engine.take_outbound();
        engine.take_events();

        let store = Arc::new(store);
        let (handle, outputs, engine_task) = spawn_engine(engine);

        // Pacer: outbound items from the engine, batches to the transport
        let (pace_tx, pace_rx) = mpsc::channel::<OutboundItem>(256);
        let (batch_tx, batch_rx) = mpsc::channel(64);
        let pacer_task = spawn_pacer(params.gossip_pace_hz, pace_rx, batch_tx);

        let mut tasks = vec![engine_task, pacer_task];
        tasks.push(tokio::spawn(forward_outbound(outputs.outbound, pace_tx)));
        tasks.push(tokio::spawn(log_batches(batch_rx)));
        tasks.push(tokio::spawn(persist_events(
            outputs.events,
            Arc::clone(&store),
            handle.clone(),
            params.clone(),
        )));
        tasks.push(tokio::spawn(drop_replies(outputs.replies)));

        Ok(Self {
            params,
            store,
            handle,
            tasks,
        })
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    fn persister(&self) -> Persister {
        Persister {
            handle: self.handle.clone(),
            store: Arc::clone(&self.store),
        }
    }

    /// The submit surface an ingress shim calls; bytes pass through
    /// untouched (the shim must not re-canonicalize).
    pub async fn submit(&self, peer: PeerId, bytes: Vec<u8>) -> Result<SubmitStatus> {
        let now = chrono::Utc::now().timestamp();
        let status = self
            .handle
            .submit_bytes(peer, bytes.clone(), now)
            .await
            .context("engine actor unavailable")?;

        if matches!(status, SubmitStatus::Accepted) {
            self.persister().persist_accepted(&bytes).await?;
        }
        Ok(status)
    }

    /// Local block production loop; submits through the same byte surface
    /// peers use, so pacing and persistence apply uniformly.
    pub fn start_producer(&self, seed: [u8; 32], tier: HardwareTier, every: Duration) {
        let producer = BlockProducer::new(KeyPair::from_seed(&seed), tier, self.params.clone());
        let handle = self.handle.clone();
        let store = Arc::clone(&self.store);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;

                let Ok(view) = handle.snapshot().await else { return };
                if view.safe_mode {
                    warn!("engine in safe mode; producer idle");
                    continue;
                }

                let now = chrono::Utc::now().timestamp();
                let target = view.target_for(tier);
                let produced = producer.produce_at(view.tip, target, now, Vec::new(), None);
                let (header, reveal) = match produced {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "block production failed");
                        continue;
                    }
                };

                let Ok(hash) = codec::header_hash(&header) else { continue };
                let header_msg = match encode_message(&Message::Header(header)) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(error = %e, "header encoding failed");
                        continue;
                    }
                };
                let reveal_msg = match encode_message(&Message::Reveal {
                    header_hash: hash,
                    reveal,
                }) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(error = %e, "reveal encoding failed");
                        continue;
                    }
                };

                for bytes in [header_msg, reveal_msg] {
                    match handle.submit_bytes(LOCAL_PEER, bytes.clone(), now).await {
                        Ok(SubmitStatus::Accepted) => {
                            let persister = Persister {
                                handle: handle.clone(),
                                store: Arc::clone(&store),
                            };
                            if let Err(e) = persister.persist_accepted(&bytes).await {
                                warn!(error = %e, "persisting own block failed");
                            }
                        }
                        Ok(status) => debug!(?status, "own block not accepted"),
                        Err(e) => {
                            warn!(error = %e, "engine unavailable; producer stopping");
                            return;
                        }
                    }
                }
                info!(height = view.tip.height + 1, "produced block");
            }
        });
    }

    pub async fn shutdown(self) {
        self.handle.shutdown().await;
        for task in self.tasks {
            task.abort();
            let _ = task.await;
        }
    }
}

/// Writes an accepted message and the tree/tip columns it touched
struct Persister {
    handle: EngineHandle,
    store: Arc<ChainStore>,
}

impl Persister {
    async fn persist_accepted(&self, bytes: &[u8]) -> Result<()> {
        use coinjecture_network::wire::decode_message;

        let Ok(message) = decode_message(bytes) else {
            return Ok(());
        };

        let mut transition = StateTransition::default();
        match &message {
            Message::Header(header) => {
                let hash = codec::header_hash(header)?;
                transition.header = Some((hash, codec::encode(header)?));
                self.fill_tree_entry(&mut transition, hash).await;
            }
            Message::Reveal {
                header_hash,
                reveal,
            } => {
                transition.reveal = Some((*header_hash, codec::encode(reveal)?));
                self.fill_tree_entry(&mut transition, *header_hash).await;
                if let Ok(view) = self.handle.snapshot().await {
                    transition.tip = Some(view.tip.header_hash);
                }
            }
            _ => return Ok(()),
        }

        self.store
            .apply(&transition)
            .context("persisting transition")?;
        Ok(())
    }

    async fn fill_tree_entry(&self, transition: &mut StateTransition, hash: [u8; 32]) {
        if let Ok(Some(entry)) = self.handle.node_entry(hash).await {
            transition.tree_entries.push((
                hash,
                TreeEntry {
                    parent_hash: entry.parent_hash,
                    cumulative_work: entry.cumulative_work,
                    height: entry.height,
                    state: entry.state,
                    work_score: entry.work_score,
                },
            ));
        }
    }
}

async fn forward_outbound(
    mut outbound: mpsc::Receiver<OutboundItem>,
    pace_tx: mpsc::Sender<OutboundItem>,
) {
    while let Some(item) = outbound.recv().await {
        if pace_tx.send(item).await.is_err() {
            return;
        }
    }
}

/// Transport is out of scope; broadcast batches are logged for the shim
async fn log_batches(mut batches: mpsc::Receiver<Vec<OutboundItem>>) {
    while let Some(batch) = batches.recv().await {
        info!(items = batch.len(), "broadcast batch ready");
    }
}

async fn drop_replies(
    mut replies: mpsc::Receiver<(PeerId, coinjecture_network::wire::Message)>,
) {
    while let Some((peer, _)) = replies.recv().await {
        debug!(peer, "reply ready for transport shim");
    }
}

/// Persist finality and epoch metadata as the engine commits them
async fn persist_events(
    mut events: mpsc::Receiver<ConsensusEvent>,
    store: Arc<ChainStore>,
    handle: EngineHandle,
    params: ChainParams,
) {
    while let Some(event) = events.recv().await {
        let mut transition = StateTransition::default();
        match &event {
            ConsensusEvent::Finalized { hashes } => {
                for hash in hashes {
                    if let Ok(Some(entry)) = handle.node_entry(*hash).await {
                        transition.finalized.push((entry.height, *hash));
                    }
                }
            }
            ConsensusEvent::EpochRollover { epoch } => {
                let Ok(salt) = epoch_salt(*epoch, &params.network_id) else {
                    continue;
                };
                if let Ok(view) = handle.snapshot().await {
                    transition.epoch_meta = Some((
                        *epoch,
                        ChainStore::epoch_meta_record(salt, &view.difficulty_targets),
                    ));
                }
            }
            ConsensusEvent::Reorg { unwound, applied } => {
                debug!(
                    unwound = unwound.len(),
                    applied = applied.len(),
                    "reorg committed"
                );
                continue;
            }
            _ => continue,
        }

        if let Err(e) = store.apply(&transition) {
            warn!(error = %e, "event persistence failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinjecture_core::codec::header_hash;
    use tempfile::TempDir;

    fn test_params() -> ChainParams {
        ChainParams {
            network_id: "coinjecture-test".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submit_and_recover() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chain.redb");

        // Produce one block against a scratch engine sharing the genesis
        let scratch = ConsensusEngine::new(test_params()).unwrap();
        let producer = BlockProducer::new(
            KeyPair::from_seed(&[4u8; 32]),
            HardwareTier::Desktop,
            test_params(),
        );
        let now = chrono::Utc::now().timestamp();
        let (header, reveal) = producer.produce(&scratch, now, Vec::new()).unwrap();
        let hash = header_hash(&header).unwrap();

        {
            let store = ChainStore::open(&path).unwrap();
            let service = NodeService::start(test_params(), store).await.unwrap();

            let header_bytes = encode_message(&Message::Header(header)).unwrap();
            let reveal_bytes = encode_message(&Message::Reveal {
                header_hash: hash,
                reveal,
            })
            .unwrap();

            assert_eq!(
                service.submit(7, header_bytes).await.unwrap(),
                SubmitStatus::Accepted
            );
            assert_eq!(
                service.submit(7, reveal_bytes).await.unwrap(),
                SubmitStatus::Accepted
            );

            let view = service.handle().snapshot().await.unwrap();
            assert_eq!(view.tip.height, 1);
            service.shutdown().await;
        }

        // Restart: recovery replays the log and lands on the same tip
        let store = ChainStore::open(&path).unwrap();
        let service = NodeService::start(test_params(), store).await.unwrap();
        let view = service.handle().snapshot().await.unwrap();
        assert_eq!(view.tip.height, 1);
        assert_eq!(view.tip.header_hash, hash);
        service.shutdown().await;
    }
}
