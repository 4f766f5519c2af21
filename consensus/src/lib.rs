//! COINjecture consensus: admission control, block tree and fork choice,
//! difficulty adjustment, gossip pacing, and the engine that drives the
//! pipeline ingress -> admission -> verification -> attachment -> events.
//!
//! The synchronous [`engine::ConsensusEngine`] is the deterministic core;
//! [`actor`] wraps it in the tokio actor layout (ingress/tree actor,
//! bounded verifier pool, pacer) without changing its semantics.

pub mod actor;
pub mod admission;
pub mod difficulty;
pub mod engine;
pub mod events;
pub mod miner;
pub mod pacer;
pub mod tree;

pub use actor::{spawn_engine, ActorError, EngineHandle, EngineOutputs, NodeEntry};
pub use admission::{AdmissionGate, PeerId};
pub use engine::{genesis_header, ChainView, ConsensusEngine, SubmitStatus};
pub use events::ConsensusEvent;
pub use miner::BlockProducer;
pub use pacer::{spawn_pacer, GossipPacer, OutboundItem};
pub use tree::{BlockNode, BlockTree, ChainTip, NodeState};
