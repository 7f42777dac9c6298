//! Supply side of partition rebalancing.
//!
//! A node that is about to own a partition demands its data from a node
//! that already owns it. The supplier answers each demand with bounded
//! batches and suspends between demands, so a multi-gigabyte partition is
//! streamed over many round-trips without holding it in memory or tying up
//! a worker.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SupplyPool                            │
//! │   lane 0 ─┐   lane 1 ─┐   ...   (hash(requester, topic))      │
//! │           ▼           ▼                                      │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │                    SupplyEngine                        │  │
//! │  │  take context ─▶ reserve ─▶ iterate ─▶ batch ─▶ send  │  │
//! │  │        ▲                                   │           │  │
//! │  │        └──────── put context (suspend) ◀───┘           │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! │   SupplyContextStore            CompletionRegistry           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Phases
//!
//! Every partition is read in three phases, in order:
//!
//! 1. **Local entries**: the in-memory entries.
//! 2. **Overflow entries**: the overflow tier, if enabled. An overflow
//!    listener is attached on entry so that entries relocated to the
//!    overflow tier during the scan are not lost.
//! 3. **Captured entries**: whatever the listener captured, after it is
//!    detached.
//!
//! Before every entry the engine checks that the partition still belongs
//! to the requester. If it does not, the partition is reported as missed
//! and the requester asks another owner for the rest.
//!
//! # Flow control
//!
//! - A batch is flushed once it reaches `batch_size_bytes`.
//! - After `max_flushes_per_call` flushes the session is suspended until the
//!   requester demands again.
//! - An optional throttle pauses between flushes.

mod context;
mod engine;
mod pool;
mod source;

pub use context::{
    CompletionRegistry, PartitionSupply, SupplyContext, SupplyContextStore, SupplyPhase,
};
pub use engine::{DeploymentResolver, PreloadPredicate, SupplyEngine};
pub use pool::SupplyPool;
