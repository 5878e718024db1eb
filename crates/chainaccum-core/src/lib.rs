//! chainaccum-core: reorg-aware chain follower that folds filtered events
//! into per-accumulator state snapshots.
//!
//! # Architecture
//!
//! ```text
//! IndexerBuilder → Indexer ──spawn──► IndexLoop
//!                                        ├── HeaderSource        (pull headers from the chain)
//!                                        ├── UpgradeForkWatcher  (tag headers with their fork)
//!                                        ├── HeaderStore         (reconcile reorgs, keep objects)
//!                                        └── AccumulatorHandler* (Filterer → Accumulator)
//! ```

pub mod accumulator;
pub mod builder;
pub mod error;
pub mod filterer;
pub mod index_loop;
pub mod indexer;
pub mod reorg;
pub mod source;
pub mod store;
pub mod types;
pub mod upgrade;

#[cfg(test)]
mod testing;

pub use accumulator::Accumulator;
pub use builder::IndexerBuilder;
pub use error::IndexerError;
pub use filterer::{EventExtractor, FastMode, Filterer, StandardFilterer};
pub use index_loop::Indexer;
pub use indexer::{AccumulatorHandler, HandlerStatus, IndexerConfig, DEFAULT_MAX_SYNC_BLOCKS};
pub use reorg::{plan_reconcile, LocalWindow, ReconcilePlan};
pub use source::HeaderSource;
pub use store::{HeaderStore, MemoryHeaderStore};
pub use types::{
    AccumulatorObject, BlockHash, Event, Header, HeaderAndEvents, Headers, UpgradeFork,
    GENESIS_FORK,
};
pub use upgrade::{ForkActivation, HeightForkWatcher, UpgradeForkWatcher};

pub use tokio_util::sync::CancellationToken;
