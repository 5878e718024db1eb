//! Indexer configuration and per-accumulator handler state.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::accumulator::Accumulator;
use crate::error::IndexerError;
use crate::filterer::Filterer;
use crate::upgrade::ForkActivation;

/// Default gap (in blocks) between the local finalized header and the global
/// sync point beyond which the indexer fast-forwards instead of catching up.
pub const DEFAULT_MAX_SYNC_BLOCKS: u64 = 10;

/// Configuration for an indexer instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Polling interval, also used as the backoff after transient errors (milliseconds).
    pub poll_interval_ms: u64,
    /// Fast-forward threshold. Chains with short block times may want more.
    #[serde(default = "default_max_sync_blocks")]
    pub max_sync_blocks: u64,
    /// Height-pinned protocol upgrades.
    #[serde(default)]
    pub forks: Vec<ForkActivation>,
}

fn default_max_sync_blocks() -> u64 {
    DEFAULT_MAX_SYNC_BLOCKS
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            max_sync_blocks: DEFAULT_MAX_SYNC_BLOCKS,
            forks: vec![],
        }
    }
}

impl IndexerConfig {
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.poll_interval_ms == 0 {
            return Err(IndexerError::Config(
                "poll interval must be a positive duration".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ─── HandlerStatus ────────────────────────────────────────────────────────────

/// Health of one accumulator handler. `Broken` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandlerStatus {
    /// Processed every cycle.
    Good,
    /// Failed once; skipped for the rest of the process lifetime.
    Broken,
}

impl std::fmt::Display for HandlerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Good => write!(f, "good"),
            Self::Broken => write!(f, "broken"),
        }
    }
}

/// Lock-free view of every handler's status, readable while the loop runs.
#[derive(Debug, Clone)]
pub(crate) struct StatusBoard(Arc<[AtomicU8]>);

impl StatusBoard {
    const GOOD: u8 = 0;
    const BROKEN: u8 = 1;

    pub(crate) fn new(len: usize) -> Self {
        Self((0..len).map(|_| AtomicU8::new(Self::GOOD)).collect())
    }

    pub(crate) fn get(&self, index: usize) -> Option<HandlerStatus> {
        self.0.get(index).map(|s| match s.load(Ordering::Acquire) {
            Self::BROKEN => HandlerStatus::Broken,
            _ => HandlerStatus::Good,
        })
    }

    fn publish(&self, index: usize, status: HandlerStatus) {
        if let Some(slot) = self.0.get(index) {
            let v = match status {
                HandlerStatus::Good => Self::GOOD,
                HandlerStatus::Broken => Self::BROKEN,
            };
            slot.store(v, Ordering::Release);
        }
    }
}

// ─── AccumulatorHandler ───────────────────────────────────────────────────────

/// Binds one accumulator to its filterer and runtime health.
///
/// Owned by the index loop task; nothing else mutates it.
pub struct AccumulatorHandler {
    pub(crate) index: usize,
    pub(crate) accumulator: Arc<dyn Accumulator>,
    pub(crate) filterer: Box<dyn Filterer>,
    status: HandlerStatus,
    board: StatusBoard,
}

impl AccumulatorHandler {
    pub(crate) fn new(
        index: usize,
        accumulator: Arc<dyn Accumulator>,
        filterer: Box<dyn Filterer>,
        board: StatusBoard,
    ) -> Self {
        Self {
            index,
            accumulator,
            filterer,
            status: HandlerStatus::Good,
            board,
        }
    }

    pub fn name(&self) -> &str {
        self.accumulator.name()
    }

    pub fn status(&self) -> HandlerStatus {
        self.status
    }

    pub(crate) fn mark_broken(&mut self, reason: &IndexerError) {
        tracing::warn!(
            accumulator = self.name(),
            index = self.index,
            error = %reason,
            "accumulator handler broken"
        );
        self.status = HandlerStatus::Broken;
        self.board.publish(self.index, HandlerStatus::Broken);
    }
}
