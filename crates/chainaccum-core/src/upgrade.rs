//! Protocol upgrade (fork) detection.
//!
//! Headers are tagged with the fork they belong to before they reach the
//! header store, so accumulator objects can be serialized with the right
//! layout. The height of the latest upgrade also bounds fast-forward: a
//! bootstrap must never straddle two serialization rules.

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::types::{Header, Headers, UpgradeFork};

/// Tags headers with their fork and reports upgrade heights.
pub trait UpgradeForkWatcher: Send + Sync {
    /// Return `headers` with `current_fork` and `is_upgrade` set.
    fn detect_upgrade(&self, headers: Headers) -> Headers;

    /// Height of the most recent upgrade at or before `header` (0 if none).
    fn get_latest_upgrade(&self, header: &Header) -> u64;
}

/// A fork that activates at a fixed height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkActivation {
    pub fork: UpgradeFork,
    pub height: u64,
}

impl ForkActivation {
    pub fn new(fork: impl Into<UpgradeFork>, height: u64) -> Self {
        Self {
            fork: fork.into(),
            height,
        }
    }
}

/// Watcher for upgrades pinned to known heights.
#[derive(Debug, Clone, Default)]
pub struct HeightForkWatcher {
    /// Sorted by height, ascending.
    schedule: Vec<ForkActivation>,
}

impl HeightForkWatcher {
    pub fn new(mut schedule: Vec<ForkActivation>) -> Result<Self, IndexerError> {
        schedule.sort_by_key(|a| a.height);
        if let Some(w) = schedule.windows(2).find(|w| w[0].height == w[1].height) {
            return Err(IndexerError::Config(format!(
                "forks '{}' and '{}' both activate at height {}",
                w[0].fork, w[1].fork, w[0].height
            )));
        }
        Ok(Self { schedule })
    }

    fn active_at(&self, number: u64) -> Option<&ForkActivation> {
        self.schedule.iter().rev().find(|a| a.height <= number)
    }
}

impl UpgradeForkWatcher for HeightForkWatcher {
    fn detect_upgrade(&self, headers: Headers) -> Headers {
        headers
            .into_iter()
            .map(|header| {
                let (fork, is_upgrade) = match self.active_at(header.number) {
                    Some(a) => (a.fork.clone(), a.height == header.number),
                    None => (UpgradeFork::genesis(), false),
                };
                if is_upgrade {
                    tracing::info!(number = header.number, fork = %fork, "upgrade boundary");
                }
                header.with_fork(fork, is_upgrade)
            })
            .collect()
    }

    fn get_latest_upgrade(&self, header: &Header) -> u64 {
        self.active_at(header.number).map(|a| a.height).unwrap_or(0)
    }
}
