//! Fluent builder API for creating indexers.
//!
//! # Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use chainaccum_core::{Accumulator, Filterer, HeaderSource, IndexerBuilder};
//! # fn example(
//! #     source: Arc<dyn HeaderSource>,
//! #     acc: Arc<dyn Accumulator>,
//! #     filterer: Box<dyn Filterer>,
//! # ) -> Result<(), chainaccum_core::IndexerError> {
//! let indexer = IndexerBuilder::new()
//!     .poll_interval_ms(1_000)
//!     .max_sync_blocks(32)
//!     .fork("exodus", 1_200_000)
//!     .source(source)
//!     .accumulator(acc, filterer)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use crate::accumulator::Accumulator;
use crate::error::IndexerError;
use crate::filterer::Filterer;
use crate::index_loop::Indexer;
use crate::indexer::IndexerConfig;
use crate::source::HeaderSource;
use crate::store::{HeaderStore, MemoryHeaderStore};
use crate::upgrade::{ForkActivation, HeightForkWatcher, UpgradeForkWatcher};

/// Fluent builder for [`Indexer`].
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
    store: Option<Arc<dyn HeaderStore>>,
    source: Option<Arc<dyn HeaderSource>>,
    watcher: Option<Arc<dyn UpgradeForkWatcher>>,
    handlers: Vec<(Arc<dyn Accumulator>, Box<dyn Filterer>)>,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: IndexerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the polling interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Set the fast-forward threshold in blocks.
    pub fn max_sync_blocks(mut self, blocks: u64) -> Self {
        self.config.max_sync_blocks = blocks;
        self
    }

    /// Schedule a protocol upgrade at a fixed height.
    pub fn fork(mut self, name: &str, height: u64) -> Self {
        self.config.forks.push(ForkActivation::new(name, height));
        self
    }

    /// Use a specific header store (defaults to [`MemoryHeaderStore`]).
    pub fn store(mut self, store: Arc<dyn HeaderStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the chain header source. Required.
    pub fn source(mut self, source: Arc<dyn HeaderSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Use a custom fork watcher instead of the height schedule in the config.
    pub fn watcher(mut self, watcher: Arc<dyn UpgradeForkWatcher>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    /// Register an accumulator and its filterer. Handler indices follow
    /// registration order.
    pub fn accumulator(mut self, accumulator: Arc<dyn Accumulator>, filterer: Box<dyn Filterer>) -> Self {
        self.handlers.push((accumulator, filterer));
        self
    }

    /// Validate and build the [`Indexer`].
    pub fn build(self) -> Result<Indexer, IndexerError> {
        self.config.validate()?;

        let source = self
            .source
            .ok_or_else(|| IndexerError::Config("a header source is required".into()))?;

        let mut names = HashSet::new();
        for (acc, _) in &self.handlers {
            if !names.insert(acc.name().to_string()) {
                return Err(IndexerError::Config(format!(
                    "duplicate accumulator name '{}'",
                    acc.name()
                )));
            }
        }

        let watcher = match self.watcher {
            Some(w) => w,
            None => Arc::new(HeightForkWatcher::new(self.config.forks.clone())?),
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryHeaderStore::new()));

        Ok(Indexer::new(self.config, store, source, watcher, self.handlers))
    }
}
