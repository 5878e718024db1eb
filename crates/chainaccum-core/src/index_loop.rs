//! The index loop: bootstraps the header store and drives every accumulator.
//!
//! # Startup
//! Compute the global sync point (minimum over every filterer's sync point and
//! the latest protocol upgrade). If the store is uninitialized or has fallen
//! more than `max_sync_blocks` behind it, fast-forward the store and put every
//! filterer into fast mode.
//!
//! # Cycle
//! Pull new headers → tag forks → reconcile into the store → hand the net-new
//! headers to each `Good` handler. A failing handler turns `Broken` and is
//! skipped from then on; the loop and the other handlers carry on.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::accumulator::Accumulator;
use crate::error::IndexerError;
use crate::filterer::Filterer;
use crate::indexer::{AccumulatorHandler, HandlerStatus, IndexerConfig, StatusBoard};
use crate::source::HeaderSource;
use crate::store::HeaderStore;
use crate::types::{AccumulatorObject, Header, Headers};
use crate::upgrade::UpgradeForkWatcher;

/// Follows the chain and keeps every accumulator's state current.
///
/// Build one with [`IndexerBuilder`](crate::builder::IndexerBuilder). Dropping
/// the indexer stops its loop task.
pub struct Indexer {
    config: IndexerConfig,
    store: Arc<dyn HeaderStore>,
    source: Arc<dyn HeaderSource>,
    watcher: Arc<dyn UpgradeForkWatcher>,
    accumulators: Vec<Arc<dyn Accumulator>>,
    board: StatusBoard,
    /// Moved into the loop task by [`index`](Self::index).
    handlers: Option<Vec<AccumulatorHandler>>,
    task: Option<JoinHandle<()>>,
    /// Child of the caller's token; cancelled on drop.
    stop: Option<CancellationToken>,
}

impl Indexer {
    pub(crate) fn new(
        config: IndexerConfig,
        store: Arc<dyn HeaderStore>,
        source: Arc<dyn HeaderSource>,
        watcher: Arc<dyn UpgradeForkWatcher>,
        pairs: Vec<(Arc<dyn Accumulator>, Box<dyn Filterer>)>,
    ) -> Self {
        let board = StatusBoard::new(pairs.len());
        let accumulators = pairs.iter().map(|(a, _)| Arc::clone(a)).collect();
        let handlers = pairs
            .into_iter()
            .enumerate()
            .map(|(i, (acc, filterer))| AccumulatorHandler::new(i, acc, filterer, board.clone()))
            .collect();
        Self {
            config,
            store,
            source,
            watcher,
            accumulators,
            board,
            handlers: Some(handlers),
            task: None,
            stop: None,
        }
    }

    /// Bootstrap, then start the background loop and return immediately.
    ///
    /// The loop runs until `cancel` fires or the indexer is dropped. If
    /// bootstrapping fails the indexer is left unstarted and `index` may be
    /// called again. Once the loop has started, an indexer cannot be restarted;
    /// build a new one instead.
    pub async fn index(&mut self, cancel: CancellationToken) -> Result<(), IndexerError> {
        let mut handlers = self.handlers.take().ok_or(IndexerError::AlreadyRunning)?;

        if let Err(e) = self.bootstrap(&mut handlers).await {
            self.handlers = Some(handlers);
            return Err(e);
        }

        let index_loop = IndexLoop {
            store: Arc::clone(&self.store),
            source: Arc::clone(&self.source),
            watcher: Arc::clone(&self.watcher),
            handlers,
            poll_interval: self.config.poll_interval(),
        };
        let stop = cancel.child_token();
        self.task = Some(tokio::spawn(index_loop.run(stop.clone())));
        self.stop = Some(stop);
        Ok(())
    }

    /// Wait for the loop task to exit (after its cancellation token fires).
    pub async fn join(&mut self) -> Result<(), IndexerError> {
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| IndexerError::Other(format!("index loop task failed: {e}"))),
            None => Ok(()),
        }
    }

    pub async fn get_latest_header(&self, finalized: bool) -> Result<Header, IndexerError> {
        self.store.get_latest_header(finalized).await
    }

    /// Object of handler `index` attached at or before `header`.
    pub async fn get_object(
        &self,
        header: &Header,
        index: usize,
    ) -> Result<AccumulatorObject, IndexerError> {
        let accumulator = self.accumulator(index)?;
        let (object, _) = self.store.get_object(header, accumulator.as_ref()).await?;
        Ok(object)
    }

    /// Latest object of handler `index`, with the header it is attached to.
    pub async fn get_latest_object(
        &self,
        index: usize,
        finalized: bool,
    ) -> Result<(AccumulatorObject, Header), IndexerError> {
        let accumulator = self.accumulator(index)?;
        self.store
            .get_latest_object(accumulator.as_ref(), finalized)
            .await
    }

    /// Current status of handler `index`. Never waits on the loop.
    pub fn handler_status(&self, index: usize) -> Result<HandlerStatus, IndexerError> {
        self.board.get(index).ok_or(IndexerError::InvalidHandler(index))
    }

    pub fn handler_count(&self) -> usize {
        self.accumulators.len()
    }

    fn accumulator(&self, index: usize) -> Result<&Arc<dyn Accumulator>, IndexerError> {
        self.accumulators
            .get(index)
            .ok_or(IndexerError::InvalidHandler(index))
    }

    async fn bootstrap(&self, handlers: &mut [AccumulatorHandler]) -> Result<(), IndexerError> {
        let mut initialized = true;
        for handler in handlers.iter() {
            match self
                .store
                .get_latest_object(handler.accumulator.as_ref(), false)
                .await
            {
                Ok(_) => {}
                Err(e) if e.is_empty_state() => {
                    initialized = false;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        let latest_finalized = self.source.pull_latest_header(true).await?;
        let sync_from = sync_from_block(handlers, self.watcher.as_ref(), &latest_finalized).await?;

        let fast_forward = match self.store.get_latest_header(true).await {
            Ok(local) if initialized => {
                sync_from.saturating_sub(local.number) > self.config.max_sync_blocks
            }
            _ => true,
        };

        info!(
            chain_finalized = latest_finalized.number,
            sync_from,
            initialized,
            fast_forward,
            "Indexer bootstrap"
        );

        if fast_forward {
            self.store.fast_forward().await?;
            for handler in handlers.iter_mut() {
                handler.filterer.set_sync_point(&latest_finalized).await?;
            }
        }
        Ok(())
    }
}

impl Drop for Indexer {
    fn drop(&mut self) {
        if let Some(stop) = &self.stop {
            stop.cancel();
        }
    }
}

/// Lowest height any accumulator (or the latest upgrade) needs retained.
pub(crate) async fn sync_from_block(
    handlers: &[AccumulatorHandler],
    watcher: &dyn UpgradeForkWatcher,
    latest: &Header,
) -> Result<u64, IndexerError> {
    let mut sync_from = watcher.get_latest_upgrade(latest);
    for handler in handlers {
        sync_from = sync_from.min(handler.filterer.get_sync_point(latest).await?);
    }
    Ok(sync_from)
}

// ─── Loop task ────────────────────────────────────────────────────────────────

struct IndexLoop {
    store: Arc<dyn HeaderStore>,
    source: Arc<dyn HeaderSource>,
    watcher: Arc<dyn UpgradeForkWatcher>,
    handlers: Vec<AccumulatorHandler>,
    poll_interval: Duration,
}

impl IndexLoop {
    async fn run(mut self, cancel: CancellationToken) {
        info!(handlers = self.handlers.len(), "Index loop started");
        while !cancel.is_cancelled() {
            if self.cycle().await {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }
        info!("Index loop stopped");
    }

    /// One indexing cycle. Returns `true` if the loop should sleep afterwards.
    async fn cycle(&mut self) -> bool {
        let last = match self.store.get_latest_header(true).await {
            Ok(h) => Some(h),
            Err(e) if e.is_empty_state() => None,
            Err(e) => {
                error!(error = %e, "Failed to read latest finalized header");
                return true;
            }
        };

        let (headers, is_head) = match self.source.pull_new_headers(last.as_ref()).await {
            Ok(pulled) => pulled,
            Err(e) => {
                error!(error = %e, "Failed to pull new headers");
                return true;
            }
        };

        if headers.is_empty() {
            return is_head;
        }

        let tagged = self.watcher.detect_upgrade(headers);
        let new_headers = match self.store.add_headers(&tagged).await {
            Ok(new_headers) => new_headers,
            Err(e) => {
                error!(error = %e, structural = e.is_structural(), "Failed to reconcile headers");
                return true;
            }
        };

        debug!(
            pulled = tagged.len(),
            new = new_headers.len(),
            is_head,
            "Header batch reconciled"
        );

        if !new_headers.is_empty() {
            for handler in self.handlers.iter_mut() {
                if handler.status() != HandlerStatus::Good {
                    continue;
                }
                if let Err(e) = handle_accumulator(self.store.as_ref(), handler, &new_headers).await {
                    handler.mark_broken(&e);
                }
            }
        }

        is_head
    }
}

/// Feed `headers` through one handler's filterer and accumulator.
async fn handle_accumulator(
    store: &dyn HeaderStore,
    handler: &mut AccumulatorHandler,
    headers: &Headers,
) -> Result<(), IndexerError> {
    let accumulator = Arc::clone(&handler.accumulator);

    let (bootstrap, headers) = handler.filterer.filter_fast_mode(headers.clone()).await?;
    if let Some(bootstrap) = bootstrap {
        let object = accumulator.initialize_object(&bootstrap)?;
        store
            .attach_object(&object, &bootstrap, accumulator.as_ref())
            .await?;
        info!(
            accumulator = accumulator.name(),
            number = bootstrap.number,
            hash = %bootstrap.hash_hex(),
            "Accumulator bootstrapped"
        );
    }

    if headers.is_empty() {
        return Ok(());
    }

    let (mut object, _) = store
        .get_latest_object(accumulator.as_ref(), false)
        .await?;

    for item in handler.filterer.filter_headers(&headers).await? {
        if item.events.is_empty() {
            continue;
        }
        for event in &item.events {
            object = accumulator.update_object(object, &item.header, event)?;
        }
        store
            .attach_object(&object, &item.header, accumulator.as_ref())
            .await?;
        debug!(
            accumulator = accumulator.name(),
            number = item.header.number,
            events = item.events.len(),
            "Object attached"
        );
    }
    Ok(())
}
