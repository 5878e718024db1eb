//! Header store: the authoritative local chain plus accumulator snapshots.
//!
//! The store reconciles incoming header batches (see [`crate::reorg`]) and
//! keeps serialized accumulator objects attached to canonical headers. Objects
//! attached to headers that a reorg orphans are dropped along with them.

use async_trait::async_trait;

use crate::accumulator::Accumulator;
use crate::error::IndexerError;
use crate::types::{AccumulatorObject, Header, Headers};

/// Trait for the local chain store.
///
/// Implementations include [`MemoryHeaderStore`] and the SQLite store in
/// `chainaccum-storage`. Every method must appear atomic to concurrent readers.
#[async_trait]
pub trait HeaderStore: Send + Sync {
    /// Reconcile `headers` into the local chain and return the net-new headers.
    ///
    /// Headers already held are refreshed (e.g. their finalized flag). Fails
    /// without mutating anything if the batch is unordered or does not connect.
    async fn add_headers(&self, headers: &Headers) -> Result<Headers, IndexerError>;

    /// Latest header, or latest finalized header if `finalized`.
    async fn get_latest_header(&self, finalized: bool) -> Result<Header, IndexerError>;

    /// Persist `object` as `accumulator`'s state as of `header`.
    async fn attach_object(
        &self,
        object: &AccumulatorObject,
        header: &Header,
        accumulator: &dyn Accumulator,
    ) -> Result<(), IndexerError>;

    /// Object attached at the latest header at or before `header`, plus that header.
    async fn get_object(
        &self,
        header: &Header,
        accumulator: &dyn Accumulator,
    ) -> Result<(AccumulatorObject, Header), IndexerError>;

    /// Like [`get_object`](Self::get_object), anchored at the (finalized) tip.
    async fn get_latest_object(
        &self,
        accumulator: &dyn Accumulator,
        finalized: bool,
    ) -> Result<(AccumulatorObject, Header), IndexerError>;

    /// Discard the whole local chain and every attached object.
    async fn fast_forward(&self) -> Result<(), IndexerError>;
}

// ─── In-memory store ──────────────────────────────────────────────────────────

use std::collections::{BTreeMap, HashMap};

use tokio::sync::RwLock;

use crate::reorg::{plan_reconcile, LocalWindow};
use crate::types::{BlockHash, UpgradeFork};

#[derive(Debug, Clone)]
struct Attachment {
    block_hash: BlockHash,
    fork: UpgradeFork,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct ChainState {
    /// Canonical chain, dense and ascending.
    headers: Vec<Header>,
    /// accumulator name → height → serialized object.
    objects: HashMap<String, BTreeMap<u64, Attachment>>,
}

impl ChainState {
    fn window(&self) -> Option<LocalWindow> {
        match (self.headers.first(), self.headers.last()) {
            (Some(first), Some(last)) => Some(LocalWindow {
                earliest: first.number,
                tip: last.number,
            }),
            _ => None,
        }
    }

    fn index_of(&self, number: u64) -> Option<usize> {
        let first = self.headers.first()?.number;
        let index = usize::try_from(number.checked_sub(first)?).ok()?;
        (index < self.headers.len()).then_some(index)
    }

    fn get(&self, number: u64) -> Option<&Header> {
        self.index_of(number).map(|i| &self.headers[i])
    }

    /// The held header matching `header` by height and hash.
    fn canonical(&self, header: &Header) -> Option<&Header> {
        self.get(header.number).filter(|h| h.equals(header))
    }

    fn latest(&self, finalized: bool) -> Result<&Header, IndexerError> {
        self.headers
            .iter()
            .rev()
            .find(|h| !finalized || h.finalized)
            .ok_or(IndexerError::NoHeaders)
    }

    fn rewind_to(&mut self, number: u64) {
        if let Some(i) = self.index_of(number) {
            self.headers.truncate(i + 1);
        }
        for attachments in self.objects.values_mut() {
            attachments.retain(|n, _| *n <= number);
        }
    }

    fn object_at_or_before(
        &self,
        header: &Header,
        accumulator: &dyn Accumulator,
    ) -> Result<(AccumulatorObject, Header), IndexerError> {
        if self.canonical(header).is_none() {
            return Err(IndexerError::NotFound);
        }
        let (number, attachment) = self
            .objects
            .get(accumulator.name())
            .and_then(|a| a.range(..=header.number).next_back())
            .ok_or(IndexerError::NotFound)?;
        let attached_to = self
            .get(*number)
            .filter(|h| h.block_hash == attachment.block_hash)
            .ok_or(IndexerError::NotFound)?;
        let object = accumulator.deserialize_object(&attachment.data, &attachment.fork)?;
        Ok((object, attached_to.clone()))
    }
}

/// In-memory header store for tests and ephemeral indexers.
///
/// All data is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryHeaderStore {
    state: RwLock<ChainState>,
}

impl MemoryHeaderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of headers currently held.
    pub async fn len(&self) -> usize {
        self.state.read().await.headers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl HeaderStore for MemoryHeaderStore {
    async fn add_headers(&self, headers: &Headers) -> Result<Headers, IndexerError> {
        let mut state = self.state.write().await;
        let plan = plan_reconcile(headers, state.window(), |n| {
            state.get(n).map(|h| h.block_hash)
        })?;

        for header in headers.iter().take(plan.known) {
            if let Some(i) = state.index_of(header.number) {
                if state.headers[i].equals(header) {
                    state.headers[i] = header.clone();
                }
            }
        }
        if let Some(number) = plan.rewind_to {
            state.rewind_to(number);
        }

        let new_headers = plan.new_headers(headers);
        state.headers.extend(new_headers.iter().cloned());

        tracing::debug!(
            received = headers.len(),
            added = new_headers.len(),
            tip = ?state.headers.last().map(|h| h.number),
            "headers reconciled"
        );
        Ok(new_headers)
    }

    async fn get_latest_header(&self, finalized: bool) -> Result<Header, IndexerError> {
        self.state.read().await.latest(finalized).cloned()
    }

    async fn attach_object(
        &self,
        object: &AccumulatorObject,
        header: &Header,
        accumulator: &dyn Accumulator,
    ) -> Result<(), IndexerError> {
        let fork = header.current_fork.clone();
        let data = accumulator.serialize_object(object, &fork)?;

        let mut state = self.state.write().await;
        if state.canonical(header).is_none() {
            return Err(IndexerError::NotFound);
        }
        state
            .objects
            .entry(accumulator.name().to_string())
            .or_default()
            .insert(
                header.number,
                Attachment {
                    block_hash: header.block_hash,
                    fork,
                    data,
                },
            );
        Ok(())
    }

    async fn get_object(
        &self,
        header: &Header,
        accumulator: &dyn Accumulator,
    ) -> Result<(AccumulatorObject, Header), IndexerError> {
        self.state.read().await.object_at_or_before(header, accumulator)
    }

    async fn get_latest_object(
        &self,
        accumulator: &dyn Accumulator,
        finalized: bool,
    ) -> Result<(AccumulatorObject, Header), IndexerError> {
        let state = self.state.read().await;
        let anchor = state.latest(finalized)?;
        state.object_at_or_before(anchor, accumulator)
    }

    async fn fast_forward(&self) -> Result<(), IndexerError> {
        let mut state = self.state.write().await;
        *state = ChainState::default();
        tracing::info!("header store fast-forwarded");
        Ok(())
    }
}
