//! Shared fixtures for unit tests: header chains, a counting accumulator with
//! two fork layouts, an event extractor and a scripted header source.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::accumulator::Accumulator;
use crate::error::IndexerError;
use crate::filterer::EventExtractor;
use crate::source::HeaderSource;
use crate::types::{AccumulatorObject, BlockHash, Event, Header, Headers, UpgradeFork};

/// Deterministic hash for block `number` on branch `tag`.
pub fn hash(tag: &str, number: u64) -> BlockHash {
    let mut h = [0u8; 32];
    h[..8].copy_from_slice(&number.to_be_bytes());
    for (i, b) in tag.bytes().take(23).enumerate() {
        h[8 + i] = b;
    }
    h[31] = 0xff;
    h
}

/// `count` linked headers on branch `tag`, starting at height `start`.
pub fn chain(tag: &str, start: u64, count: u64) -> Headers {
    (start..start + count)
        .map(|n| {
            let parent = match n {
                0 => [0u8; 32],
                _ => hash(tag, n - 1),
            };
            Header::new(n, hash(tag, n), parent)
        })
        .collect()
}

/// `count` headers on branch `tag` built on top of `parent`.
pub fn branch(tag: &str, parent: &Header, count: u64) -> Vec<Header> {
    let mut prev = parent.block_hash;
    (parent.number + 1..=parent.number + count)
        .map(|n| {
            let h = Header::new(n, hash(tag, n), prev);
            prev = h.block_hash;
            h
        })
        .collect()
}

// ─── CountingAccumulator ──────────────────────────────────────────────────────

/// State of [`CountingAccumulator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub count: u64,
    pub sum: u64,
}

/// Counts `credit` events and sums their `amount`.
///
/// `genesis` objects are JSON; `exodus` objects are two big-endian u64s.
pub struct CountingAccumulator {
    name: String,
    fail_at: Option<u64>,
    updates: Arc<AtomicUsize>,
}

impl CountingAccumulator {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail_at: None,
            updates: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail every update applied at height `number`.
    pub fn failing_at(mut self, number: u64) -> Self {
        self.fail_at = Some(number);
        self
    }

    /// Handle on the number of `update_object` calls.
    pub fn updates(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.updates)
    }
}

impl Accumulator for CountingAccumulator {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize_object(&self, _header: &Header) -> Result<AccumulatorObject, IndexerError> {
        AccumulatorObject::from_state(&Tally { count: 0, sum: 0 })
    }

    fn update_object(
        &self,
        object: AccumulatorObject,
        header: &Header,
        event: &Event,
    ) -> Result<AccumulatorObject, IndexerError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(header.number) {
            return Err(IndexerError::accumulator(&self.name, "poisoned header"));
        }
        let mut tally: Tally = object.to_state()?;
        tally.count += 1;
        tally.sum += event.payload["amount"].as_u64().unwrap_or(0);
        AccumulatorObject::from_state(&tally)
    }

    fn serialize_object(
        &self,
        object: &AccumulatorObject,
        fork: &UpgradeFork,
    ) -> Result<Vec<u8>, IndexerError> {
        let tally: Tally = object.to_state()?;
        match fork.as_str() {
            "genesis" => Ok(serde_json::to_vec(&tally)?),
            "exodus" => {
                let mut out = tally.count.to_be_bytes().to_vec();
                out.extend_from_slice(&tally.sum.to_be_bytes());
                Ok(out)
            }
            other => Err(IndexerError::Serialization(format!("unknown fork {other}"))),
        }
    }

    fn deserialize_object(
        &self,
        data: &[u8],
        fork: &UpgradeFork,
    ) -> Result<AccumulatorObject, IndexerError> {
        let tally = match fork.as_str() {
            "genesis" => serde_json::from_slice::<Tally>(data)?,
            "exodus" => {
                let bytes: [u8; 16] = data
                    .try_into()
                    .map_err(|_| IndexerError::Serialization("bad exodus layout".into()))?;
                let mut count = [0u8; 8];
                let mut sum = [0u8; 8];
                count.copy_from_slice(&bytes[..8]);
                sum.copy_from_slice(&bytes[8..]);
                Tally {
                    count: u64::from_be_bytes(count),
                    sum: u64::from_be_bytes(sum),
                }
            }
            other => return Err(IndexerError::Serialization(format!("unknown fork {other}"))),
        };
        AccumulatorObject::from_state(&tally)
    }
}

// ─── NumberExtractor ──────────────────────────────────────────────────────────

/// Emits one `credit` event (amount = height) on every `every`-th height.
pub struct NumberExtractor {
    every: u64,
}

impl NumberExtractor {
    pub fn every(every: u64) -> Self {
        Self { every: every.max(1) }
    }
}

#[async_trait]
impl EventExtractor for NumberExtractor {
    async fn extract(&self, header: &Header) -> Result<Vec<Event>, IndexerError> {
        if header.number % self.every != 0 {
            return Ok(vec![]);
        }
        Ok(vec![Event::new(
            "credit",
            serde_json::json!({ "amount": header.number }),
        )])
    }
}

// ─── ScriptedSource ───────────────────────────────────────────────────────────

/// Header source that replays queued batches, then reports being at head.
#[derive(Default)]
pub struct ScriptedSource {
    batches: Mutex<VecDeque<Result<Headers, String>>>,
    latest_finalized: Mutex<Option<Header>>,
    pulls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, headers: Headers) {
        self.batches.lock().await.push_back(Ok(headers));
    }

    pub async fn push_error(&self, reason: &str) {
        self.batches.lock().await.push_back(Err(reason.to_string()));
    }

    pub async fn set_latest_finalized(&self, header: Header) {
        *self.latest_finalized.lock().await = Some(header);
    }

    pub async fn pending(&self) -> usize {
        self.batches.lock().await.len()
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HeaderSource for ScriptedSource {
    async fn pull_new_headers(
        &self,
        _last_header: Option<&Header>,
    ) -> Result<(Headers, bool), IndexerError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        let mut batches = self.batches.lock().await;
        match batches.pop_front() {
            Some(Ok(headers)) => Ok((headers, batches.is_empty())),
            Some(Err(reason)) => Err(IndexerError::Source(reason)),
            None => Ok((Headers::default(), true)),
        }
    }

    async fn pull_latest_header(&self, _finalized: bool) -> Result<Header, IndexerError> {
        self.latest_finalized
            .lock()
            .await
            .clone()
            .ok_or_else(|| IndexerError::Source("no latest header".into()))
    }
}
