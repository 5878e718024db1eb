//! Shared types for the indexing pipeline.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// 32-byte block hash.
pub type BlockHash = [u8; 32];

/// Name of the fork the default schedule starts in.
pub const GENESIS_FORK: &str = "genesis";

// ─── UpgradeFork ──────────────────────────────────────────────────────────────

/// Identifier of a protocol fork. Accumulator objects are serialized per fork.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpgradeFork(String);

impl UpgradeFork {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn genesis() -> Self {
        Self::new(GENESIS_FORK)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UpgradeFork {
    fn default() -> Self {
        Self::genesis()
    }
}

impl fmt::Display for UpgradeFork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UpgradeFork {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ─── Header ───────────────────────────────────────────────────────────────────

/// One block of the source chain. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub block_hash: BlockHash,
    pub parent_hash: BlockHash,
    /// Block height.
    pub number: u64,
    /// The source guarantees this header will not be reorganized away.
    pub finalized: bool,
    /// Fork this header belongs to (set by the upgrade fork watcher).
    pub current_fork: UpgradeFork,
    /// `true` if a fork activates at this header.
    pub is_upgrade: bool,
}

impl Header {
    /// An unfinalized header in the genesis fork.
    pub fn new(number: u64, block_hash: BlockHash, parent_hash: BlockHash) -> Self {
        Self {
            block_hash,
            parent_hash,
            number,
            finalized: false,
            current_fork: UpgradeFork::genesis(),
            is_upgrade: false,
        }
    }

    pub fn with_finalized(mut self, finalized: bool) -> Self {
        self.finalized = finalized;
        self
    }

    pub fn with_fork(mut self, fork: UpgradeFork, is_upgrade: bool) -> Self {
        self.current_fork = fork;
        self.is_upgrade = is_upgrade;
        self
    }

    /// Returns `true` if `prev` is the direct parent of `self`.
    pub fn after(&self, prev: &Header) -> bool {
        self.parent_hash == prev.block_hash
    }

    /// Hash equality.
    pub fn equals(&self, other: &Header) -> bool {
        self.block_hash == other.block_hash
    }

    pub fn hash_hex(&self) -> String {
        format!("0x{}", hex::encode(self.block_hash))
    }
}

// ─── Headers ──────────────────────────────────────────────────────────────────

/// A contiguous run of headers, oldest first.
///
/// Sequences are rebuilt rather than edited; there is no mutation API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(Vec<Header>);

impl Headers {
    pub fn new(headers: Vec<Header>) -> Self {
        Self(headers)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn first(&self) -> Option<&Header> {
        self.0.first()
    }

    pub fn last(&self) -> Option<&Header> {
        self.0.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Header> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Header] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<Header> {
        self.0
    }

    /// Every adjacent pair satisfies `headers[i].parent_hash == headers[i-1].block_hash`.
    pub fn is_ordered(&self) -> bool {
        self.0.windows(2).all(|w| w[1].after(&w[0]))
    }

    /// Returns `HeadersUnordered` unless the sequence is ordered.
    pub fn ok(&self) -> Result<(), IndexerError> {
        if self.is_ordered() {
            Ok(())
        } else {
            Err(IndexerError::HeadersUnordered)
        }
    }

    /// O(1) lookup by height, assuming the sequence is dense and ordered.
    pub fn get_header_by_number(&self, number: u64) -> Result<&Header, IndexerError> {
        let first = self
            .first()
            .ok_or(IndexerError::HeaderNotFound { number })?;
        let index = number
            .checked_sub(first.number)
            .ok_or(IndexerError::HeaderNotFound { number })?;
        usize::try_from(index)
            .ok()
            .and_then(|i| self.0.get(i))
            .ok_or(IndexerError::HeaderNotFound { number })
    }

    /// A new sequence holding `headers[from..]` (empty if `from` is past the end).
    pub fn suffix(&self, from: usize) -> Headers {
        Headers(self.0.get(from..).map(<[Header]>::to_vec).unwrap_or_default())
    }
}

impl From<Vec<Header>> for Headers {
    fn from(headers: Vec<Header>) -> Self {
        Self(headers)
    }
}

impl FromIterator<Header> for Headers {
    fn from_iter<I: IntoIterator<Item = Header>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Headers {
    type Item = Header;
    type IntoIter = std::vec::IntoIter<Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a Header;
    type IntoIter = std::slice::Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ─── Events ───────────────────────────────────────────────────────────────────

/// A chain event relevant to one accumulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event kind (e.g. `"OperatorRegistered"`).
    pub event_type: String,
    /// Event fields as JSON.
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

/// One header plus the events a filterer extracted from it, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderAndEvents {
    pub header: Header,
    pub events: Vec<Event>,
}

// ─── AccumulatorObject ────────────────────────────────────────────────────────

/// Opaque derived-state snapshot for one accumulator at one header.
///
/// The core never looks inside; accumulators use [`from_state`](Self::from_state)
/// and [`to_state`](Self::to_state) to work with their own typed state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccumulatorObject(serde_json::Value);

impl AccumulatorObject {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn from_state<T: Serialize>(state: &T) -> Result<Self, IndexerError> {
        Ok(Self(serde_json::to_value(state)?))
    }

    pub fn to_state<T: DeserializeOwned>(&self) -> Result<T, IndexerError> {
        Ok(serde_json::from_value(self.0.clone())?)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{chain, hash};

    #[test]
    fn header_after_parent() {
        let parent = Header::new(100, hash("a", 100), hash("a", 99));
        let child = Header::new(101, hash("a", 101), hash("a", 100));
        assert!(child.after(&parent));
        assert!(!parent.after(&child));
    }

    #[test]
    fn header_equals_is_hash_equality() {
        let a = Header::new(5, hash("a", 5), hash("a", 4));
        let b = a.clone().with_finalized(true);
        let c = Header::new(5, hash("b", 5), hash("a", 4));
        assert!(a.equals(&b));
        assert!(!a.equals(&c));
    }

    #[test]
    fn ordered_sequence() {
        let headers = chain("a", 10, 5);
        assert!(headers.is_ordered());
        assert!(headers.ok().is_ok());
        assert_eq!(headers.first().unwrap().number, 10);
        assert_eq!(headers.last().unwrap().number, 14);
        assert_eq!(headers.len(), 5);
    }

    #[test]
    fn unordered_sequence_rejected() {
        let mut list = chain("a", 0, 4).into_vec();
        list.swap(1, 2);
        let headers = Headers::from(list);
        assert!(!headers.is_ordered());
        assert!(matches!(headers.ok(), Err(IndexerError::HeadersUnordered)));
    }

    #[test]
    fn empty_and_single_sequences_are_ordered() {
        assert!(Headers::default().is_ordered());
        assert!(Headers::default().is_empty());
        assert!(chain("a", 3, 1).is_ordered());
    }

    #[test]
    fn get_header_by_number_uses_offset() {
        let headers = chain("a", 100, 5);
        assert_eq!(headers.get_header_by_number(102).unwrap().number, 102);
        assert!(matches!(
            headers.get_header_by_number(99),
            Err(IndexerError::HeaderNotFound { number: 99 })
        ));
        assert!(matches!(
            headers.get_header_by_number(105),
            Err(IndexerError::HeaderNotFound { number: 105 })
        ));
        assert!(Headers::default().get_header_by_number(0).is_err());
    }

    #[test]
    fn suffix_rebuilds_tail() {
        let headers = chain("a", 0, 5);
        let tail = headers.suffix(3);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail.first().unwrap().number, 3);
        assert!(headers.suffix(9).is_empty());
    }

    #[test]
    fn accumulator_object_typed_state() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Balance {
            amount: u64,
        }
        let obj = AccumulatorObject::from_state(&Balance { amount: 7 }).unwrap();
        assert_eq!(obj.to_state::<Balance>().unwrap(), Balance { amount: 7 });
        assert!(obj.to_state::<Vec<u8>>().is_err());
        assert_eq!(obj.as_value()["amount"], 7);
    }

    #[test]
    fn accumulator_object_wraps_raw_json() {
        let raw = serde_json::json!({ "operators": ["a", "b"], "quorum": 2 });
        let obj = AccumulatorObject::new(raw.clone());
        assert_eq!(obj.as_value(), &raw);
        assert_eq!(serde_json::to_string(&obj).unwrap(), raw.to_string());
        assert_eq!(obj.into_value(), raw);
    }
}
