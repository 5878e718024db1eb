//! The accumulator contract: a versioned state machine folded over chain events.

use crate::error::IndexerError;
use crate::types::{AccumulatorObject, Event, Header, UpgradeFork};

/// Derives one kind of application state from chain events.
///
/// Every method must be a pure function of its arguments: catch-up replays
/// the same `(object, header, event)` tuples and expects identical results.
pub trait Accumulator: Send + Sync {
    /// Unique name; the header store keys attachments by it.
    fn name(&self) -> &str;

    /// Zero-state snapshot as of a bootstrap header (used after fast-forward).
    fn initialize_object(&self, header: &Header) -> Result<AccumulatorObject, IndexerError>;

    /// Fold a single event into `object`, producing the next snapshot.
    fn update_object(
        &self,
        object: AccumulatorObject,
        header: &Header,
        event: &Event,
    ) -> Result<AccumulatorObject, IndexerError>;

    /// Encode `object` using the layout of `fork`.
    fn serialize_object(
        &self,
        object: &AccumulatorObject,
        fork: &UpgradeFork,
    ) -> Result<Vec<u8>, IndexerError>;

    /// Decode bytes written under `fork`. Must accept every fork the
    /// accumulator has ever been active for.
    fn deserialize_object(
        &self,
        data: &[u8],
        fork: &UpgradeFork,
    ) -> Result<AccumulatorObject, IndexerError>;
}
