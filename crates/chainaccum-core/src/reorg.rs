//! Reorg reconciliation.
//!
//! Works out where an incoming batch diverges from the locally held chain:
//! 1. **Overlap**: leading headers already held with the same hash are known
//! 2. **Extension**: the first unknown header sits directly on the local tip
//! 3. **Reorg**: the first unknown header sits on an older local header; the
//!    local suffix above that header is orphaned
//! 4. **Disconnected**: the first unknown header's parent is not held locally
//!
//! The planner is pure; header store backends apply the plan atomically.

use crate::error::IndexerError;
use crate::types::{BlockHash, Headers};

/// Height bounds of the locally held chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalWindow {
    /// Lowest retained height.
    pub earliest: u64,
    /// Highest retained height.
    pub tip: u64,
}

/// Outcome of reconciling a batch against the local chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Number of leading batch headers that are already held (or below the
    /// retained window). The rest of the batch is net-new.
    pub known: usize,
    /// Local headers above this height are orphaned and must be discarded.
    pub rewind_to: Option<u64>,
    /// Number of local headers the reorg discards.
    pub depth: u64,
}

impl ReconcilePlan {
    /// The net-new headers of `batch`.
    pub fn new_headers(&self, batch: &Headers) -> Headers {
        batch.suffix(self.known)
    }
}

/// Plan how `batch` joins the local chain.
///
/// `window` is `None` when nothing is held locally; any ordered batch is then
/// accepted as-is. `lookup` returns the hash held locally at a height.
pub fn plan_reconcile<F>(
    batch: &Headers,
    window: Option<LocalWindow>,
    lookup: F,
) -> Result<ReconcilePlan, IndexerError>
where
    F: Fn(u64) -> Option<BlockHash>,
{
    batch.ok()?;

    let Some(window) = window else {
        return Ok(ReconcilePlan {
            known: 0,
            rewind_to: None,
            depth: 0,
        });
    };

    let known = batch
        .iter()
        .take_while(|h| h.number < window.earliest || lookup(h.number) == Some(h.block_hash))
        .count();

    let Some(first_new) = batch.as_slice().get(known) else {
        return Ok(ReconcilePlan {
            known,
            rewind_to: None,
            depth: 0,
        });
    };

    let disconnected = || IndexerError::PrevBlockHashNotFound {
        number: first_new.number,
    };
    let parent_number = first_new.number.checked_sub(1).ok_or_else(disconnected)?;
    if parent_number < window.earliest || lookup(parent_number) != Some(first_new.parent_hash) {
        return Err(disconnected());
    }

    let depth = window.tip.saturating_sub(parent_number);
    let rewind_to = (depth > 0).then_some(parent_number);
    if depth > 0 {
        tracing::warn!(
            depth,
            fork_point = parent_number,
            local_tip = window.tip,
            "Reorg detected"
        );
    }

    Ok(ReconcilePlan {
        known,
        rewind_to,
        depth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{branch, chain};

    fn plan(local: &Headers, batch: &Headers) -> Result<ReconcilePlan, IndexerError> {
        let window = match (local.first(), local.last()) {
            (Some(f), Some(l)) => Some(LocalWindow {
                earliest: f.number,
                tip: l.number,
            }),
            _ => None,
        };
        plan_reconcile(batch, window, |n| {
            local.get_header_by_number(n).ok().map(|h| h.block_hash)
        })
    }

    #[test]
    fn empty_local_chain_accepts_everything() {
        let batch = chain("a", 0, 10);
        let p = plan(&Headers::default(), &batch).unwrap();
        assert_eq!(p.new_headers(&batch), batch);
        assert_eq!(p.rewind_to, None);
    }

    #[test]
    fn empty_batch_is_a_noop() {
        let p = plan(&chain("a", 0, 5), &Headers::default()).unwrap();
        assert!(p.new_headers(&Headers::default()).is_empty());
    }

    #[test]
    fn extension_of_tip() {
        let all = chain("a", 0, 10);
        let local = all.suffix(0).into_iter().take(5).collect::<Headers>();
        let batch = all.suffix(5);
        let p = plan(&local, &batch).unwrap();
        assert_eq!(p.known, 0);
        assert_eq!(p.new_headers(&batch), batch);
        assert_eq!(p.depth, 0);
    }

    #[test]
    fn fully_known_batch_has_nothing_new() {
        let local = chain("a", 0, 5);
        let p = plan(&local, &local).unwrap();
        assert_eq!(p.known, 5);
        assert!(p.new_headers(&local).is_empty());
    }

    #[test]
    fn overlapping_batch_returns_only_new_suffix() {
        let all = chain("a", 0, 10);
        let local = all.iter().take(7).cloned().collect::<Headers>();
        let p = plan(&local, &all).unwrap();
        assert_eq!(p.known, 7);
        assert_eq!(p.new_headers(&all), all.suffix(7));
    }

    #[test]
    fn reorg_rewinds_to_fork_point() {
        let all = chain("a", 0, 10);
        let local = all.iter().take(7).cloned().collect::<Headers>(); // 0..=6
        let fork_parent = all.get_header_by_number(4).unwrap();
        let mut fork: Vec<_> = all.iter().take(5).cloned().collect();
        fork.extend(branch("b", fork_parent, 5)); // 5..=9 on branch b
        let fork = Headers::from(fork);

        let p = plan(&local, &fork).unwrap();
        assert_eq!(p.known, 5);
        assert_eq!(p.rewind_to, Some(4));
        assert_eq!(p.depth, 2);
        assert_eq!(p.new_headers(&fork), fork.suffix(5));
    }

    #[test]
    fn disconnected_batch_rejected() {
        let all = chain("a", 0, 10);
        let local = all.iter().take(5).cloned().collect::<Headers>(); // 0..=4
        let err = plan(&local, &all.suffix(6)).unwrap_err();
        assert!(matches!(err, IndexerError::PrevBlockHashNotFound { number: 6 }));
    }

    #[test]
    fn reorg_below_window_rejected() {
        let local = chain("a", 10, 5); // 10..=14
        let other = chain("b", 10, 3);
        let err = plan(&local, &other).unwrap_err();
        assert!(err.is_structural());
    }

    #[test]
    fn headers_below_window_are_skipped() {
        let all = chain("a", 0, 15);
        let local = all.suffix(10); // 10..=14
        let p = plan(&local, &all).unwrap();
        assert_eq!(p.known, 15);
    }

    #[test]
    fn unordered_batch_rejected() {
        let mut list = chain("a", 0, 4).into_vec();
        list.swap(0, 3);
        let err = plan(&Headers::default(), &Headers::from(list)).unwrap_err();
        assert!(matches!(err, IndexerError::HeadersUnordered));
    }
}
