//! Per-accumulator filtering policy: event extraction, sync points and fast mode.

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::types::{Event, Header, HeaderAndEvents, Headers};

/// Turns raw headers into the events one accumulator cares about, and governs
/// how that accumulator bootstraps.
#[async_trait]
pub trait Filterer: Send + Sync {
    /// Normal-mode path: map each header to its relevant events, in order.
    ///
    /// Errors if the headers cannot form a causal chain.
    async fn filter_headers(&self, headers: &Headers) -> Result<Vec<HeaderAndEvents>, IndexerError>;

    /// Earliest height this accumulator needs retained, given the chain tip.
    async fn get_sync_point(&self, latest_header: &Header) -> Result<u64, IndexerError>;

    /// Enter fast mode anchored at `latest_header`.
    async fn set_sync_point(&mut self, latest_header: &Header) -> Result<(), IndexerError>;

    /// While in fast mode, skip headers until the sync point is reached, then
    /// return the bootstrap header and every header after it.
    async fn filter_fast_mode(
        &mut self,
        headers: Headers,
    ) -> Result<(Option<Header>, Headers), IndexerError>;
}

// ─── FastMode ─────────────────────────────────────────────────────────────────

/// Fast-mode bookkeeping shared by filterer implementations.
///
/// Armed at a height, it swallows headers below that height. The first header
/// at or above it becomes the bootstrap header, after which fast mode ends.
#[derive(Debug, Clone, Default)]
pub struct FastMode {
    sync_point: Option<u64>,
}

impl FastMode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for `height` before bootstrapping.
    pub fn arm(&mut self, height: u64) {
        self.sync_point = Some(height);
    }

    pub fn is_active(&self) -> bool {
        self.sync_point.is_some()
    }

    pub fn sync_point(&self) -> Option<u64> {
        self.sync_point
    }

    /// Split `headers` at the sync point.
    pub fn apply(&mut self, headers: Headers) -> (Option<Header>, Headers) {
        let Some(sync_point) = self.sync_point else {
            return (None, headers);
        };

        let Some(pos) = headers.iter().position(|h| h.number >= sync_point) else {
            return (None, Headers::default());
        };

        let mut rest = headers.into_vec().split_off(pos).into_iter();
        let bootstrap = rest.next();
        self.sync_point = None;
        tracing::debug!(sync_point, bootstrap = ?bootstrap.as_ref().map(|h| h.number), "fast mode complete");
        (bootstrap, rest.collect())
    }
}

// ─── StandardFilterer ─────────────────────────────────────────────────────────

/// Extracts the events of a single header (e.g. by fetching its logs).
#[async_trait]
pub trait EventExtractor: Send + Sync {
    async fn extract(&self, header: &Header) -> Result<Vec<Event>, IndexerError>;
}

/// A [`Filterer`] that keeps `history_depth` blocks behind the tip and asks an
/// [`EventExtractor`] for each header's events.
pub struct StandardFilterer<E> {
    extractor: E,
    history_depth: u64,
    fast_mode: FastMode,
}

impl<E: EventExtractor> StandardFilterer<E> {
    pub fn new(extractor: E, history_depth: u64) -> Self {
        Self {
            extractor,
            history_depth,
            fast_mode: FastMode::new(),
        }
    }

    pub fn in_fast_mode(&self) -> bool {
        self.fast_mode.is_active()
    }
}

#[async_trait]
impl<E: EventExtractor> Filterer for StandardFilterer<E> {
    async fn filter_headers(&self, headers: &Headers) -> Result<Vec<HeaderAndEvents>, IndexerError> {
        headers.ok()?;
        let mut out = Vec::with_capacity(headers.len());
        for header in headers {
            let events = self.extractor.extract(header).await?;
            out.push(HeaderAndEvents {
                header: header.clone(),
                events,
            });
        }
        Ok(out)
    }

    async fn get_sync_point(&self, latest_header: &Header) -> Result<u64, IndexerError> {
        Ok(latest_header.number.saturating_sub(self.history_depth))
    }

    async fn set_sync_point(&mut self, latest_header: &Header) -> Result<(), IndexerError> {
        let sync_point = self.get_sync_point(latest_header).await?;
        self.fast_mode.arm(sync_point);
        Ok(())
    }

    async fn filter_fast_mode(
        &mut self,
        headers: Headers,
    ) -> Result<(Option<Header>, Headers), IndexerError> {
        Ok(self.fast_mode.apply(headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{chain, NumberExtractor};

    #[test]
    fn inactive_fast_mode_passes_everything_through() {
        let mut fm = FastMode::new();
        let (bootstrap, rest) = fm.apply(chain("a", 0, 4));
        assert!(bootstrap.is_none());
        assert_eq!(rest.len(), 4);
    }

    #[test]
    fn fast_mode_boundary_yields_one_bootstrap_and_the_tail() {
        let mut fm = FastMode::new();
        fm.arm(13);
        let headers = chain("a", 10, 8); // 10..=17
        let (bootstrap, rest) = fm.apply(headers);

        assert_eq!(bootstrap.unwrap().number, 13);
        let numbers: Vec<u64> = rest.iter().map(|h| h.number).collect();
        assert_eq!(numbers, vec![14, 15, 16, 17]);
        assert!(!fm.is_active());
    }

    #[test]
    fn fast_mode_swallows_headers_before_sync_point() {
        let mut fm = FastMode::new();
        assert_eq!(fm.sync_point(), None);
        fm.arm(50);
        assert_eq!(fm.sync_point(), Some(50));
        let (bootstrap, rest) = fm.apply(chain("a", 10, 5));
        assert!(bootstrap.is_none());
        assert!(rest.is_empty());
        assert!(fm.is_active());
        assert_eq!(fm.sync_point(), Some(50));

        // Sync point skipped over entirely: bootstrap on the first header past it.
        let (bootstrap, rest) = fm.apply(chain("a", 52, 2));
        assert_eq!(bootstrap.unwrap().number, 52);
        assert_eq!(rest.len(), 1);
        assert_eq!(fm.sync_point(), None);
    }

    #[tokio::test]
    async fn standard_filterer_sync_point_saturates() {
        let f = StandardFilterer::new(NumberExtractor::every(1), 20);
        let tip = chain("a", 100, 1).into_vec().remove(0);
        assert_eq!(f.get_sync_point(&tip).await.unwrap(), 80);
        let low = chain("a", 5, 1).into_vec().remove(0);
        assert_eq!(f.get_sync_point(&low).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn standard_filterer_enters_and_leaves_fast_mode() {
        let mut f = StandardFilterer::new(NumberExtractor::every(1), 2);
        let headers = chain("a", 0, 10);
        f.set_sync_point(headers.last().unwrap()).await.unwrap();
        assert!(f.in_fast_mode());

        let (bootstrap, rest) = f.filter_fast_mode(headers).await.unwrap();
        assert_eq!(bootstrap.unwrap().number, 7);
        assert_eq!(rest.len(), 2);
        assert!(!f.in_fast_mode());
    }

    #[tokio::test]
    async fn standard_filterer_extracts_in_order() {
        let f = StandardFilterer::new(NumberExtractor::every(2), 0);
        let out = f.filter_headers(&chain("a", 1, 4)).await.unwrap();
        assert_eq!(out.len(), 4);
        let counts: Vec<usize> = out.iter().map(|he| he.events.len()).collect();
        assert_eq!(counts, vec![0, 1, 0, 1]);
        assert_eq!(out[1].header.number, 2);
    }

    #[tokio::test]
    async fn standard_filterer_rejects_broken_chain() {
        let f = StandardFilterer::new(NumberExtractor::every(1), 0);
        let mut list = chain("a", 0, 3).into_vec();
        list.reverse();
        let err = f.filter_headers(&Headers::from(list)).await.unwrap_err();
        assert!(matches!(err, IndexerError::HeadersUnordered));
    }
}
