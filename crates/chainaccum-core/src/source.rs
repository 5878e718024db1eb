//! Header source contract (the chain client boundary).

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::types::{Header, Headers};

/// Supplies headers from the remote chain.
///
/// Headers returned by one call must be contiguous among themselves and should
/// connect to the local chain. A batch that does not connect is logged and
/// pulled again on the next poll; the indexer only decides to fast-forward in
/// [`Indexer::index`](crate::index_loop::Indexer::index).
#[async_trait]
pub trait HeaderSource: Send + Sync {
    /// Pull headers following `last_header` (`None` = cold start from height 0).
    ///
    /// Returns the headers plus `true` if the source is caught up to the chain head.
    async fn pull_new_headers(
        &self,
        last_header: Option<&Header>,
    ) -> Result<(Headers, bool), IndexerError>;

    /// The chain's latest header, or latest finalized header if `finalized`.
    async fn pull_latest_header(&self, finalized: bool) -> Result<Header, IndexerError>;
}
