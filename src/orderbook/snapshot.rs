use crate::core::errors::ExchangeError;
use crate::core::kernel::rest::RestClient;
use crate::core::traits::SnapshotSource;
use crate::core::types::{Snapshot, Symbol};
use crate::utils::SymbolStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::instrument;

/// [`SnapshotSource`] that pulls full books over REST
pub struct RestSnapshotSource<R: RestClient> {
    rest: R,
    endpoint: String,
    symbols: Arc<SymbolStore>,
    depth: Option<u32>,
}

impl<R: RestClient> RestSnapshotSource<R> {
    /// Snapshots are requested as `GET {endpoint}?instrument=...`
    pub fn new(rest: R, endpoint: impl Into<String>, symbols: Arc<SymbolStore>) -> Self {
        Self {
            rest,
            endpoint: endpoint.into(),
            symbols,
            depth: None,
        }
    }

    #[must_use]
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }
}

#[async_trait]
impl<R: RestClient> SnapshotSource for RestSnapshotSource<R> {
    #[instrument(skip(self), fields(symbol = %symbol, endpoint = %self.endpoint))]
    async fn fetch(&self, symbol: &Symbol) -> Result<Snapshot, ExchangeError> {
        let instrument = self
            .symbols
            .instrument(symbol)
            .map_or_else(|| symbol.as_pair(), str::to_string);
        let depth = self.depth.map(|d| d.to_string());

        let mut params = vec![("instrument", instrument.as_str())];
        if let Some(depth) = depth.as_deref() {
            params.push(("depth", depth));
        }

        self.rest.get_json(&self.endpoint, &params).await
    }
}
