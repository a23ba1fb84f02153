use crate::core::errors::ExchangeError;
use crate::core::message::Notify;
use crate::core::traits::{Handler, SnapshotSource};
use crate::core::types::{OrderBook, Symbol};
use crate::orderbook::parse::{BookMessage, BookUpdate};
use crate::orderbook::sync::OrderBookSync;
use crate::utils::SymbolStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// A book instance was discarded; fetch a new snapshot for `symbol`
#[derive(Debug)]
pub struct BookFault {
    pub symbol: Symbol,
    pub error: ExchangeError,
}

/// Drives one [`OrderBookSync`] per symbol from book channel notifications
pub struct BookFeed {
    symbols: Arc<SymbolStore>,
    books: RwLock<HashMap<Symbol, Arc<OrderBookSync>>>,
    faults: mpsc::Sender<BookFault>,
}

impl BookFeed {
    pub fn new(
        symbols: Arc<SymbolStore>,
        fault_capacity: usize,
    ) -> (Self, mpsc::Receiver<BookFault>) {
        let (faults, rx) = mpsc::channel(fault_capacity.max(1));
        (
            Self {
                symbols,
                books: RwLock::new(HashMap::new()),
                faults,
            },
            rx,
        )
    }

    /// Current instance for `symbol`, created on first use
    pub fn book(&self, symbol: &Symbol) -> Arc<OrderBookSync> {
        if let Some(book) = self
            .books
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
        {
            return Arc::clone(book);
        }

        let mut books = self.books.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            books
                .entry(symbol.clone())
                .or_insert_with(|| Arc::new(OrderBookSync::new(symbol.clone()))),
        )
    }

    pub fn order_book(
        &self,
        symbol: &Symbol,
        depth: Option<usize>,
    ) -> Result<OrderBook, ExchangeError> {
        self.book(symbol).order_book(depth)
    }

    /// Apply one decoded message; `Ok(true)` once the symbol's book is live
    pub fn apply(&self, message: BookMessage) -> Result<bool, ExchangeError> {
        let symbol = self.symbols.resolve(&message.instrument).ok_or_else(|| {
            ExchangeError::InvalidParameters(format!(
                "unknown instrument {}",
                message.instrument
            ))
        })?;

        let book = self.book(&symbol);
        let result = match message.update {
            BookUpdate::Snapshot(snapshot) => book.add_refresh(snapshot),
            BookUpdate::Diff(diff) => book.push(diff),
        };
        self.check(&book, result)
    }

    /// Pull a snapshot out of band and install it
    #[instrument(skip(self, source), fields(symbol = %symbol))]
    pub async fn bootstrap(
        &self,
        source: &dyn SnapshotSource,
        symbol: &Symbol,
    ) -> Result<bool, ExchangeError> {
        let snapshot = source.fetch(symbol).await?;
        let book = self.book(symbol);
        let result = book.add_refresh(snapshot);
        self.check(&book, result)
    }

    /// A broken instance is swapped for a fresh one. Every chain inconsistency is
    /// reported, including a stale snapshot that left the instance usable.
    fn check(
        &self,
        book: &Arc<OrderBookSync>,
        result: Result<bool, ExchangeError>,
    ) -> Result<bool, ExchangeError> {
        match result {
            Err(ExchangeError::ChainInconsistency { expected, got }) => {
                if book.is_broken() {
                    self.replace(book);
                }
                self.report(
                    book.symbol(),
                    ExchangeError::ChainInconsistency { expected, got },
                );
                Err(ExchangeError::ChainInconsistency { expected, got })
            }
            Err(ExchangeError::BookBroken) => {
                self.replace(book);
                Err(ExchangeError::BookBroken)
            }
            other => other,
        }
    }

    fn replace(&self, broken: &Arc<OrderBookSync>) {
        let symbol = broken.symbol();
        let mut books = self.books.write().unwrap_or_else(PoisonError::into_inner);
        // Another task may already have swapped it
        if books.get(symbol).is_some_and(|current| Arc::ptr_eq(current, broken)) {
            books.insert(symbol.clone(), Arc::new(OrderBookSync::new(symbol.clone())));
            warn!(%symbol, "Replaced broken book");
        }
    }

    fn report(&self, symbol: &Symbol, error: ExchangeError) {
        let fault = BookFault {
            symbol: symbol.clone(),
            error,
        };
        if let Err(mpsc::error::TrySendError::Full(dropped)) = self.faults.try_send(fault) {
            debug!(symbol = %dropped.symbol, "Fault channel full, dropping report");
        }
    }
}

#[async_trait]
impl Handler for BookFeed {
    async fn handle(&self, _ctx: &CancellationToken, notify: Notify) {
        let message = match BookMessage::from_value(notify.data()) {
            Ok(message) => message,
            Err(e) => {
                warn!(channel = %notify.channel(), error = %e, "Dropping book payload");
                return;
            }
        };

        match self.apply(message) {
            Ok(live) => debug!(channel = %notify.channel(), live, "Book updated"),
            Err(ExchangeError::InvalidParameters(reason)) => {
                debug!(channel = %notify.channel(), %reason, "Ignoring book payload");
            }
            Err(e) => warn!(channel = %notify.channel(), error = %e, "Book update failed"),
        }
    }
}
