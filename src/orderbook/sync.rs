use crate::core::errors::ExchangeError;
use crate::core::types::{
    Diff, OrderBook, OrderBookEntry, Price, PriceLevel, Quantity, Snapshot, Symbol,
};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, instrument, warn};

type Side = BTreeMap<Price, Quantity>;

#[derive(Debug, Default)]
struct BookState {
    bids: Side,
    asks: Side,
    pending: Vec<Diff>,
    last_applied_seq: Option<u64>,
    snapshot: Option<Snapshot>,
    initialized: bool,
    broken: bool,
}

fn merge(side: &mut Side, levels: &[PriceLevel]) {
    for level in levels {
        if level.size.is_zero() {
            side.remove(&level.price);
        } else {
            side.insert(level.price, level.size);
        }
    }
}

fn apply(state: &mut BookState, diff: &Diff) {
    merge(&mut state.bids, &diff.bids);
    merge(&mut state.asks, &diff.asks);
}

fn entries<'a>(
    levels: impl Iterator<Item = (&'a Price, &'a Quantity)>,
    depth: usize,
) -> Vec<OrderBookEntry> {
    levels
        .take(depth)
        .map(|(price, quantity)| OrderBookEntry {
            price: *price,
            quantity: *quantity,
        })
        .collect()
}

impl BookState {
    fn is_live(&self) -> bool {
        self.initialized && !self.broken
    }

    /// Rebuild from the snapshot plus every cached diff at or past it
    fn init(&mut self) -> Result<(), ExchangeError> {
        let Some(snapshot) = self.snapshot.as_ref() else {
            return Ok(());
        };

        // prev_seq is non-decreasing across the cache, the chain check guarantees it
        let start = self.pending.partition_point(|diff| diff.prev_seq < snapshot.seq);
        let Some(covering) = self.pending.get(start) else {
            return Ok(());
        };

        // The buffered chain itself is intact: drop only the snapshot and keep
        // waiting for a newer one
        if start == 0 && covering.prev_seq > snapshot.seq {
            let (expected, got) = (snapshot.seq, covering.prev_seq);
            self.snapshot = None;
            warn!(expected, got, "Snapshot predates the buffered diffs");
            return Err(ExchangeError::ChainInconsistency { expected, got });
        }

        self.bids.clear();
        self.asks.clear();
        merge(&mut self.bids, &snapshot.bids);
        merge(&mut self.asks, &snapshot.asks);

        let cached = std::mem::take(&mut self.pending);
        for diff in &cached[start..] {
            apply(self, diff);
        }

        self.initialized = true;
        debug!(
            snapshot_seq = self.snapshot.as_ref().map_or(0, |s| s.seq),
            replayed = cached.len() - start,
            discarded = start,
            "Book initialized"
        );
        Ok(())
    }
}

/// Reconciles one snapshot with a chained stream of diffs into a sorted book
///
/// Diffs may arrive before the snapshot; they are cached until a diff covering
/// the snapshot sequence shows up, then the book is rebuilt and goes live. A
/// break in the `prev_seq` chain is fatal to the instance; recover with a
/// fresh one. A snapshot older than every buffered diff is rejected without
/// breaking the instance.
#[derive(Debug)]
pub struct OrderBookSync {
    symbol: Symbol,
    state: Mutex<BookState>,
}

impl OrderBookSync {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            state: Mutex::new(BookState::default()),
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    fn state(&self) -> MutexGuard<'_, BookState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Feed one diff; `Ok(true)` once the book is live
    #[instrument(skip(self, diff), fields(symbol = %self.symbol, seq = diff.seq, prev_seq = diff.prev_seq))]
    pub fn push(&self, diff: Diff) -> Result<bool, ExchangeError> {
        if diff.seq < diff.prev_seq {
            return Err(ExchangeError::InvalidParameters(format!(
                "diff seq {} precedes prev_seq {}",
                diff.seq, diff.prev_seq
            )));
        }

        let mut state = self.state();
        if state.broken {
            return Err(ExchangeError::BookBroken);
        }

        if let Some(expected) = state.last_applied_seq {
            if diff.prev_seq != expected {
                state.broken = true;
                warn!(expected, got = diff.prev_seq, "Diff chain broken");
                return Err(ExchangeError::ChainInconsistency {
                    expected,
                    got: diff.prev_seq,
                });
            }
        }
        state.last_applied_seq = Some(diff.seq);

        if state.initialized {
            apply(&mut state, &diff);
            return Ok(true);
        }

        let covers = state
            .snapshot
            .as_ref()
            .map(|snapshot| diff.prev_seq >= snapshot.seq);
        state.pending.push(diff);

        match covers {
            Some(true) => {
                state.init()?;
                Ok(state.initialized)
            }
            _ => Ok(false),
        }
    }

    /// Install a snapshot; `Ok(true)` once the book is live
    ///
    /// A live book only records the snapshot, it is not rebuilt.
    #[instrument(skip(self, snapshot), fields(symbol = %self.symbol, seq = snapshot.seq))]
    pub fn add_refresh(&self, snapshot: Snapshot) -> Result<bool, ExchangeError> {
        let mut state = self.state();
        if state.broken {
            return Err(ExchangeError::BookBroken);
        }

        if state.initialized {
            debug!("Book already live, snapshot recorded only");
            state.snapshot = Some(snapshot);
            return Ok(true);
        }

        let ready = state
            .pending
            .last()
            .is_some_and(|diff| diff.prev_seq >= snapshot.seq);
        state.snapshot = Some(snapshot);

        if ready {
            state.init()?;
        }
        Ok(state.initialized)
    }

    /// Point-in-time view with at most `depth` levels per side
    pub fn order_book(&self, depth: Option<usize>) -> Result<OrderBook, ExchangeError> {
        let state = self.state();
        if !state.is_live() {
            return Err(ExchangeError::BookNotLive);
        }

        let depth = depth.unwrap_or(usize::MAX);
        let snapshot_seq = state.snapshot.as_ref().map_or(0, |s| s.seq);
        Ok(OrderBook {
            symbol: self.symbol.clone(),
            bids: entries(state.bids.iter().rev(), depth),
            asks: entries(state.asks.iter(), depth),
            last_update_id: state.last_applied_seq.unwrap_or(0).max(snapshot_seq),
        })
    }

    pub fn is_live(&self) -> bool {
        self.state().is_live()
    }

    pub fn is_broken(&self) -> bool {
        self.state().broken
    }

    pub fn last_applied_seq(&self) -> Option<u64> {
        self.state().last_applied_seq
    }

    /// Diffs cached while waiting for a covering snapshot
    pub fn pending_len(&self) -> usize {
        self.state().pending.len()
    }
}
