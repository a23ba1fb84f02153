//! Incremental order book synchronization
//!
//! [`OrderBookSync`] reconciles an out-of-band [`Snapshot`](crate::core::types::Snapshot)
//! with a `prev_seq`-chained stream of diffs. [`BookFeed`] drives one instance per
//! symbol from book channel notifications, and [`RestSnapshotSource`] supplies
//! snapshots over REST.

pub mod feed;
pub mod parse;
pub mod snapshot;
pub mod sync;

pub use feed::{BookFault, BookFeed};
pub use parse::{BookMessage, BookUpdate};
pub use snapshot::RestSnapshotSource;
pub use sync::OrderBookSync;
