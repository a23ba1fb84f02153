pub mod core;
pub mod orderbook;
pub mod utils;

pub use crate::core::{
    errors::ExchangeError,
    kernel::{Connection, Keeper},
    message::{Call, CorrelationId, Incoming, Notify, RpcError, RpcResult},
    router::ChannelRouter,
    traits::{ConnGen, Handler, SnapshotSource},
    types::*,
};
pub use orderbook::{BookFeed, OrderBookSync};
pub use utils::SymbolStore;
