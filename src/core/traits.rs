use crate::core::{
    errors::ExchangeError,
    kernel::{connection::Connection, stream::Stream},
    message::Notify,
    types::{Snapshot, Symbol},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Consumer of unsolicited pushes
///
/// Invoked inline on a connection's dispatch task; implementations must not block.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &CancellationToken, notify: Notify);
}

/// Out-of-band source of full book snapshots, typically REST
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, symbol: &Symbol) -> Result<Snapshot, ExchangeError>;
}

/// Connection factory and subscription schedule driving a keeper
#[async_trait]
pub trait ConnGen: Send + Sync {
    type Stream: Stream;

    /// Open a connection with its dispatch loop already running
    ///
    /// Return [`ExchangeError::Cancelled`] to stop the keeper for good; any other
    /// error is retried.
    async fn new_conn(
        &self,
        ctx: &CancellationToken,
    ) -> Result<Connection<Self::Stream>, ExchangeError>;

    /// The channels that should be subscribed now and until when that set is valid
    async fn channels(
        &self,
        ctx: &CancellationToken,
        previous: &[String],
    ) -> Result<(Vec<String>, DateTime<Utc>), ExchangeError>;

    async fn subscribe(
        &self,
        ctx: &CancellationToken,
        conn: &Connection<Self::Stream>,
        channels: &[String],
    ) -> Result<(), ExchangeError> {
        conn.request(ctx, "subscribe", json!({ "channels": channels }))
            .await
            .map(|_| ())
    }

    async fn unsubscribe(
        &self,
        ctx: &CancellationToken,
        conn: &Connection<Self::Stream>,
        channels: &[String],
    ) -> Result<(), ExchangeError> {
        conn.request(ctx, "unsubscribe", json!({ "channels": channels }))
            .await
            .map(|_| ())
    }
}
