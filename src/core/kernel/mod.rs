/// `LotusWire` Kernel - transport layer shared by every venue adapter
///
/// The kernel holds only transport logic and generic interfaces. Venue wire
/// formats plug in through [`RpcCodec`], subscription schedules through
/// [`ConnGen`](crate::core::traits::ConnGen).
///
/// # Architecture
///
/// ## Transport Layer
/// - `Stream`: one ordered frame stream (encode, send, recv, close)
/// - `TungsteniteStream`: WebSocket implementation of `Stream`
/// - `RestClient`: HTTP GET interface used for snapshots
///
/// ## RPC Layer
/// - `Connection`: correlated calls and push dispatch over one `Stream`
/// - `Keeper`: reconnect and resubscribe supervisor
///
/// ## Message Handling
/// - `RpcCodec`: venue-specific framing, `JsonRpcCodec` for JSON-RPC 2.0
///
/// # Usage
///
/// ## Correlated calls over WebSocket
/// ```rust,no_run
/// use lotuswire::core::config::WsConfig;
/// use lotuswire::core::kernel::*;
/// use lotuswire::core::router::ChannelRouter;
/// use serde_json::json;
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = WsConfig::new("wss://test.deribit.com/ws/api/v2");
/// let stream = TungsteniteStream::connect(&config, "deribit".to_string(), JsonRpcCodec).await?;
/// let conn = Connection::new(stream);
///
/// let ctx = CancellationToken::new();
/// conn.run(ctx.child_token(), Arc::new(ChannelRouter::new()))?;
///
/// let time = conn
///     .request_timeout(&ctx, "public/get_time", json!({}), config.call_timeout_duration())
///     .await?;
/// println!("server time: {}", time);
///
/// conn.close().await;
/// # Ok(())
/// # }
/// ```
pub mod codec;
pub mod connection;
pub mod keeper;
pub mod rest;
pub mod stream;
pub mod ws;

// Re-export key types for convenience
pub use codec::{JsonRpcCodec, RpcCodec};
pub use connection::Connection;
pub use keeper::Keeper;
pub use rest::{ReqwestRest, RestClient, RestClientConfig};
pub use stream::Stream;
pub use ws::{ConnectionStats, TungsteniteStream};
