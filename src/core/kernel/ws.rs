use crate::core::config::WsConfig;
use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::RpcCodec;
use crate::core::kernel::stream::Stream;
use crate::core::message::{Call, Incoming};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, instrument, warn};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection statistics for monitoring
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
}

impl ConnectionStats {
    fn record(counter: &AtomicU64, bytes: &AtomicU64, msg: &Message) {
        counter.fetch_add(1, Ordering::Relaxed);
        bytes.fetch_add(msg.len() as u64, Ordering::Relaxed);
    }
}

/// Tungstenite-based [`Stream`] with a pluggable framing codec
pub struct TungsteniteStream<C: RpcCodec> {
    url: String,
    exchange_name: String,
    codec: C,
    write: Mutex<SplitSink<WsStream, Message>>,
    read: Mutex<SplitStream<WsStream>>,
    /// Transport is unusable, set on error or on close
    closed: AtomicBool,
    close_started: AtomicBool,
    stats: ConnectionStats,
}

impl<C: RpcCodec> TungsteniteStream<C> {
    /// Open a WebSocket connection
    ///
    /// # Arguments
    /// * `config` - endpoint and connect timeout
    /// * `exchange_name` - name of the exchange for logging/tracing
    /// * `codec` - framing for calls, results and notifications
    #[instrument(skip(config, codec), fields(url = %config.url))]
    pub async fn connect(
        config: &WsConfig,
        exchange_name: String,
        codec: C,
    ) -> Result<Self, ExchangeError> {
        let connection_future =
            tokio::time::timeout(config.connect_timeout_duration(), connect_async(&config.url));

        let (ws_stream, _) = connection_future
            .await
            .map_err(|_| {
                ExchangeError::ConnectionTimeout("WebSocket connection timeout".to_string())
            })?
            .map_err(|e| {
                ExchangeError::NetworkError(format!("WebSocket connection failed: {}", e))
            })?;

        Ok(Self::from_ws(ws_stream, config.url.clone(), exchange_name, codec))
    }

    /// Wrap an already established WebSocket
    pub fn from_ws(ws_stream: WsStream, url: String, exchange_name: String, codec: C) -> Self {
        let (write, read) = ws_stream.split();
        Self {
            url,
            exchange_name,
            codec,
            write: Mutex::new(write),
            read: Mutex::new(read),
            closed: AtomicBool::new(false),
            close_started: AtomicBool::new(false),
            stats: ConnectionStats::default(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    async fn write_frame(&self, msg: Message) -> Result<(), ExchangeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ExchangeError::NetworkError(
                "WebSocket not connected".to_string(),
            ));
        }

        ConnectionStats::record(&self.stats.messages_sent, &self.stats.bytes_sent, &msg);
        let mut write = self.write.lock().await;
        write.send(msg).await.map_err(|e| {
            self.closed.store(true, Ordering::Release);
            ExchangeError::NetworkError(format!("Failed to send WebSocket message: {}", e))
        })
    }
}

#[async_trait]
impl<C: RpcCodec> Stream for TungsteniteStream<C> {
    fn encode(&self, call: &Call) -> Result<Message, ExchangeError> {
        self.codec.encode_call(call)
    }

    #[instrument(skip(self, frame), fields(exchange = %self.exchange_name))]
    async fn send(&self, frame: Message) -> Result<(), ExchangeError> {
        self.write_frame(frame).await
    }

    #[instrument(skip(self), fields(exchange = %self.exchange_name))]
    async fn recv(&self) -> Option<Result<Incoming, ExchangeError>> {
        let mut read = self.read.lock().await;

        loop {
            match read.next().await {
                Some(Ok(message)) => {
                    ConnectionStats::record(
                        &self.stats.messages_received,
                        &self.stats.bytes_received,
                        &message,
                    );
                    // Control frames are handled here, only data frames reach the codec
                    match message {
                        Message::Text(_) | Message::Binary(_) => {
                            match self.codec.decode_message(message) {
                                Ok(Some(decoded)) => return Some(Ok(decoded)),
                                Ok(None) => {}
                                Err(e) => return Some(Err(e)),
                            }
                        }
                        Message::Ping(data) => {
                            if let Err(e) = self.write_frame(Message::Pong(data)).await {
                                warn!("Failed to send pong response: {}", e);
                            }
                        }
                        Message::Close(frame) => {
                            debug!(?frame, "WebSocket closed by peer");
                            self.closed.store(true, Ordering::Release);
                            return None;
                        }
                        _ => {}
                    }
                }
                Some(Err(e)) => {
                    self.closed.store(true, Ordering::Release);
                    return Some(Err(ExchangeError::NetworkError(format!(
                        "WebSocket error: {}",
                        e
                    ))));
                }
                None => {
                    self.closed.store(true, Ordering::Release);
                    return None;
                }
            }
        }
    }

    #[instrument(skip(self), fields(exchange = %self.exchange_name))]
    async fn close(&self) -> Result<(), ExchangeError> {
        if self.close_started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.closed.store(true, Ordering::Release);

        // Still attempted after a transport error; the sink must be shut either way
        let mut write = self.write.lock().await;
        let _ = write.send(Message::Close(None)).await;
        if let Err(e) = write.close().await {
            debug!(error = %e, "WebSocket sink close failed");
        }
        Ok(())
    }
}
