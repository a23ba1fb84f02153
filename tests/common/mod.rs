#![allow(dead_code)]

use async_trait::async_trait;
use lotuswire::core::errors::ExchangeError;
use lotuswire::core::kernel::{JsonRpcCodec, RpcCodec, Stream};
use lotuswire::core::message::{Call, CorrelationId, Incoming, Notify, RpcError, RpcResult};
use lotuswire::core::traits::Handler;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

pub const WAIT: Duration = Duration::from_secs(2);

/// In-memory `Stream`; the other end is a [`Peer`]
pub struct MockStream {
    codec: JsonRpcCodec,
    inbound: Mutex<mpsc::UnboundedReceiver<Result<Incoming, ExchangeError>>>,
    outbound: mpsc::UnboundedSender<Call>,
    fail_writes: Arc<AtomicBool>,
    stall_writes: Arc<AtomicBool>,
    write_stalled: Arc<AtomicBool>,
    // Held by `send` for the whole write and needed by `close`
    wire: Mutex<()>,
    closed: CancellationToken,
}

/// Server side of a [`MockStream`]
pub struct Peer {
    to_client: mpsc::UnboundedSender<Result<Incoming, ExchangeError>>,
    from_client: Mutex<mpsc::UnboundedReceiver<Call>>,
    fail_writes: Arc<AtomicBool>,
    stall_writes: Arc<AtomicBool>,
    write_stalled: Arc<AtomicBool>,
    closed: CancellationToken,
}

pub fn pair() -> (MockStream, Peer) {
    let (to_client, inbound) = mpsc::unbounded_channel();
    let (outbound, from_client) = mpsc::unbounded_channel();
    let fail_writes = Arc::new(AtomicBool::new(false));
    let stall_writes = Arc::new(AtomicBool::new(false));
    let write_stalled = Arc::new(AtomicBool::new(false));
    let closed = CancellationToken::new();

    (
        MockStream {
            codec: JsonRpcCodec,
            inbound: Mutex::new(inbound),
            outbound,
            fail_writes: Arc::clone(&fail_writes),
            stall_writes: Arc::clone(&stall_writes),
            write_stalled: Arc::clone(&write_stalled),
            wire: Mutex::new(()),
            closed: closed.clone(),
        },
        Peer {
            to_client,
            from_client: Mutex::new(from_client),
            fail_writes,
            stall_writes,
            write_stalled,
            closed,
        },
    )
}

#[async_trait]
impl Stream for MockStream {
    fn encode(&self, call: &Call) -> Result<Message, ExchangeError> {
        self.codec.encode_call(call)
    }

    async fn send(&self, frame: Message) -> Result<(), ExchangeError> {
        let _wire = self.wire.lock().await;
        if self.stall_writes.load(Ordering::Acquire) {
            self.write_stalled.store(true, Ordering::Release);
            std::future::pending::<()>().await;
        }
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(ExchangeError::NetworkError("broken pipe".to_string()));
        }
        if self.closed.is_cancelled() {
            return Err(ExchangeError::NetworkError("stream closed".to_string()));
        }

        // Parse the frame back so the peer sees exactly what went on the wire
        let text = frame.into_text().map_err(|e| ExchangeError::Other(e.to_string()))?;
        let value: Value = serde_json::from_str(&text)?;
        let id = value["id"]
            .as_u64()
            .ok_or_else(|| ExchangeError::Other("frame without id".to_string()))?;
        let method = value["method"].as_str().unwrap_or_default().to_string();
        let call = Call::new(CorrelationId(id), method, value["params"].clone());

        self.outbound
            .send(call)
            .map_err(|_| ExchangeError::NetworkError("peer gone".to_string()))
    }

    async fn recv(&self) -> Option<Result<Incoming, ExchangeError>> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            () = self.closed.cancelled() => None,
            next = inbound.recv() => next,
        }
    }

    async fn close(&self) -> Result<(), ExchangeError> {
        let _wire = self.wire.lock().await;
        self.closed.cancel();
        Ok(())
    }
}

impl Peer {
    /// Next call written by the client
    pub async fn next_call(&self) -> Call {
        tokio::time::timeout(WAIT, self.recv_call())
            .await
            .expect("timed out waiting for a call")
            .expect("client stream dropped")
    }

    pub async fn recv_call(&self) -> Option<Call> {
        self.from_client.lock().await.recv().await
    }

    pub fn reply(&self, id: CorrelationId, payload: Value) {
        let _ = self
            .to_client
            .send(Ok(Incoming::Result(RpcResult::ok(id, payload))));
    }

    pub fn reply_error(&self, id: CorrelationId, code: i64, message: &str) {
        let error = RpcError {
            code,
            message: message.to_string(),
            data: None,
        };
        let _ = self
            .to_client
            .send(Ok(Incoming::Result(RpcResult::err(id, error))));
    }

    pub fn push(&self, method: &str, payload: Value) {
        let _ = self
            .to_client
            .send(Ok(Incoming::Notify(Notify::new(method, payload))));
    }

    /// Transport-level read failure
    pub fn fail_read(&self, reason: &str) {
        let _ = self
            .to_client
            .send(Err(ExchangeError::NetworkError(reason.to_string())));
    }

    /// A frame the codec could not make sense of
    pub fn send_garbage(&self) {
        let _ = self.to_client.send(Err(ExchangeError::DeserializationError(
            "unexpected frame".to_string(),
        )));
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::Release);
    }

    /// Every later write blocks forever while holding the wire
    pub fn stall_writes(&self) {
        self.stall_writes.store(true, Ordering::Release);
    }

    pub fn write_stalled(&self) -> bool {
        self.write_stalled.load(Ordering::Acquire)
    }

    pub fn stream_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Forwards every notification into a channel
pub struct ForwardingHandler(pub mpsc::UnboundedSender<Notify>);

#[async_trait]
impl Handler for ForwardingHandler {
    async fn handle(&self, _ctx: &CancellationToken, notify: Notify) {
        let _ = self.0.send(notify);
    }
}

pub fn forwarding_handler() -> (Arc<dyn Handler>, mpsc::UnboundedReceiver<Notify>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ForwardingHandler(tx)), rx)
}

/// Poll `condition` until it holds or the wait budget runs out
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
