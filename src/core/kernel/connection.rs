use crate::core::errors::ExchangeError;
use crate::core::kernel::stream::Stream;
use crate::core::message::{Call, CorrelationId, Incoming, RpcResult};
use crate::core::traits::Handler;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

/// Upper bound on the closing handshake once waiters are released
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outstanding correlated calls awaiting their result
#[derive(Debug, Default)]
struct PendingTable {
    slots: HashMap<CorrelationId, oneshot::Sender<RpcResult>>,
    drained: bool,
}

impl PendingTable {
    /// Returns `None` once the table has been drained; a dead connection takes no waiters.
    fn register(&mut self, id: CorrelationId) -> Option<oneshot::Receiver<RpcResult>> {
        if self.drained {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        self.slots.insert(id, tx);
        Some(rx)
    }

    fn take(&mut self, id: CorrelationId) -> Option<oneshot::Sender<RpcResult>> {
        self.slots.remove(&id)
    }

    /// Drop every slot so each waiter wakes with a closed channel.
    fn drain(&mut self) -> usize {
        self.drained = true;
        let count = self.slots.len();
        self.slots.clear();
        count
    }
}

struct Inner<S: Stream> {
    stream: S,
    next_id: AtomicU64,
    pending: Mutex<PendingTable>,
    write_lock: tokio::sync::Mutex<()>,
    failure: OnceLock<ExchangeError>,
    closed: CancellationToken,
    running: AtomicBool,
    done: watch::Sender<bool>,
}

impl<S: Stream> Inner<S> {
    fn pending(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> CorrelationId {
        CorrelationId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Error handed to callers of a connection that is no longer open
    fn dead(&self) -> ExchangeError {
        match self.failure.get() {
            Some(failure) => transport_copy(failure),
            None => ExchangeError::Cleared,
        }
    }

    fn ensure_open(&self) -> Result<(), ExchangeError> {
        if self.failure.get().is_some() || self.closed.is_cancelled() {
            return Err(self.dead());
        }
        Ok(())
    }

    /// Serialize one frame onto the wire. Only the write itself holds the lock.
    async fn write(&self, frame: Message, ctx: &CancellationToken) -> Result<(), ExchangeError> {
        let result = {
            let _permit = tokio::select! {
                biased;
                () = self.closed.cancelled() => return Err(self.dead()),
                permit = self.write_lock.lock() => permit,
                () = ctx.cancelled() => return Err(ExchangeError::Cancelled),
            };
            self.ensure_open()?;
            // A stalled write must not outlive the connection
            tokio::select! {
                biased;
                () = self.closed.cancelled() => return Err(self.dead()),
                sent = self.stream.send(frame) => sent,
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => {
                let reply = transport_copy(&e);
                self.fail(e);
                Err(reply)
            }
            Err(e) => Err(e),
        }
    }

    fn deliver(&self, result: RpcResult) {
        let id = result.id;
        let slot = self.pending().take(id);
        match slot {
            Some(tx) => {
                if tx.send(result).is_err() {
                    debug!(%id, "Caller went away before its result arrived");
                }
            }
            None => debug!(%id, "Dropping result with no waiter"),
        }
    }

    /// Record the first transport failure and release every waiter.
    ///
    /// The stream itself is closed by the dispatch loop, which exits on `closed`.
    fn fail(&self, error: ExchangeError) {
        if self.failure.get().is_none() {
            error!(error = %error, "Connection failed");
        }
        let _ = self.failure.set(error);
        self.release();
    }

    /// Mark the connection closed and drain the pending table. No I/O.
    fn release(&self) {
        self.closed.cancel();
        let drained = self.pending().drain();
        if drained > 0 {
            debug!(drained, "Cleared pending calls");
        }
    }

    async fn shutdown(&self) {
        self.release();
        match tokio::time::timeout(CLOSE_TIMEOUT, self.stream.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to close stream"),
            Err(_) => warn!(timeout = ?CLOSE_TIMEOUT, "Timed out closing stream"),
        }
    }
}

/// Removes a pending slot when the waiting call finishes or is dropped
struct PendingGuard<'a, S: Stream> {
    inner: &'a Inner<S>,
    id: CorrelationId,
}

impl<S: Stream> Drop for PendingGuard<'_, S> {
    fn drop(&mut self) {
        self.inner.pending().take(self.id);
    }
}

/// Bidirectional RPC connection over a single [`Stream`]
///
/// Many tasks may issue calls concurrently; exactly one dispatch task (started
/// with [`Connection::run`]) reads the stream and routes results back to their
/// callers and notifications to a [`Handler`]. The first transport error is
/// recorded and every waiting caller is released with [`ExchangeError::Cleared`]
/// before the stream is closed.
pub struct Connection<S: Stream> {
    inner: Arc<Inner<S>>,
}

impl<S: Stream> Clone for Connection<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Stream> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("pending", &self.pending_len())
            .field("closed", &self.inner.closed.is_cancelled())
            .field("failure", &self.inner.failure.get())
            .finish_non_exhaustive()
    }
}

impl<S: Stream> Connection<S> {
    pub fn new(stream: S) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                stream,
                next_id: AtomicU64::new(1),
                pending: Mutex::new(PendingTable::default()),
                write_lock: tokio::sync::Mutex::new(()),
                failure: OnceLock::new(),
                closed: CancellationToken::new(),
                running: AtomicBool::new(false),
                done,
            }),
        }
    }

    /// Issue a call
    ///
    /// With `want_result` the slot is registered before the frame is written, then
    /// the call waits for the first of: the result, `ctx` cancellation
    /// ([`ExchangeError::Cancelled`]) or connection death ([`ExchangeError::Cleared`]).
    /// A result arriving after the caller gave up is discarded.
    #[instrument(skip(self, ctx, params), fields(method = %method))]
    pub async fn call(
        &self,
        ctx: &CancellationToken,
        method: &str,
        params: Value,
        want_result: bool,
    ) -> Result<Option<RpcResult>, ExchangeError> {
        let inner = &*self.inner;
        inner.ensure_open()?;

        let call = Call::new(inner.next_id(), method, params);
        let slot = if want_result {
            let rx = inner
                .pending()
                .register(call.id())
                .ok_or(ExchangeError::Cleared)?;
            Some((
                rx,
                PendingGuard {
                    inner,
                    id: call.id(),
                },
            ))
        } else {
            None
        };

        let frame = inner.stream.encode(&call)?;
        inner.write(frame, ctx).await?;

        let Some((rx, _guard)) = slot else {
            return Ok(None);
        };

        tokio::select! {
            biased;
            result = rx => result.map(Some).map_err(|_| ExchangeError::Cleared),
            () = ctx.cancelled() => Err(ExchangeError::Cancelled),
            () = inner.closed.cancelled() => Err(ExchangeError::Cleared),
        }
    }

    /// Call and wait for the payload; a server-side error becomes [`ExchangeError::ApiError`]
    pub async fn request(
        &self,
        ctx: &CancellationToken,
        method: &str,
        params: Value,
    ) -> Result<Value, ExchangeError> {
        let result = self
            .call(ctx, method, params, true)
            .await?
            .ok_or_else(|| ExchangeError::Other(format!("{} returned no result", method)))?;

        result.outcome.map_err(|e| ExchangeError::ApiError {
            code: e.code,
            message: e.message,
        })
    }

    /// [`Connection::request`] bounded by a deadline
    pub async fn request_timeout(
        &self,
        ctx: &CancellationToken,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, ExchangeError> {
        tokio::time::timeout(timeout, self.request(ctx, method, params))
            .await
            .map_err(|_| {
                ExchangeError::ConnectionTimeout(format!(
                    "{} timed out after {:?}",
                    method, timeout
                ))
            })?
    }

    /// Fire-and-forget call
    pub async fn send(
        &self,
        ctx: &CancellationToken,
        method: &str,
        params: Value,
    ) -> Result<(), ExchangeError> {
        self.call(ctx, method, params, false).await.map(|_| ())
    }

    /// Start the dispatch task
    ///
    /// Notifications are handed to `handler` inline on the dispatch task, so a slow
    /// handler delays every later frame, results included.
    pub fn run(
        &self,
        ctx: CancellationToken,
        handler: Arc<dyn Handler>,
    ) -> Result<(), ExchangeError> {
        self.inner.ensure_open()?;
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Err(ExchangeError::AlreadyRunning);
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(dispatch(inner, ctx, handler));
        Ok(())
    }

    /// Close the stream and release every waiter. Idempotent.
    pub async fn close(&self) {
        self.inner.shutdown().await;
        if !self.inner.running.swap(true, Ordering::AcqRel) {
            // Never ran, nothing else will report completion
            self.inner.done.send_replace(true);
        }
    }

    /// Resolves once the dispatch task has exited
    pub async fn done(&self) {
        let mut rx = self.inner.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    pub fn is_done(&self) -> bool {
        *self.inner.done.borrow()
    }

    /// The transport failure that ended this connection, if any
    pub fn error(&self) -> Option<&ExchangeError> {
        self.inner.failure.get()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.pending().slots.len()
    }

    pub fn stream(&self) -> &S {
        &self.inner.stream
    }
}

async fn dispatch<S: Stream>(
    inner: Arc<Inner<S>>,
    ctx: CancellationToken,
    handler: Arc<dyn Handler>,
) {
    debug!("Dispatch loop started");

    loop {
        let next = tokio::select! {
            biased;
            () = inner.closed.cancelled() => break,
            () = ctx.cancelled() => {
                debug!("Dispatch loop cancelled by owner");
                break;
            }
            next = inner.stream.recv() => next,
        };

        match next {
            Some(Ok(Incoming::Result(result))) => inner.deliver(result),
            Some(Ok(Incoming::Notify(notify))) => handler.handle(&ctx, notify).await,
            Some(Err(e)) if e.is_fatal() => {
                inner.fail(e);
                break;
            }
            Some(Err(e)) => warn!(error = %e, "Skipping undecodable frame"),
            None => {
                debug!("Stream closed");
                break;
            }
        }
    }

    inner.shutdown().await;
    inner.done.send_replace(true);
    debug!("Dispatch loop exited");
}

/// Transport errors are reported to every caller; rebuild rather than clone.
pub(crate) fn transport_copy(error: &ExchangeError) -> ExchangeError {
    match error {
        ExchangeError::NetworkError(message) => ExchangeError::NetworkError(message.clone()),
        ExchangeError::ConnectionTimeout(message) => {
            ExchangeError::ConnectionTimeout(message.clone())
        }
        other => ExchangeError::NetworkError(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_table_refuses_after_drain() {
        let mut table = PendingTable::default();
        let mut rx = table.register(CorrelationId(1)).unwrap();
        assert_eq!(table.drain(), 1);
        assert!(rx.try_recv().is_err());
        assert!(table.register(CorrelationId(2)).is_none());
        assert!(table.slots.is_empty());
    }

    #[test]
    fn test_pending_table_take_once() {
        let mut table = PendingTable::default();
        let _rx = table.register(CorrelationId(5)).unwrap();
        assert!(table.take(CorrelationId(5)).is_some());
        assert!(table.take(CorrelationId(5)).is_none());
    }

    #[test]
    fn test_transport_copy_keeps_message() {
        let copy = transport_copy(&ExchangeError::NetworkError("reset by peer".to_string()));
        assert_eq!(copy.to_string(), "Network error: reset by peer");
    }
}
