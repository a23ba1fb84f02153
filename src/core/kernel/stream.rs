use crate::core::errors::ExchangeError;
use crate::core::message::{Call, Incoming};
use async_trait::async_trait;
use tokio_tungstenite::tungstenite::Message;

/// One ordered, bidirectional frame stream owned by a single connection
///
/// Encoding is split from sending so the connection can serialize only the
/// write itself. `recv` is only ever called from the connection's dispatch
/// task, `send` may be called from many tasks (the connection serializes it).
#[async_trait]
pub trait Stream: Send + Sync + 'static {
    /// Encode a call into a wire frame
    fn encode(&self, call: &Call) -> Result<Message, ExchangeError>;

    /// Write one encoded frame
    async fn send(&self, frame: Message) -> Result<(), ExchangeError>;

    /// Read the next decoded frame
    ///
    /// # Returns
    /// - `Some(Ok(message))` - a decoded frame
    /// - `Some(Err(error))` - a decode or transport error, see [`ExchangeError::is_fatal`]
    /// - `None` - the stream was closed
    async fn recv(&self) -> Option<Result<Incoming, ExchangeError>>;

    /// Close the stream. Must be safe to call more than once.
    async fn close(&self) -> Result<(), ExchangeError>;
}
