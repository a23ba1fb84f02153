use crate::core::errors::ExchangeError;
use crate::core::message::{Call, CorrelationId, Incoming, Notify, RpcError, RpcResult};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

/// Codec trait for converting between raw WebSocket frames and RPC messages
///
/// Each venue wire format implements this trait. Control frames (ping, pong,
/// close) never reach the codec; they are handled at the transport level.
pub trait RpcCodec: Send + Sync + 'static {
    /// Encode a call into a WebSocket frame
    fn encode_call(&self, call: &Call) -> Result<Message, ExchangeError>;

    /// Decode a data frame
    ///
    /// # Returns
    /// - `Ok(Some(message))` - a result or a notification
    /// - `Ok(None)` - frame was ignored by the codec
    /// - `Err(error)` - frame could not be decoded
    fn decode_message(&self, message: Message) -> Result<Option<Incoming>, ExchangeError>;
}

/// JSON-RPC 2.0 over text frames
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRpcCodec;

impl JsonRpcCodec {
    pub fn new() -> Self {
        Self
    }

    fn decode_value(value: Value) -> Result<Option<Incoming>, ExchangeError> {
        let Value::Object(mut object) = value else {
            return Err(ExchangeError::DeserializationError(
                "JSON-RPC frame is not an object".to_string(),
            ));
        };

        let has_outcome = object.contains_key("result") || object.contains_key("error");
        let id = object.remove("id").filter(|id| !id.is_null());
        if let (Some(id), true) = (id, has_outcome) {
            let id = id.as_u64().map(CorrelationId).ok_or_else(|| {
                ExchangeError::DeserializationError(format!(
                    "JSON-RPC id is not an unsigned integer: {}",
                    id
                ))
            })?;

            let outcome = match object.remove("error") {
                Some(error) if !error.is_null() => {
                    let error: RpcError = serde_json::from_value(error).map_err(|e| {
                        ExchangeError::DeserializationError(format!(
                            "Failed to parse JSON-RPC error: {}",
                            e
                        ))
                    })?;
                    Err(error)
                }
                _ => Ok(object.remove("result").unwrap_or(Value::Null)),
            };

            return Ok(Some(Incoming::Result(RpcResult { id, outcome })));
        }

        if let Some(Value::String(method)) = object.remove("method") {
            let payload = object.remove("params").unwrap_or(Value::Null);
            return Ok(Some(Incoming::Notify(Notify { method, payload })));
        }

        Ok(None)
    }
}

impl RpcCodec for JsonRpcCodec {
    fn encode_call(&self, call: &Call) -> Result<Message, ExchangeError> {
        let frame = json!({
            "jsonrpc": "2.0",
            "id": call.id().0,
            "method": call.method(),
            "params": call.params(),
        });
        Ok(Message::Text(frame.to_string()))
    }

    fn decode_message(&self, message: Message) -> Result<Option<Incoming>, ExchangeError> {
        let text = match message {
            Message::Text(text) => text,
            Message::Binary(data) => String::from_utf8(data).map_err(|e| {
                ExchangeError::DeserializationError(format!(
                    "Invalid UTF-8 in binary message: {}",
                    e
                ))
            })?,
            _ => return Ok(None),
        };
        let value: Value = serde_json::from_str(&text).map_err(|e| {
            ExchangeError::DeserializationError(format!("Failed to parse JSON: {}", e))
        })?;

        Self::decode_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(text: &str) -> Result<Option<Incoming>, ExchangeError> {
        JsonRpcCodec::new().decode_message(Message::Text(text.to_string()))
    }

    #[test]
    fn test_encode_call() {
        let codec = JsonRpcCodec::new();
        let call = Call::new(
            CorrelationId(7),
            "public/subscribe",
            json!({"channels": ["book.BTC-PERPETUAL.raw"]}),
        );

        if let Message::Text(text) = codec.encode_call(&call).unwrap() {
            let value: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(value["jsonrpc"], "2.0");
            assert_eq!(value["id"], 7);
            assert_eq!(value["method"], "public/subscribe");
            assert_eq!(value["params"]["channels"][0], "book.BTC-PERPETUAL.raw");
        } else {
            panic!("Expected text message");
        }
    }

    #[test]
    fn test_decode_result() {
        let decoded = decode(r#"{"jsonrpc":"2.0","id":3,"result":["a","b"]}"#).unwrap();
        assert_eq!(
            decoded,
            Some(Incoming::Result(RpcResult::ok(
                CorrelationId(3),
                json!(["a", "b"])
            )))
        );
    }

    #[test]
    fn test_decode_error_result() {
        let decoded =
            decode(r#"{"jsonrpc":"2.0","id":4,"error":{"code":10001,"message":"bad channel"}}"#)
                .unwrap();
        match decoded {
            Some(Incoming::Result(RpcResult { id, outcome: Err(error) })) => {
                assert_eq!(id, CorrelationId(4));
                assert_eq!(error.code, 10001);
                assert_eq!(error.message, "bad channel");
            }
            other => panic!("Expected error result, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_notification() {
        let decoded = decode(
            r#"{"jsonrpc":"2.0","method":"subscription","params":{"channel":"trades","data":[]}}"#,
        )
        .unwrap();
        match decoded {
            Some(Incoming::Notify(notify)) => {
                assert_eq!(notify.method, "subscription");
                assert_eq!(notify.channel(), "trades");
            }
            other => panic!("Expected notification, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode("not json").is_err());
        assert!(decode("[1,2,3]").is_err());
        assert!(decode(r#"{"id":"abc","result":1}"#).is_err());
    }

    #[test]
    fn test_decode_ignores_unknown_shapes() {
        assert_eq!(decode(r#"{"jsonrpc":"2.0","usIn":1}"#).unwrap(), None);
        let codec = JsonRpcCodec::new();
        assert_eq!(codec.decode_message(Message::Ping(vec![1])).unwrap(), None);
    }
}
