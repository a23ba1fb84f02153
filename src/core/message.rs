//! Message shapes moved over an RPC connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identifies one outstanding call within a connection's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub u64);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client to server request
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    id: CorrelationId,
    method: String,
    params: Value,
}

impl Call {
    pub fn new(id: CorrelationId, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    pub fn id(&self) -> CorrelationId {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> &Value {
        &self.params
    }
}

/// Application-level error carried inside a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Server reply to exactly one call
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResult {
    pub id: CorrelationId,
    pub outcome: Result<Value, RpcError>,
}

impl RpcResult {
    pub fn ok(id: CorrelationId, payload: Value) -> Self {
        Self {
            id,
            outcome: Ok(payload),
        }
    }

    pub fn err(id: CorrelationId, error: RpcError) -> Self {
        Self {
            id,
            outcome: Err(error),
        }
    }
}

/// Unsolicited server push
#[derive(Debug, Clone, PartialEq)]
pub struct Notify {
    pub method: String,
    pub payload: Value,
}

impl Notify {
    pub fn new(method: impl Into<String>, payload: Value) -> Self {
        Self {
            method: method.into(),
            payload,
        }
    }

    /// Channel name the push belongs to: `payload.channel` when present, else the method
    pub fn channel(&self) -> &str {
        self.payload
            .get("channel")
            .and_then(Value::as_str)
            .unwrap_or(&self.method)
    }

    /// Channel data: `payload.data` when present, else the whole payload
    pub fn data(&self) -> &Value {
        self.payload.get("data").unwrap_or(&self.payload)
    }
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Result(RpcResult),
    Notify(Notify),
}
