//! JSON-RPC 2.0 wire types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::RpcError;

/// Protocol version string every envelope carries.
pub const JSONRPC_VERSION: &str = "2.0";

/// A parsed request or notification.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcRequest {
    /// Request id. `None` marks a notification; an explicit `null` is `Some(Null)`.
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Method params.
    pub params: Option<Value>,
}

impl RpcRequest {
    /// Validate a decoded body as a single JSON-RPC 2.0 request.
    pub fn from_value(value: Value) -> Result<Self, RpcError> {
        let mut obj = match value {
            Value::Object(obj) => obj,
            Value::Array(_) => {
                return Err(RpcError::invalid_request("batch requests are not supported"));
            }
            _ => return Err(RpcError::invalid_request("request must be a JSON object")),
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(RpcError::invalid_request("jsonrpc must be \"2.0\""));
        }

        let id = obj.remove("id");
        if let Some(id) = &id {
            if !(id.is_string() || id.is_number() || id.is_null()) {
                return Err(RpcError::invalid_request("id must be a string, number or null"));
            }
        }

        let method = match obj.remove("method") {
            Some(Value::String(m)) if !m.is_empty() => m,
            _ => return Err(RpcError::invalid_request("method must be a non-empty string")),
        };

        let params = match obj.remove("params") {
            None | Some(Value::Null) => None,
            Some(p @ (Value::Object(_) | Value::Array(_))) => Some(p),
            Some(_) => return Err(RpcError::invalid_request("params must be an object or array")),
        };

        Ok(Self { id, method, params })
    }

    /// Whether the caller expects no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Id to echo in the response (`null` for notifications).
    pub fn response_id(&self) -> Value {
        self.id.clone().unwrap_or(Value::Null)
    }

    /// Params as an object, empty when absent.
    pub fn params_object(params: Option<Value>) -> Result<Map<String, Value>, RpcError> {
        match params {
            None => Ok(Map::new()),
            Some(Value::Object(map)) => Ok(map),
            Some(_) => Err(RpcError::invalid_params("params must be an object")),
        }
    }
}

/// Error member of a response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    /// Numeric error code.
    pub code: i64,
    /// Client-safe message.
    pub message: String,
    /// Structured details (`kind`, offending fields, `requestId`...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A response envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Echoed request id.
    pub id: Value,
    /// Result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

impl RpcResponse {
    /// Successful response.
    pub fn success(id: Value, result: Value) -> Self {
        Self { jsonrpc: JSONRPC_VERSION.into(), id, result: Some(result), error: None }
    }

    /// Error response.
    pub fn failure(id: Value, error: &RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: None,
            error: Some(error.to_error_body()),
        }
    }

    /// Whether this response reports a failure, including tool-level
    /// failures carried as `isError` results.
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
            || self
                .result
                .as_ref()
                .and_then(|r| r.get("isError"))
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }
}
