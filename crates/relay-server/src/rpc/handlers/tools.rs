//! `tools/list` and `tools/call`.

use async_trait::async_trait;
use relay_core::{CorrelationId, Outcome, RelayError};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument};

use super::parse_params;
use crate::rpc::context::RpcContext;
use crate::rpc::errors::RpcError;
use crate::rpc::registry::MethodHandler;

/// Manifest in force for the bound pairing code, else the global one.
pub struct ToolsListHandler;

#[async_trait]
impl MethodHandler for ToolsListHandler {
    async fn handle(&self, _params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let manifest = match ctx.pairing_code() {
            Some(code) => ctx.relay.manifests.for_session(&code).await?,
            None => ctx.relay.manifests.global(),
        };
        Ok(json!({ "tools": manifest.tools() }))
    }
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// Queue a tool call for the browser and wait for its outcome.
pub struct ToolsCallHandler;

#[async_trait]
impl MethodHandler for ToolsCallHandler {
    #[instrument(skip_all, fields(method = "tools/call"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let params: CallParams = parse_params(params)?;
        let code = ctx.pairing_code().ok_or_else(|| {
            RelayError::invalid_field(
                "sessionCode",
                "no pairing code bound; send X-Session-Code or initialize with sessionCode",
            )
        })?;
        let arguments = params.arguments.unwrap_or_else(|| Value::Object(Map::new()));

        let (id, response) = ctx.relay.call_tool(&code, &params.name, arguments).await?;
        debug!(request_id = %id, tool = %params.name, is_error = response.outcome.is_error(), "tool call completed");
        Ok(call_result(&id, &response.outcome))
    }
}

/// Render an outcome as a tool-call result.
pub fn call_result(id: &CorrelationId, outcome: &Outcome) -> Value {
    let (payload, is_error) = match outcome {
        Outcome::Result(v) => (v, false),
        Outcome::Error(e) => (e, true),
    };
    let text = match payload {
        Value::String(s) => s.clone(),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .filter(|_| is_error)
            .map_or_else(|| other.to_string(), str::to_owned),
    };
    let structured = match (payload, is_error) {
        (Value::Object(_), _) => payload.clone(),
        (_, false) => json!({ "result": payload }),
        (_, true) => json!({ "error": payload }),
    };
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error,
        "structuredContent": structured,
        "_meta": { "requestId": id },
    })
}
