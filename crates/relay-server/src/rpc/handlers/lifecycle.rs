//! `initialize` and `ping`.

use async_trait::async_trait;
use relay_core::{ClientInfo, SessionCode};
use relay_engine::InitializeRequest;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::instrument;

use super::parse_params;
use crate::rpc::context::RpcContext;
use crate::rpc::errors::RpcError;
use crate::rpc::registry::MethodHandler;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeParams {
    protocol_version: Option<String>,
    client_info: Option<ClientInfo>,
    session_code: Option<String>,
}

/// Create or resume a protocol session.
///
/// Identity headers win over the equivalent params. A pairing code, when
/// given, must belong to a live session.
pub struct InitializeHandler;

#[async_trait]
impl MethodHandler for InitializeHandler {
    #[instrument(skip_all, fields(method = "initialize"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let params: InitializeParams = parse_params(params)?;

        let pairing_code = match (&ctx.identity.session_code, params.session_code.as_deref()) {
            (Some(code), _) => Some(code.clone()),
            (None, Some(raw)) => Some(SessionCode::parse(raw)?),
            (None, None) => None,
        };
        if let Some(code) = &pairing_code {
            let _ = ctx.relay.sessions.validate(code).await?;
        }

        let initialized = ctx
            .relay
            .protocol
            .initialize(InitializeRequest {
                session_id: ctx.identity.session_id.clone(),
                client_info: ctx.identity.client_info.clone().or(params.client_info),
                protocol_version: ctx.identity.protocol_version.clone().or(params.protocol_version),
                pairing_code,
            })
            .await?;

        let session = initialized.session;
        let result = json!({
            "protocolVersion": session.protocol_version,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": {
                "name": ctx.relay.settings().protocol.server_name,
                "version": env!("CARGO_PKG_VERSION"),
            },
            "_meta": {
                "sessionId": session.session_id,
                "resumed": initialized.resumed,
                "pairingCode": session.pairing_code,
            },
        });
        ctx.bind_session(session);
        Ok(result)
    }
}

/// Liveness check. Needs no session.
pub struct PingHandler;

#[async_trait]
impl MethodHandler for PingHandler {
    async fn handle(&self, _params: Option<Value>, _ctx: &RpcContext) -> Result<Value, RpcError> {
        Ok(json!({}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::errors;
    use crate::rpc::handlers::test_helpers::{make_relay, make_test_context};
    use relay_core::{ProtocolSessionId, ProtocolStatus};
    use relay_engine::Identity;
    use relay_settings::RelaySettings;

    #[tokio::test]
    async fn initialize_mints_session_and_binds_it() {
        let ctx = make_test_context();
        let result = InitializeHandler
            .handle(Some(json!({"clientInfo": {"name": "agent"}})), &ctx)
            .await
            .unwrap();
        assert_eq!(result["protocolVersion"], "2025-06-18");
        assert_eq!(result["_meta"]["resumed"], false);

        let session = ctx.session().unwrap();
        assert!(session.session_id.as_str().starts_with("mcp_"));
        assert_eq!(session.status, ProtocolStatus::Active);
        assert_eq!(session.client_info.unwrap().name, "agent");
    }

    #[tokio::test]
    async fn header_version_wins_over_params() {
        let relay = make_relay(RelaySettings::default());
        let identity = Identity {
            protocol_version: Some("2024-11-05".into()),
            ..Identity::default()
        };
        let ctx = RpcContext::new(relay, identity, None);
        let result = InitializeHandler
            .handle(Some(json!({"protocolVersion": "2025-03-26"})), &ctx)
            .await
            .unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
    }

    #[tokio::test]
    async fn resume_keeps_identity() {
        let relay = make_relay(RelaySettings::default());
        let id = ProtocolSessionId::parse("client-session-01").unwrap();
        let identity = Identity { session_id: Some(id.clone()), ..Identity::default() };

        let first = RpcContext::new(relay.clone(), identity.clone(), None);
        let _ = InitializeHandler
            .handle(Some(json!({"clientInfo": {"name": "first"}})), &first)
            .await
            .unwrap();

        let second = RpcContext::new(relay, identity, None);
        let result = InitializeHandler
            .handle(Some(json!({"clientInfo": {"name": "second"}})), &second)
            .await
            .unwrap();
        assert_eq!(result["_meta"]["resumed"], true);
        let session = second.session().unwrap();
        assert_eq!(session.session_id, id);
        assert_eq!(session.status, ProtocolStatus::Active);
        assert_eq!(session.client_info.unwrap().name, "first");
    }

    #[tokio::test]
    async fn unknown_pairing_code_is_not_found() {
        let ctx = make_test_context();
        let err = InitializeHandler
            .handle(Some(json!({"sessionCode": "ABCDEFGH"})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), errors::NOT_FOUND);
        assert!(ctx.session().is_none());
    }

    #[tokio::test]
    async fn malformed_pairing_code_is_invalid_params() {
        let ctx = make_test_context();
        let err = InitializeHandler
            .handle(Some(json!({"sessionCode": "nope"})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), errors::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn ping_returns_empty_object() {
        let ctx = make_test_context();
        assert_eq!(PingHandler.handle(None, &ctx).await.unwrap(), json!({}));
    }
}
