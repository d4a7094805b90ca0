//! `RelayServer`: Axum router, shared state and the serve loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use relay_engine::Relay;
use relay_telemetry::metrics::{PrometheusHandle, render};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer, ExposeHeaders};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::{manifest, requests, sessions, stream};
use crate::headers;
use crate::health::{self, HealthResponse};
use crate::rpc::{self, MethodRegistry, endpoint};
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Engine over the shared store.
    pub relay: Relay,
    /// Front-door method registry.
    pub registry: Arc<MethodRegistry>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub prometheus: Option<PrometheusHandle>,
}

/// The relay HTTP server.
pub struct RelayServer {
    relay: Relay,
    registry: Arc<MethodRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    prometheus: Option<PrometheusHandle>,
}

impl RelayServer {
    /// Server with every front-door method registered.
    pub fn new(relay: Relay) -> Self {
        Self::with_registry(relay, rpc::default_registry())
    }

    /// Server with a custom method registry.
    pub fn with_registry(relay: Relay, registry: MethodRegistry) -> Self {
        Self {
            relay,
            registry: Arc::new(registry),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            prometheus: None,
        }
    }

    /// Serve `/metrics/prometheus` from `handle`.
    #[must_use]
    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            relay: self.relay.clone(),
            registry: Arc::clone(&self.registry),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            prometheus: self.prometheus.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics/prometheus", get(prometheus_handler))
            .route("/api/sessions", post(sessions::create_session))
            .route(
                "/api/sessions/{code}",
                get(sessions::get_session).delete(sessions::delete_session),
            )
            .route("/api/sessions/{code}/metadata", get(manifest::session_metadata))
            .route("/api/sessions/{code}/manifest", post(manifest::register_manifest))
            .route("/api/manifest", get(manifest::get_manifest))
            .route("/api/stream", get(stream::open_stream))
            .route("/api/requests", get(requests::drain_requests))
            .route("/api/request", post(requests::submit_request))
            .route(
                "/api/response",
                post(requests::submit_response).get(requests::poll_response),
            )
            .route("/mcp", post(endpoint::handle_rpc))
            .route("/mcp/metrics", get(endpoint::call_metrics))
            .layer(self.cors_layer())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    fn cors_layer(&self) -> CorsLayer {
        let origins = &self.relay.settings().server.cors_origins;
        let allow_origin = if origins.iter().any(|o| o == "*") {
            AllowOrigin::from(Any)
        } else {
            let parsed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|o| match HeaderValue::from_str(o) {
                    Ok(v) => Some(v),
                    Err(_) => {
                        warn!(origin = %o, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(parsed)
        };
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(ExposeHeaders::list(
                headers::EXPOSED.iter().map(|h| HeaderName::from_static(*h)),
            ))
    }

    /// Accept connections on `listener` until shutdown is requested.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        info!(%addr, "relay listening");
        let token = self.shutdown.token();
        axum::serve(
            listener,
            self.router().into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
    }

    /// The engine.
    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the method registry.
    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store = state.relay.store();
    let reachable = match store.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "store ping failed");
            false
        }
    };
    let resp = health::health_check(state.start_time, store.backend(), reachable);
    let status = if resp.is_ok() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(resp))
}

/// GET /metrics/prometheus
async fn prometheus_handler(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use relay_engine::manifest::default_manifest;
    use relay_settings::RelaySettings;
    use relay_store::MemoryStore;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tower::ServiceExt;

    fn make_server_with(settings: RelaySettings) -> RelayServer {
        let relay = Relay::new(
            Arc::new(MemoryStore::new()),
            settings,
            default_manifest().unwrap(),
        );
        RelayServer::new(relay)
    }

    fn make_server() -> RelayServer {
        make_server_with(RelaySettings::default())
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = axum::body::to_bytes(resp.into_body(), 1_000_000).await.unwrap();
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or_else(|_| json!(String::from_utf8_lossy(&body)))
        };
        (status, headers, value)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_req(method: Method, uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn delete_req(uri: &str) -> Request<Body> {
        Request::builder().method(Method::DELETE).uri(uri).body(Body::empty()).unwrap()
    }

    /// Open `/api/stream` for `code` and collect the whole event stream.
    async fn stream_text(app: &Router, code: &str) -> String {
        let resp = app
            .clone()
            .oneshot(get_req(&format!("/api/stream?code={code}")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 1_000_000).await.unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    fn rpc_req(session: Option<&str>, extra: &[(&str, &str)], body: &Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/mcp")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(s) = session {
            builder = builder.header("Mcp-Session-Id", s);
        }
        for (k, v) in extra {
            builder = builder.header(*k, *v);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn create_session(app: &Router) -> String {
        let (status, _, body) = send(app, json_req(Method::POST, "/api/sessions", &json!({}))).await;
        assert_eq!(status, StatusCode::CREATED);
        body["code"].as_str().unwrap().to_owned()
    }

    #[test]
    fn registry_has_front_door_methods() {
        let server = make_server();
        assert_eq!(server.registry().methods(), vec!["initialize", "ping", "tools/call", "tools/list"]);
        assert!(!server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn health_and_unrouted_paths() {
        let app = make_server().router();
        let (status, _, body) = send(&app, get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["store"]["backend"], "memory");

        // No recorder installed.
        assert_eq!(send(&app, get_req("/metrics/prometheus")).await.0, StatusCode::NOT_FOUND);
        assert_eq!(send(&app, get_req("/nonexistent")).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let app = make_server().router();
        let (status, _, created) = send(
            &app,
            json_req(Method::POST, "/api/sessions", &json!({"capabilities": ["tables"]})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["ttl"], 1800);
        let code = created["code"].as_str().unwrap();
        assert_eq!(code.len(), 8);

        let (status, _, info) = send(&app, get_req(&format!("/api/sessions/{code}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(info["active"], true);
        assert_eq!(info["capabilities"][0], "tables");
        assert!(info["ttlRemaining"].as_u64().unwrap() <= 1800);

        let (status, _, _) = send(&app, delete_req(&format!("/api/sessions/{code}"))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _, info) = send(&app, get_req(&format!("/api/sessions/{code}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(info["active"], false);

        let (status, _, err) = send(&app, get_req(&format!("/api/requests?code={code}"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(err["error"]["kind"], "expired");

        let empty = Request::builder().method(Method::POST).uri("/api/sessions").body(Body::empty()).unwrap();
        let (status, _, body) = send(&app, empty).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["expiresAt"].is_string());
    }

    #[tokio::test]
    async fn session_creation_is_rate_limited_per_address() {
        let mut settings = RelaySettings::default();
        settings.rate_limits.session_create.limit = 2;
        let app = make_server_with(settings).router();
        let from = |addr: &str| {
            Request::builder()
                .method(Method::POST)
                .uri("/api/sessions")
                .header("x-forwarded-for", addr)
                .body(Body::empty())
                .unwrap()
        };
        assert_eq!(send(&app, from("198.51.100.1")).await.0, StatusCode::CREATED);
        assert_eq!(send(&app, from("198.51.100.1")).await.0, StatusCode::CREATED);
        let (status, headers, body) = send(&app, from("198.51.100.1")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(headers.contains_key(header::RETRY_AFTER));
        assert_eq!(body["error"]["kind"], "rate_limited");
        assert_eq!(send(&app, from("198.51.100.2")).await.0, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn malformed_and_unknown_codes() {
        let app = make_server().router();
        let (status, _, body) = send(&app, get_req("/api/sessions/abc")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "validation");

        let (status, _, body) = send(&app, get_req("/api/sessions/ABCDEFGH")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["kind"], "not_found");

        let (status, _, _) = send(&app, get_req("/api/requests")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn submit_drain_complete_poll() {
        let app = make_server().router();
        let code = create_session(&app).await;

        let submit = json!({
            "sessionCode": code, "requestId": "req-1", "toolName": "echo",
            "arguments": {"text": "hi"}
        });
        let (status, _, ack) = send(&app, json_req(Method::POST, "/api/request", &submit)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(ack["status"], "queued");
        assert_eq!(ack["duplicate"], false);

        let (status, _, ack) = send(&app, json_req(Method::POST, "/api/request", &submit)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(ack["duplicate"], true);

        let mut changed = submit.clone();
        changed["arguments"] = json!({"text": "bye"});
        let (status, _, err) = send(&app, json_req(Method::POST, "/api/request", &changed)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(err["error"]["kind"], "conflict");

        let poll_uri = format!("/api/response?sessionCode={code}&requestId=req-1");
        let (status, _, pending) = send(&app, get_req(&poll_uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pending["status"], "queued");

        let (_, _, drained) = send(&app, get_req(&format!("/api/requests?code={code}"))).await;
        assert_eq!(drained["requests"].as_array().unwrap().len(), 1);
        assert_eq!(drained["requests"][0]["id"], "req-1");
        assert_eq!(drained["requests"][0]["tool"], "echo");

        let (_, _, again) = send(&app, get_req(&format!("/api/requests?code={code}"))).await;
        assert!(again["requests"].as_array().unwrap().is_empty());

        let both = json!({"sessionCode": code, "requestId": "req-1", "result": 1, "error": "x"});
        let (status, _, _) = send(&app, json_req(Method::POST, "/api/response", &both)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let done = json!({"sessionCode": code, "requestId": "req-1", "result": {"text": "hi"}});
        let (status, _, ack) = send(&app, json_req(Method::POST, "/api/response", &done)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(ack["status"], "completed");

        let (status, _, completed) = send(&app, get_req(&poll_uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(completed["status"], "completed");
        assert_eq!(completed["result"]["text"], "hi");

        let (status, _, _) =
            send(&app, get_req(&format!("/api/response?sessionCode={code}&requestId=nope"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn submit_queues_any_tool_name() {
        let app = make_server().router();
        let code = create_session(&app).await;
        for (rid, tool, args) in [("r1", "echo", json!({"text": 5})), ("r2", "format_disk", json!({}))] {
            let body = json!({"sessionCode": code, "requestId": rid, "toolName": tool, "arguments": args});
            let (status, _, ack) = send(&app, json_req(Method::POST, "/api/request", &body)).await;
            assert_eq!(status, StatusCode::ACCEPTED, "{tool}");
            assert_eq!(ack["status"], "queued");
        }
        let (_, _, drained) = send(&app, get_req(&format!("/api/requests?code={code}"))).await;
        assert_eq!(drained["requests"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn malformed_json_body_uses_error_envelope() {
        let app = make_server().router();
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/request")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "validation");
    }

    #[tokio::test]
    async fn manifest_negotiation() {
        let app = make_server().router();
        let (status, headers, body) = send(&app, get_req("/api/manifest")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["api-version"], "1.0.0");
        assert_eq!(headers["tool-manifest-version"], "1.0.0");
        assert_eq!(headers["supported-versions"], "1.0.0");
        assert_eq!(body["apiVersion"], "1.0.0");
        assert!(body["tools"].as_array().unwrap().iter().any(|t| t["name"] == "echo"));

        let req = Request::builder()
            .uri("/api/manifest")
            .header("Accept-Version", "9.9.9")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::NOT_ACCEPTABLE);
        assert_eq!(body["code"], "VERSION_NOT_SUPPORTED");
        assert_eq!(body["requestedVersion"], "9.9.9");
        assert_eq!(body["supportedVersions"][0], "1.0.0");
    }

    #[tokio::test]
    async fn session_metadata_and_expiry() {
        let app = make_server().router();
        let (status, _, _) = send(&app, get_req("/api/sessions/ABCDEFGH/metadata")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let code = create_session(&app).await;
        let (status, _, body) = send(&app, get_req(&format!("/api/sessions/{code}/metadata"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["toolManifestVersion"], "1.0.0");

        let _ = send(&app, delete_req(&format!("/api/sessions/{code}"))).await;
        let (status, _, body) = send(&app, get_req(&format!("/api/sessions/{code}/metadata"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "SESSION_EXPIRED");
    }

    #[tokio::test]
    async fn session_specific_manifest_replaces_global() {
        let app = make_server().router();
        let code = create_session(&app).await;
        let doc = json!({
            "toolManifestVersion": "2.0.0",
            "tools": [{
                "name": "sum",
                "description": "Add numbers",
                "inputSchema": {"type": "object", "properties": {"values": {"type": "array"}}, "required": ["values"]}
            }]
        });
        let (status, _, _) =
            send(&app, json_req(Method::POST, &format!("/api/sessions/{code}/manifest"), &doc)).await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, headers, body) = send(&app, get_req(&format!("/api/manifest?sessionCode={code}"))).await;
        assert_eq!(headers["tool-manifest-version"], "2.0.0");
        assert_eq!(body["tools"][0]["name"], "sum");

        let init = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {"sessionCode": code}});
        let (_, headers, _) = send(&app, rpc_req(None, &[], &init)).await;
        let sid = headers["mcp-session-id"].to_str().unwrap().to_owned();
        let call = json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {
            "name": "echo", "arguments": {"text": "x"}
        }});
        let (_, _, body) = send(&app, rpc_req(Some(&sid), &[], &call)).await;
        assert_eq!(body["error"]["code"], rpc::errors::INVALID_PARAMS);

        let dup = json!({"toolManifestVersion": "2.0.1", "tools": [doc["tools"][0], doc["tools"][0]]});
        let (status, _, _) =
            send(&app, json_req(Method::POST, &format!("/api/sessions/{code}/manifest"), &dup)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_delivers_queued_requests_then_reconnects() {
        let mut settings = RelaySettings::default();
        settings.stream.max_duration_ms = 3_000;
        let app = make_server_with(settings).router();
        let code = create_session(&app).await;
        let submit = json!({
            "sessionCode": code, "requestId": "req-9", "toolName": "list_datasets", "arguments": {}
        });
        let _ = send(&app, json_req(Method::POST, "/api/request", &submit)).await;

        let text = stream_text(&app, &code).await;
        let connection = text.find("event: connection").unwrap();
        let request = text.find("event: tool-request").unwrap();
        let reconnect = text.find("event: reconnect").unwrap();
        assert!(connection < request && request < reconnect, "{text}");
        assert!(text.contains("id: req-9"));
        assert!(text.contains("\"tool\":\"list_datasets\""));
        assert!(text.contains("max-duration"));
    }

    #[tokio::test(start_paused = true)]
    async fn stream_emits_heartbeats() {
        let mut settings = RelaySettings::default();
        settings.stream.heartbeat_ms = 1_000;
        settings.stream.max_duration_ms = 3_500;
        let app = make_server_with(settings).router();
        let code = create_session(&app).await;
        let text = stream_text(&app, &code).await;
        assert_eq!(text.matches("event: heartbeat").count(), 3, "{text}");
    }

    #[tokio::test(start_paused = true)]
    async fn stream_ends_when_session_is_deactivated() {
        let server = make_server();
        let app = server.router();
        let code = create_session(&app).await;
        let relay = server.relay().clone();
        let parsed = relay_core::SessionCode::parse(&code).unwrap();
        let _ = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_500)).await;
            relay.sessions.deactivate(&parsed).await.unwrap();
        });

        let text = stream_text(&app, &code).await;
        assert!(text.contains("event: session-expired"), "{text}");
        assert!(!text.contains("event: reconnect"));
    }

    #[tokio::test(start_paused = true)]
    async fn stream_ends_on_shutdown() {
        let server = make_server();
        let app = server.router();
        let code = create_session(&app).await;
        let resp = app
            .clone()
            .oneshot(get_req(&format!("/api/stream?code={code}")))
            .await
            .unwrap();
        let body = tokio::spawn(axum::body::to_bytes(resp.into_body(), 1_000_000));
        assert_eq!(server.shutdown().open_streams(), 1);

        let report = server.shutdown().graceful_shutdown(Some(Duration::from_secs(1))).await;
        assert_eq!(report.streams_at_start, 1);
        assert!(report.is_clean(), "{report:?}");
        let text = String::from_utf8(body.await.unwrap().unwrap().to_vec()).unwrap();
        assert!(text.contains("\"reason\":\"shutdown\""), "{text}");
    }

    #[tokio::test]
    async fn stream_rejects_unknown_code_with_json() {
        let app = make_server().router();
        let (status, _, body) = send(&app, get_req("/api/stream?code=ABCDEFGH")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["kind"], "not_found");
    }

    #[tokio::test]
    async fn rpc_initialize_then_list() {
        let app = make_server().router();
        let init = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {
            "protocolVersion": "2025-06-18", "clientInfo": {"name": "agent"}
        }});
        let (status, headers, body) = send(&app, rpc_req(None, &[], &init)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["protocolVersion"], "2025-06-18");
        let sid = headers["mcp-session-id"].to_str().unwrap().to_owned();
        assert!(sid.starts_with("mcp_"));
        assert!(headers.contains_key("x-processing-time-ms"));

        let (_, _, m) = send(&app, get_req(&format!("/mcp/metrics?sessionId={sid}"))).await;
        assert_eq!(m["status"], "active");

        let list = json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"});
        let (_, headers, body) = send(&app, rpc_req(Some(&sid), &[], &list)).await;
        assert_eq!(headers["mcp-session-id"], sid.as_str());
        assert!(body["result"]["tools"].as_array().unwrap().len() >= 3);
    }

    #[tokio::test]
    async fn rpc_envelope_errors() {
        let app = make_server().router();
        let req = Request::builder()
            .method(Method::POST)
            .uri("/mcp")
            .body(Body::from("{oops"))
            .unwrap();
        let (_, _, body) = send(&app, req).await;
        assert_eq!(body["error"]["code"], rpc::errors::PARSE_ERROR);
        assert_eq!(body["id"], Value::Null);

        let (_, _, body) = send(&app, rpc_req(None, &[], &json!({"jsonrpc": "2.0", "id": 1}))).await;
        assert_eq!(body["error"]["code"], rpc::errors::INVALID_REQUEST);

        let (_, _, body) =
            send(&app, rpc_req(None, &[], &json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))).await;
        assert_eq!(body["error"]["code"], rpc::errors::INVALID_PARAMS);

        let (_, _, body) = send(
            &app,
            rpc_req(Some("never-initialized"), &[], &json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})),
        )
        .await;
        assert_eq!(body["error"]["code"], rpc::errors::NOT_FOUND);

        let (_, _, body) =
            send(&app, rpc_req(None, &[], &json!({"jsonrpc": "2.0", "id": 7, "method": "ping"}))).await;
        assert_eq!(body["result"], json!({}));
        assert_eq!(body["id"], 7);
    }

    #[tokio::test]
    async fn rpc_header_validation_lists_every_field_and_mutates_nothing() {
        let app = make_server().router();
        let init = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"});
        let (_, headers, body) = send(
            &app,
            rpc_req(
                Some("bad id!"),
                &[("X-Client-Info", "{\"version\": 1}"), ("MCP-Protocol-Version", "1999-01-01")],
                &init,
            ),
        )
        .await;
        assert_eq!(body["error"]["code"], rpc::errors::INVALID_PARAMS);
        let fields: Vec<&str> = body["error"]["data"]["fields"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["field"].as_str().unwrap())
            .collect();
        assert_eq!(fields, vec!["Mcp-Session-Id", "X-Client-Info", "MCP-Protocol-Version"]);
        assert!(!headers.contains_key("mcp-session-id"));
    }

    #[tokio::test]
    async fn rpc_notification_is_accepted_without_body() {
        let app = make_server().router();
        let note = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        let (status, _, body) = send(&app, rpc_req(None, &[], &note)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn rpc_unknown_tool_queues_nothing() {
        let app = make_server().router();
        let code = create_session(&app).await;
        let init = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {"sessionCode": code}});
        let (_, headers, _) = send(&app, rpc_req(None, &[], &init)).await;
        let sid = headers["mcp-session-id"].to_str().unwrap().to_owned();

        let call = json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {
            "name": "format_disk", "arguments": {}
        }});
        let (_, _, body) = send(&app, rpc_req(Some(&sid), &[], &call)).await;
        assert_eq!(body["error"]["code"], rpc::errors::INVALID_PARAMS);

        let (_, _, drained) = send(&app, get_req(&format!("/api/requests?code={code}"))).await;
        assert!(drained["requests"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rpc_calls_are_rate_limited_per_session() {
        let mut settings = RelaySettings::default();
        settings.rate_limits.protocol_call.limit = 2;
        let app = make_server_with(settings).router();
        let init = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"});
        let (_, headers, _) = send(&app, rpc_req(Some("rate-limited-1"), &[], &init)).await;
        assert_eq!(headers["mcp-session-id"], "rate-limited-1");

        let ping = json!({"jsonrpc": "2.0", "id": 2, "method": "ping"});
        let (_, _, body) = send(&app, rpc_req(Some("rate-limited-1"), &[], &ping)).await;
        assert!(body.get("result").is_some());
        let (_, _, body) = send(&app, rpc_req(Some("rate-limited-1"), &[], &ping)).await;
        assert_eq!(body["error"]["code"], rpc::errors::RATE_LIMITED);
        assert!(body["error"]["data"]["retryAfter"].as_u64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn rpc_metrics_accumulate_across_resume() {
        let app = make_server().router();
        let init = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"});
        let _ = send(&app, rpc_req(Some("metrics-sess-1"), &[], &init)).await;
        let list = json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"});
        let _ = send(&app, rpc_req(Some("metrics-sess-1"), &[], &list)).await;

        let (_, _, resumed) = send(&app, rpc_req(Some("metrics-sess-1"), &[], &init)).await;
        assert_eq!(resumed["result"]["_meta"]["resumed"], true);
        let bad = json!({"jsonrpc": "2.0", "id": 3, "method": "tools/delete"});
        let _ = send(&app, rpc_req(Some("metrics-sess-1"), &[], &bad)).await;

        let (status, _, m) = send(&app, get_req("/mcp/metrics?sessionId=metrics-sess-1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(m["status"], "active");
        assert_eq!(m["metrics"]["calls"], 4);
        assert_eq!(m["metrics"]["errors"], 1);

        let (_, _, g) = send(&app, get_req("/mcp/metrics")).await;
        assert_eq!(g["scope"], "global");
        assert!(g["metrics"]["calls"].as_u64().unwrap() >= 4);

        let (status, _, _) = send(&app, get_req("/mcp/metrics?sessionId=nobody-at-all")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _, _) = send(&app, get_req("/mcp/metrics?sessionId=bad")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test(start_paused = true)]
    async fn rpc_metrics_outlive_session_ttl_while_in_use() {
        let app = make_server().router();
        let init = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"});
        let _ = send(&app, rpc_req(Some("long-lived-1"), &[], &init)).await;
        let ping = json!({"jsonrpc": "2.0", "id": 2, "method": "ping"});
        // Eight ten-minute gaps span more than the one-hour session TTL.
        for _ in 0..8 {
            tokio::time::advance(Duration::from_secs(600)).await;
            let (_, _, body) = send(&app, rpc_req(Some("long-lived-1"), &[], &ping)).await;
            assert!(body.get("result").is_some(), "{body}");
        }

        let (_, _, m) = send(&app, get_req("/mcp/metrics?sessionId=long-lived-1")).await;
        assert_eq!(m["status"], "active");
        assert_eq!(m["metrics"]["calls"], 9);
    }
}
