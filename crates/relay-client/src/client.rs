//! HTTP client for the relay's REST surface.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use relay_core::{CorrelationId, DispatchedRequest};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::backoff::parse_retry_after;
use crate::error::ClientError;
use crate::sse::{SseEvent, parse_events};

/// Boxed event stream of one `GET /api/stream` response.
pub type EventStream = Pin<Box<dyn Stream<Item = SseEvent> + Send>>;

/// Answer of `POST /api/sessions`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSession {
    /// Pairing code.
    pub code: String,
    /// Lifetime in seconds.
    pub ttl: u64,
    /// Absolute expiry, RFC 3339.
    pub expires_at: String,
}

/// Answer of `GET /api/sessions/{code}`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// Pairing code.
    pub code: String,
    /// Whether the session still accepts traffic.
    pub active: bool,
    /// Seconds until the relay forgets the session.
    pub ttl_remaining: u64,
    /// Capability tags.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Answer of the submit endpoints.
#[derive(Clone, Debug, Deserialize)]
pub struct Ack {
    /// Correlation id.
    pub id: String,
    /// `queued`, `completed` or `error`.
    pub status: String,
    /// Whether an identical submission had already been applied.
    pub duplicate: bool,
}

/// Answer of `GET /api/response`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolledResponse {
    /// Correlation id.
    pub id: String,
    /// `queued`, `completed` or `error`.
    pub status: String,
    /// Success payload.
    #[serde(default)]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Deserialize)]
struct Drained {
    requests: Vec<DispatchedRequest>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse<'a> {
    session_code: &'a str,
    request_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a Value>,
}

/// Client for one relay base URL.
#[derive(Clone, Debug)]
pub struct RelayClient {
    http: reqwest::Client,
    base_url: String,
}

impl RelayClient {
    /// Client with a default `reqwest` configuration.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_http(reqwest::Client::new(), base_url)
    }

    /// Client reusing an existing `reqwest::Client`.
    pub fn with_http(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { http, base_url }
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// `POST /api/sessions`.
    pub async fn create_session(&self, capabilities: &[String]) -> Result<CreatedSession, ClientError> {
        let resp = self
            .http
            .post(self.url("/api/sessions"))
            .json(&json!({ "capabilities": capabilities }))
            .send()
            .await?;
        decode(resp).await
    }

    /// `GET /api/sessions/{code}`.
    pub async fn session(&self, code: &str) -> Result<SessionStatus, ClientError> {
        let resp = self.http.get(self.url(&format!("/api/sessions/{code}"))).send().await?;
        decode(resp).await
    }

    /// `DELETE /api/sessions/{code}`.
    pub async fn end_session(&self, code: &str) -> Result<(), ClientError> {
        let resp = self.http.delete(self.url(&format!("/api/sessions/{code}"))).send().await?;
        check(resp).await.map(drop)
    }

    /// `GET /api/requests?code=`: take every queued request.
    pub async fn drain(&self, code: &str) -> Result<Vec<DispatchedRequest>, ClientError> {
        let resp = self
            .http
            .get(self.url("/api/requests"))
            .query(&[("code", code)])
            .send()
            .await?;
        let drained: Drained = decode(resp).await.map_err(|e| e.for_session(code))?;
        Ok(drained.requests)
    }

    /// `GET /api/stream?code=`: open the event stream.
    pub async fn open_stream(&self, code: &str) -> Result<EventStream, ClientError> {
        let resp = self
            .http
            .get(self.url("/api/stream"))
            .query(&[("code", code)])
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let resp = check(resp).await.map_err(|e| e.for_session(code))?;
        debug!(session_code = %code, "event stream opened");
        Ok(parse_events(Box::pin(resp.bytes_stream())).boxed())
    }

    /// `POST /api/request`.
    pub async fn submit_request(
        &self,
        code: &str,
        request_id: &str,
        tool: &str,
        arguments: &Value,
    ) -> Result<Ack, ClientError> {
        let resp = self
            .http
            .post(self.url("/api/request"))
            .json(&json!({
                "sessionCode": code,
                "requestId": request_id,
                "toolName": tool,
                "arguments": arguments,
            }))
            .send()
            .await?;
        decode(resp).await
    }

    /// `POST /api/response` with either a result or an error.
    pub async fn submit_response(
        &self,
        code: &str,
        id: &CorrelationId,
        outcome: &Result<Value, Value>,
    ) -> Result<Ack, ClientError> {
        let (result, error) = match outcome {
            Ok(v) => (Some(v), None),
            Err(e) => (None, Some(e)),
        };
        let resp = self
            .http
            .post(self.url("/api/response"))
            .json(&SubmitResponse { session_code: code, request_id: id.as_str(), result, error })
            .send()
            .await?;
        decode(resp).await
    }

    /// `GET /api/response?sessionCode=&requestId=`.
    pub async fn poll_response(&self, code: &str, request_id: &str) -> Result<PolledResponse, ClientError> {
        let resp = self
            .http
            .get(self.url("/api/response"))
            .query(&[("sessionCode", code), ("requestId", request_id)])
            .send()
            .await?;
        decode(resp).await
    }
}

async fn check(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    Err(api_error(status, &body, retry_after))
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let resp = check(resp).await?;
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
}

fn api_error(status: StatusCode, body: &Value, retry_after: Option<std::time::Duration>) -> ClientError {
    let (kind, message) = match body.get("error") {
        Some(Value::Object(err)) => (
            err.get("kind").and_then(Value::as_str),
            err.get("message").and_then(Value::as_str),
        ),
        Some(Value::String(msg)) => (None, Some(msg.as_str())),
        _ => (None, None),
    };
    ClientError::Api {
        status: status.as_u16(),
        kind: kind.unwrap_or("unknown").to_owned(),
        message: message
            .map_or_else(|| status.canonical_reason().unwrap_or("error").to_owned(), str::to_owned),
        retry_after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = RelayClient::new("http://relay.local/");
        assert_eq!(client.base_url(), "http://relay.local");
        assert_eq!(client.url("/api/sessions"), "http://relay.local/api/sessions");
    }

    #[test]
    fn api_error_reads_envelope() {
        let body = json!({"error": {"kind": "rate_limited", "message": "slow down"}});
        let err = api_error(StatusCode::TOO_MANY_REQUESTS, &body, Some(Duration::from_secs(2)));
        assert_matches!(err, ClientError::Api { status: 429, ref kind, ref message, retry_after: Some(_) }
            if kind == "rate_limited" && message == "slow down");
    }

    #[test]
    fn api_error_tolerates_flat_and_missing_bodies() {
        let err = api_error(StatusCode::FORBIDDEN, &json!({"error": "session expired", "code": "SESSION_EXPIRED"}), None);
        assert_matches!(err, ClientError::Api { ref kind, ref message, .. } if kind == "unknown" && message == "session expired");
        let err = api_error(StatusCode::BAD_GATEWAY, &Value::Null, None);
        assert_matches!(err, ClientError::Api { status: 502, ref message, .. } if message == "Bad Gateway");
    }

    #[tokio::test]
    async fn drain_decodes_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/requests"))
            .and(query_param("code", "ABCDEFGH"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "requests": [{"id": "r1", "tool": "echo", "arguments": {"text": "hi"}}]
            })))
            .mount(&server)
            .await;

        let client = RelayClient::new(server.uri());
        let requests = client.drain("ABCDEFGH").await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].id.as_str(), "r1");
        assert_eq!(requests[0].tool, "echo");
    }

    #[tokio::test]
    async fn drain_maps_expired_to_session_gone() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/requests"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"kind": "expired", "message": "session ABCDEFGH has expired"}
            })))
            .mount(&server)
            .await;

        let err = RelayClient::new(server.uri()).drain("ABCDEFGH").await.unwrap_err();
        assert!(err.is_session_gone());
    }

    #[tokio::test]
    async fn submit_response_sends_exactly_one_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/response"))
            .and(body_json(json!({"sessionCode": "ABCDEFGH", "requestId": "r1", "error": {"message": "boom"}})))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "id": "r1", "status": "error", "duplicate": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let id = CorrelationId::parse("r1").unwrap();
        let ack = RelayClient::new(server.uri())
            .submit_response("ABCDEFGH", &id, &Err(json!({"message": "boom"})))
            .await
            .unwrap();
        assert_eq!(ack.status, "error");
        assert!(!ack.duplicate);
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/sessions"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "7")
                    .set_body_json(json!({"error": {"kind": "rate_limited", "message": "slow down"}})),
            )
            .mount(&server)
            .await;

        let err = RelayClient::new(server.uri()).create_session(&[]).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn open_stream_parses_events() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/stream"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(
                        "event: connection\ndata: {}\n\nevent: tool-request\nid: r1\ndata: {\"id\":\"r1\",\"tool\":\"echo\",\"arguments\":{}}\n\n",
                    ),
            )
            .mount(&server)
            .await;

        let events: Vec<SseEvent> = RelayClient::new(server.uri())
            .open_stream("ABCDEFGH")
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event, "tool-request");
        assert_eq!(events[1].id.as_deref(), Some("r1"));
    }
}
