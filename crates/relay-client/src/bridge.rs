//! The executor bridge: requests in, responses out.

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::DispatchedRequest;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::backoff::Backoff;
use crate::client::RelayClient;
use crate::error::ClientError;
use crate::source::RequestSource;

/// Runs tools on the browser side.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run `tool`. `Err` carries the error payload returned to the caller.
    async fn execute(&self, tool: &str, arguments: Value) -> Result<Value, Value>;
}

/// Counters for one bridge run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Requests handed to the executor.
    pub executed: u64,
    /// Executions that returned an error payload.
    pub failed: u64,
    /// Responses the relay refused.
    pub rejected: u64,
}

/// Why a bridge run ended.
#[derive(Debug)]
pub enum BridgeExit {
    /// The cancellation token fired.
    Cancelled(BridgeStats),
    /// The pairing session is gone.
    SessionGone(BridgeStats),
}

impl BridgeExit {
    /// Counters at exit.
    pub fn stats(&self) -> BridgeStats {
        match self {
            Self::Cancelled(s) | Self::SessionGone(s) => *s,
        }
    }
}

/// Pull requests from `source`, execute them, and submit each outcome.
///
/// Transient source errors are retried with `backoff`. Non-retryable errors
/// end the run with `Err`.
#[instrument(skip_all, fields(session_code = %code))]
pub async fn run_bridge(
    client: &RelayClient,
    code: &str,
    source: &mut dyn RequestSource,
    executor: Arc<dyn ToolExecutor>,
    backoff: Backoff,
    cancel: CancellationToken,
) -> Result<BridgeExit, ClientError> {
    let mut stats = BridgeStats::default();
    let mut failures = 0u32;
    info!(transport = source.transport(), "bridge started");

    loop {
        let batch = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!(?stats, "bridge cancelled");
                return Ok(BridgeExit::Cancelled(stats));
            }
            batch = source.next_batch() => batch,
        };

        let batch = match batch {
            Ok(batch) => {
                failures = 0;
                batch
            }
            Err(e) if e.is_session_gone() => {
                info!(?stats, "pairing session ended");
                return Ok(BridgeExit::SessionGone(stats));
            }
            Err(e) if e.is_retryable() => {
                let delay = e.retry_after().unwrap_or_else(|| backoff.delay(failures));
                failures = failures.saturating_add(1);
                warn!(error = %e, transport = source.transport(), retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "request source failed");
                tokio::select! {
                    () = cancel.cancelled() => return Ok(BridgeExit::Cancelled(stats)),
                    () = tokio::time::sleep(delay) => continue,
                }
            }
            Err(e) => return Err(e),
        };

        for request in batch {
            let outcome = execute(executor.as_ref(), &request).await;
            stats.executed += 1;
            if outcome.is_err() {
                stats.failed += 1;
            }
            match client.submit_response(code, &request.id, &outcome).await {
                Ok(ack) => debug!(request_id = %request.id, status = %ack.status, duplicate = ack.duplicate, "response submitted"),
                Err(e) if e.is_session_gone() => return Ok(BridgeExit::SessionGone(stats)),
                Err(e) => {
                    stats.rejected += 1;
                    warn!(request_id = %request.id, error = %e, "response rejected");
                }
            }
        }
    }
}

async fn execute(executor: &dyn ToolExecutor, request: &DispatchedRequest) -> Result<Value, Value> {
    let outcome = executor.execute(&request.tool, request.arguments.clone()).await;
    if let Err(err) = &outcome {
        debug!(request_id = %request.id, tool = %request.tool, error = %err, "tool failed");
    }
    outcome.map_err(|err| match err {
        Value::Object(_) => err,
        other => json!({ "message": other }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Echo;

    #[async_trait]
    impl ToolExecutor for Echo {
        async fn execute(&self, tool: &str, arguments: Value) -> Result<Value, Value> {
            match tool {
                "echo" => Ok(arguments),
                other => Err(json!(format!("unknown tool {other}"))),
            }
        }
    }

    /// Replays scripted batches, then reports the session gone.
    struct Scripted(VecDeque<Result<Vec<DispatchedRequest>, ClientError>>);

    #[async_trait]
    impl RequestSource for Scripted {
        async fn next_batch(&mut self) -> Result<Vec<DispatchedRequest>, ClientError> {
            self.0
                .pop_front()
                .unwrap_or_else(|| Err(ClientError::SessionGone { code: "ABCDEFGH".into() }))
        }

        fn transport(&self) -> &'static str {
            "scripted"
        }
    }

    fn req(id: &str, tool: &str) -> DispatchedRequest {
        serde_json::from_value(json!({"id": id, "tool": tool, "arguments": {"text": id}})).unwrap()
    }

    async fn accepting_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/response"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "id": "x", "status": "completed", "duplicate": false
            })))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn executes_and_submits_until_session_ends() {
        let server = accepting_server().await;
        let client = RelayClient::new(server.uri());
        let mut source = Scripted(VecDeque::from([
            Ok(vec![req("r1", "echo"), req("r2", "nope")]),
            Ok(vec![]),
            Err(ClientError::StreamClosed),
            Ok(vec![req("r3", "echo")]),
        ]));

        let exit = run_bridge(
            &client,
            "ABCDEFGH",
            &mut source,
            Arc::new(Echo),
            Backoff::fixed(1, 1),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(matches!(exit, BridgeExit::SessionGone(_)));
        assert_eq!(exit.stats(), BridgeStats { executed: 3, failed: 1, rejected: 0 });

        let bodies: Vec<Value> = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect();
        assert_eq!(bodies.len(), 3);
        assert_eq!(bodies[0]["result"]["text"], "r1");
        assert_eq!(bodies[1]["error"]["message"], "unknown tool nope");
        assert!(bodies[1].get("result").is_none());
    }

    #[tokio::test]
    async fn non_retryable_source_error_ends_run() {
        let client = RelayClient::new("http://127.0.0.1:9");
        let mut source = Scripted(VecDeque::from([Err(ClientError::Decode("bad".into()))]));
        let result = run_bridge(
            &client,
            "ABCDEFGH",
            &mut source,
            Arc::new(Echo),
            Backoff::default(),
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(ClientError::Decode(_))));
    }

    #[tokio::test]
    async fn rejected_responses_are_counted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/response"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "error": {"kind": "conflict", "message": "already completed"}
            })))
            .mount(&server)
            .await;
        let client = RelayClient::new(server.uri());
        let mut source = Scripted(VecDeque::from([Ok(vec![req("r1", "echo")])]));
        let exit = run_bridge(
            &client,
            "ABCDEFGH",
            &mut source,
            Arc::new(Echo),
            Backoff::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(exit.stats().rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_retry_wait() {
        let client = RelayClient::new("http://127.0.0.1:9");
        let mut source = Scripted(VecDeque::from([Err(ClientError::StreamClosed)]));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let _ = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let exit = run_bridge(
            &client,
            "ABCDEFGH",
            &mut source,
            Arc::new(Echo),
            Backoff::fixed(60_000, 60_000),
            cancel,
        )
        .await
        .unwrap();
        assert!(matches!(exit, BridgeExit::Cancelled(_)));
    }
}
