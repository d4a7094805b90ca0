//! # relay-engine
//!
//! The relay's behavior, independent of HTTP:
//!
//! - [`SessionManager`]: pairing-code issue, validation and deactivation
//! - [`Broker`]: correlation-id keyed request queue and write-once responses
//! - [`ManifestRegistry`]: tool catalogs with compiled argument schemas
//! - [`ProtocolSessions`]: front-door sessions with header validation and resumption
//! - [`CallMetrics`]: per-session and global call counters
//! - [`RateLimiter`]: fixed-window quotas
//!
//! Every component keeps its state in the injected [`SharedStore`], so any
//! instance can serve any call.

#![deny(unsafe_code)]

pub mod broker;
pub mod call_metrics;
pub mod manifest;
pub mod protocol;
pub mod rate_limit;
pub mod sessions;

pub use broker::{Applied, Broker, NewRequest, PollOutcome};
pub use call_metrics::{CallMetrics, MetricsScope, MetricsSnapshot};
pub use manifest::{ManifestDocument, ManifestRegistry, ToolManifest};
pub use protocol::{Identity, InitializeRequest, Initialized, ProtocolSessions, RawIdentity};
pub use rate_limit::{Decision, RateLimiter, Scope};
pub use sessions::{SessionInfo, SessionManager};

use std::sync::Arc;

use relay_core::{
    CorrelationId, Outcome, RelayError, Session, SessionCode, ToolRequest, ToolResponse,
};
use relay_settings::RelaySettings;
use relay_store::SharedStore;
use serde_json::Value;
use tracing::instrument;

/// Every engine component wired over one store and one settings value.
#[derive(Clone)]
pub struct Relay {
    /// Pairing sessions.
    pub sessions: SessionManager,
    /// Request/response broker.
    pub broker: Broker,
    /// Tool manifests.
    pub manifests: ManifestRegistry,
    /// Front-door sessions.
    pub protocol: ProtocolSessions,
    /// Front-door call counters.
    pub metrics: CallMetrics,
    /// Rate limiter.
    pub limiter: RateLimiter,
    settings: Arc<RelaySettings>,
    store: SharedStore,
}

impl Relay {
    /// Wire the engine.
    pub fn new(store: SharedStore, settings: RelaySettings, manifest: ToolManifest) -> Self {
        let limiter = RateLimiter::new(Arc::clone(&store));
        Self {
            sessions: SessionManager::new(
                Arc::clone(&store),
                limiter.clone(),
                settings.session.clone(),
                settings.rate_limits.session_create,
            ),
            broker: Broker::new(Arc::clone(&store), settings.broker.clone()),
            manifests: ManifestRegistry::new(manifest, Arc::clone(&store)),
            protocol: ProtocolSessions::new(Arc::clone(&store), settings.protocol.clone()),
            metrics: CallMetrics::new(
                Arc::clone(&store),
                settings.protocol.session_ttl(),
                settings.protocol.metrics_retention(),
            ),
            limiter,
            settings: Arc::new(settings),
            store,
        }
    }

    /// Settings the engine was built with.
    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// The shared store.
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Queue a request on behalf of a caller at `source_address`.
    ///
    /// Checks the session and the per-address quota before anything is
    /// written. Tool names and arguments pass through unchecked; manifest
    /// validation belongs to [`Relay::call_tool`].
    #[instrument(skip(self, req), fields(session_code = %req.session_code, request_id = %req.correlation_id))]
    pub async fn submit_request(
        &self,
        source_address: &str,
        req: NewRequest,
    ) -> Result<Applied, RelayError> {
        let _ = self.sessions.validate(&req.session_code).await?;
        let actor = format!("{source_address}:{}", req.session_code);
        let _ = self
            .limiter
            .enforce(Scope::RequestSubmit, &actor, self.settings.rate_limits.request_submit)
            .await?;
        self.broker.enqueue(req).await
    }

    /// Store a browser-side outcome. `result` and `error` are checked
    /// before the store is touched.
    pub async fn submit_response(
        &self,
        code: &SessionCode,
        id: &CorrelationId,
        result: Option<Value>,
        error: Option<Value>,
    ) -> Result<Applied, RelayError> {
        let outcome = Outcome::from_parts(result, error)?;
        let _ = self.sessions.validate(code).await?;
        self.broker.complete(code, id, outcome).await
    }

    /// Drain a live session's queue.
    pub async fn drain(&self, code: &SessionCode) -> Result<Vec<ToolRequest>, RelayError> {
        let _: Session = self.sessions.validate(code).await?;
        self.broker.drain(code).await
    }

    /// Validate, enqueue and wait for a tool call from the front door.
    ///
    /// Returns the correlation id with the response. On timeout the
    /// request stays queued and its result can be polled later.
    #[instrument(skip(self, arguments), fields(session_code = %code))]
    pub async fn call_tool(
        &self,
        code: &SessionCode,
        tool_name: &str,
        arguments: Value,
    ) -> Result<(CorrelationId, ToolResponse), RelayError> {
        let _ = self.sessions.validate(code).await?;
        let manifest = self.manifests.for_session(code).await?;
        manifest.validate_arguments(tool_name, &arguments)?;

        let id = CorrelationId::generate();
        let _ = self
            .broker
            .enqueue(NewRequest {
                session_code: code.clone(),
                correlation_id: id.clone(),
                tool_name: tool_name.to_owned(),
                arguments,
            })
            .await?;
        let response = self
            .broker
            .wait_for(code, &id, self.settings.broker.call_timeout())
            .await?;
        Ok((id, response))
    }
}
