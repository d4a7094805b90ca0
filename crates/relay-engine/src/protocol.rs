//! Front-door protocol sessions.
//!
//! Identity arrives in headers. Parsing collects every offending header so
//! one round trip reports all of them. Sessions live under
//! `protocol:{sessionId}` with a sliding expiry refreshed on each call.

use std::time::Duration;

use chrono::Utc;
use relay_core::{
    ClientInfo, FieldError, ProtocolSession, ProtocolSessionId, ProtocolStatus, RelayError,
    SessionCode,
};
use relay_settings::ProtocolSettings;
use relay_store::{SharedStore, StoreExt};
use tracing::{debug, info, instrument};

/// Session id header.
pub const SESSION_ID_HEADER: &str = "Mcp-Session-Id";
/// Client identity header (JSON object).
pub const CLIENT_INFO_HEADER: &str = "X-Client-Info";
/// Protocol version header.
pub const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
/// Pairing code header.
pub const SESSION_CODE_HEADER: &str = "X-Session-Code";

/// Store key for a protocol session.
pub fn protocol_key(id: &ProtocolSessionId) -> String {
    format!("protocol:{id}")
}

/// Raw identity headers as received.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawIdentity<'a> {
    /// `Mcp-Session-Id`.
    pub session_id: Option<&'a str>,
    /// `X-Client-Info`.
    pub client_info: Option<&'a str>,
    /// `MCP-Protocol-Version`.
    pub protocol_version: Option<&'a str>,
    /// `X-Session-Code`.
    pub session_code: Option<&'a str>,
}

/// Validated identity headers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Identity {
    /// Session id, if sent.
    pub session_id: Option<ProtocolSessionId>,
    /// Client identity, if sent.
    pub client_info: Option<ClientInfo>,
    /// Protocol version, if sent.
    pub protocol_version: Option<String>,
    /// Pairing code, if sent.
    pub session_code: Option<SessionCode>,
}

/// Validate every identity header, reporting all failures together.
pub fn parse_identity(raw: RawIdentity<'_>, supported: &[String]) -> Result<Identity, RelayError> {
    let mut errors = Vec::new();
    let mut identity = Identity::default();

    if let Some(id) = raw.session_id {
        match ProtocolSessionId::parse(id) {
            Ok(id) => identity.session_id = Some(id),
            Err(_) => errors.push(FieldError {
                field: SESSION_ID_HEADER.into(),
                message: "must be 8-128 characters of [A-Za-z0-9_-]".into(),
            }),
        }
    }

    if let Some(info) = raw.client_info {
        match serde_json::from_str::<serde_json::Value>(info) {
            Ok(v) if v.is_object() && v.get("name").is_some_and(serde_json::Value::is_string) => {
                match serde_json::from_value::<ClientInfo>(v) {
                    Ok(info) => identity.client_info = Some(info),
                    Err(e) => errors.push(FieldError {
                        field: CLIENT_INFO_HEADER.into(),
                        message: e.to_string(),
                    }),
                }
            }
            Ok(_) => errors.push(FieldError {
                field: CLIENT_INFO_HEADER.into(),
                message: "must be a JSON object with a string \"name\"".into(),
            }),
            Err(e) => errors.push(FieldError {
                field: CLIENT_INFO_HEADER.into(),
                message: format!("invalid JSON: {e}"),
            }),
        }
    }

    if let Some(version) = raw.protocol_version {
        if supported.iter().any(|s| s == version) {
            identity.protocol_version = Some(version.to_owned());
        } else {
            errors.push(FieldError {
                field: PROTOCOL_VERSION_HEADER.into(),
                message: format!("unsupported version '{version}', expected one of {}", supported.join(", ")),
            });
        }
    }

    if let Some(code) = raw.session_code {
        match SessionCode::parse(code) {
            Ok(code) => identity.session_code = Some(code),
            Err(_) => errors.push(FieldError {
                field: SESSION_CODE_HEADER.into(),
                message: "must be 8 characters of A-Z and 2-7".into(),
            }),
        }
    }

    if errors.is_empty() {
        Ok(identity)
    } else {
        Err(RelayError::invalid_fields(errors))
    }
}

/// What `initialize` asked for, after header and param merging.
#[derive(Clone, Debug, Default)]
pub struct InitializeRequest {
    /// Session id from the header, if any.
    pub session_id: Option<ProtocolSessionId>,
    /// Client identity (header wins over params).
    pub client_info: Option<ClientInfo>,
    /// Requested protocol version (header wins over params).
    pub protocol_version: Option<String>,
    /// Pairing code (header wins over params).
    pub pairing_code: Option<SessionCode>,
}

/// Outcome of [`ProtocolSessions::initialize`].
#[derive(Clone, Debug, PartialEq)]
pub struct Initialized {
    /// The stored session.
    pub session: ProtocolSession,
    /// Whether an existing session was resumed.
    pub resumed: bool,
}

/// Store-backed protocol session registry.
#[derive(Clone)]
pub struct ProtocolSessions {
    store: SharedStore,
    settings: ProtocolSettings,
}

impl ProtocolSessions {
    /// Registry over `store`.
    pub fn new(store: SharedStore, settings: ProtocolSettings) -> Self {
        Self { store, settings }
    }

    /// Accepted protocol versions, preferred first.
    pub fn supported_versions(&self) -> &[String] {
        &self.settings.supported_versions
    }

    /// Sliding session lifetime.
    pub fn ttl(&self) -> Duration {
        self.settings.session_ttl()
    }

    /// Create a session, or resume one whose id is still live.
    ///
    /// Resuming refreshes `lastSeenAt` and may retarget the pairing code but
    /// keeps the original client identity and protocol version.
    #[instrument(skip(self, req), fields(protocol_session = ?req.session_id))]
    pub async fn initialize(&self, req: InitializeRequest) -> Result<Initialized, RelayError> {
        if let Some(id) = &req.session_id {
            if self.store.get_as::<ProtocolSession>(&protocol_key(id)).await?.is_some() {
                let session = self.touch(id, req.pairing_code).await?;
                info!("protocol session resumed");
                return Ok(Initialized { session, resumed: true });
            }
        }

        let protocol_version = match req.protocol_version {
            Some(v) if self.supported_versions().contains(&v) => v,
            Some(v) => {
                return Err(RelayError::invalid_field(
                    "protocolVersion",
                    format!("unsupported version '{v}'"),
                ));
            }
            None => self
                .supported_versions()
                .first()
                .cloned()
                .ok_or_else(|| RelayError::Internal("no supported protocol versions".into()))?,
        };

        let now = Utc::now();
        let session = ProtocolSession {
            session_id: req.session_id.unwrap_or_default(),
            client_info: req.client_info,
            protocol_version,
            status: ProtocolStatus::Active,
            pairing_code: req.pairing_code,
            created_at: now,
            last_seen_at: now,
        };
        self.store
            .set_as(&protocol_key(&session.session_id), &session, self.ttl())
            .await?;
        info!(protocol_session = %session.session_id, "protocol session created");
        Ok(Initialized { session, resumed: false })
    }

    /// Record a call on a live session. `lastSeenAt` and the expiry are
    /// refreshed and a supplied pairing code replaces the stored one.
    pub async fn touch(
        &self,
        id: &ProtocolSessionId,
        pairing_code: Option<SessionCode>,
    ) -> Result<ProtocolSession, RelayError> {
        let key = protocol_key(id);
        let mut session: ProtocolSession = self
            .store
            .get_as(&key)
            .await?
            .ok_or_else(|| RelayError::NotFound { resource: "protocol session", id: id.to_string() })?;
        session.status = ProtocolStatus::Active;
        session.last_seen_at = Utc::now();
        if pairing_code.is_some() {
            session.pairing_code = pairing_code;
        }
        self.store.set_as(&key, &session, self.ttl()).await?;
        debug!(protocol_session = %id, "protocol session touched");
        Ok(session)
    }

    /// Read a session without mutating it.
    pub async fn get(&self, id: &ProtocolSessionId) -> Result<Option<ProtocolSession>, RelayError> {
        Ok(self.store.get_as(&protocol_key(id)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use relay_store::MemoryStore;
    use std::sync::Arc;
    use tokio::time::advance;

    fn supported() -> Vec<String> {
        ProtocolSettings::default().supported_versions
    }

    fn sessions() -> ProtocolSessions {
        ProtocolSessions::new(Arc::new(MemoryStore::new()), ProtocolSettings::default())
    }

    #[test]
    fn all_bad_headers_reported_together() {
        let err = parse_identity(
            RawIdentity {
                session_id: Some("bad id!"),
                client_info: Some(r#"{"version":"1"}"#),
                protocol_version: Some("1999-01-01"),
                session_code: Some("nope"),
            },
            &supported(),
        )
        .unwrap_err();
        let fields: Vec<&str> = err.field_errors().iter().map(|f| f.field.as_str()).collect();
        assert_eq!(
            fields,
            [SESSION_ID_HEADER, CLIENT_INFO_HEADER, PROTOCOL_VERSION_HEADER, SESSION_CODE_HEADER]
        );
    }

    #[test]
    fn client_info_must_be_object_with_name() {
        for bad in ["[]", "\"cli\"", r#"{"name": 3}"#, "{not json"] {
            let err = parse_identity(
                RawIdentity { client_info: Some(bad), ..RawIdentity::default() },
                &supported(),
            )
            .unwrap_err();
            assert_eq!(err.field_errors()[0].field, CLIENT_INFO_HEADER, "{bad}");
        }
    }

    #[test]
    fn valid_headers_parse() {
        let id = parse_identity(
            RawIdentity {
                session_id: Some("client-session-01"),
                client_info: Some(r#"{"name":"agent","version":"2.1"}"#),
                protocol_version: Some("2025-06-18"),
                session_code: Some("abcdefgh"),
            },
            &supported(),
        )
        .unwrap();
        assert_eq!(id.session_id.unwrap().as_str(), "client-session-01");
        assert_eq!(id.client_info.unwrap().name, "agent");
        assert_eq!(id.session_code.unwrap().as_str(), "ABCDEFGH");
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_mints_id_when_absent() {
        let ps = sessions();
        let init = ps.initialize(InitializeRequest::default()).await.unwrap();
        assert!(!init.resumed);
        assert!(init.session.session_id.as_str().starts_with("mcp_"));
        assert_eq!(init.session.status, ProtocolStatus::Active);
        assert_eq!(init.session.protocol_version, "2025-06-18");
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_rejects_unsupported_version() {
        let ps = sessions();
        let req = InitializeRequest {
            protocol_version: Some("2020-01-01".into()),
            ..InitializeRequest::default()
        };
        assert_matches!(ps.initialize(req).await, Err(RelayError::Validation { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn known_id_resumes_without_resetting() {
        let ps = sessions();
        let id = ProtocolSessionId::parse("client-session-01").unwrap();
        let first = ps
            .initialize(InitializeRequest {
                session_id: Some(id.clone()),
                protocol_version: Some("2025-03-26".into()),
                ..InitializeRequest::default()
            })
            .await
            .unwrap();

        advance(Duration::from_secs(10)).await;
        let again = ps
            .initialize(InitializeRequest {
                session_id: Some(id.clone()),
                protocol_version: Some("2025-06-18".into()),
                pairing_code: Some(SessionCode::parse("ABCDEFGH").unwrap()),
                ..InitializeRequest::default()
            })
            .await
            .unwrap();
        assert!(again.resumed);
        assert_eq!(again.session.created_at, first.session.created_at);
        assert_eq!(again.session.protocol_version, "2025-03-26");
        assert_eq!(again.session.status, ProtocolStatus::Active);
        assert_eq!(again.session.pairing_code.unwrap().as_str(), "ABCDEFGH");
    }

    #[tokio::test(start_paused = true)]
    async fn touch_slides_expiry() {
        let ps = sessions();
        let init = ps.initialize(InitializeRequest::default()).await.unwrap();
        let id = init.session.session_id;
        advance(ps.ttl() - Duration::from_secs(1)).await;
        let _ = ps.touch(&id, None).await.unwrap();
        advance(ps.ttl() - Duration::from_secs(1)).await;
        assert!(ps.get(&id).await.unwrap().is_some());
        advance(Duration::from_secs(2)).await;
        assert_matches!(ps.touch(&id, None).await, Err(RelayError::NotFound { .. }));
    }
}
