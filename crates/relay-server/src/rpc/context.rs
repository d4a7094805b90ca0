//! Per-call RPC context.

use parking_lot::Mutex;
use relay_core::{ProtocolSession, ProtocolSessionId, SessionCode};
use relay_engine::{Identity, Relay};

/// Everything a handler sees for one front-door call.
pub struct RpcContext {
    /// Engine.
    pub relay: Relay,
    /// Validated identity headers.
    pub identity: Identity,
    session: Mutex<Option<ProtocolSession>>,
}

impl RpcContext {
    /// Context for a call, optionally already bound to a protocol session.
    pub fn new(relay: Relay, identity: Identity, session: Option<ProtocolSession>) -> Self {
        Self { relay, identity, session: Mutex::new(session) }
    }

    /// Bind the call to a session. `initialize` does this once it has
    /// created or resumed one.
    pub fn bind_session(&self, session: ProtocolSession) {
        *self.session.lock() = Some(session);
    }

    /// The bound session, if any.
    pub fn session(&self) -> Option<ProtocolSession> {
        self.session.lock().clone()
    }

    /// Id of the bound session.
    pub fn session_id(&self) -> Option<ProtocolSessionId> {
        self.session.lock().as_ref().map(|s| s.session_id.clone())
    }

    /// Pairing code tool calls target: the header first, then the one
    /// stored on the session.
    pub fn pairing_code(&self) -> Option<SessionCode> {
        self.identity
            .session_code
            .clone()
            .or_else(|| self.session.lock().as_ref().and_then(|s| s.pairing_code.clone()))
    }
}
