//! Per-connection session state.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::Agent;
use crate::error::ProtocolError;
use crate::phone::CanonicalPhone;

/// Lifecycle of a session.
///
/// ```text
/// CONNECTING ──► AWAITING_INIT ──init──► ACTIVE
///                      │                   │
///                      └──close/idle───────┴──► CLOSING ──► CLOSED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    AwaitingInit,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::AwaitingInit => "awaiting_init",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }

    pub fn is_terminating(&self) -> bool {
        matches!(self, SessionState::Closing | SessionState::Closed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One client connection and the agent bound to it.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub state: SessionState,
    pub phone: Option<CanonicalPhone>,
    pub agent: Option<Agent>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    cancel: CancellationToken,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Connecting,
            phone: None,
            agent: None,
            created_at: now,
            last_active_at: now,
            cancel: CancellationToken::new(),
        }
    }

    /// Token cancelled when the session starts closing.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    /// The client has been told its session id.
    pub fn mark_established(&mut self) {
        if self.state == SessionState::Connecting {
            self.state = SessionState::AwaitingInit;
        }
    }

    /// Whether an `init` may be processed now.
    pub fn check_init(&self) -> Result<(), ProtocolError> {
        match self.state {
            SessionState::Connecting | SessionState::AwaitingInit => Ok(()),
            SessionState::Active => Err(ProtocolError::AlreadyInitialized),
            SessionState::Closing | SessionState::Closed => Err(ProtocolError::Closing),
        }
    }

    /// Whether a `message` may be dispatched now.
    pub fn check_message(&self) -> Result<(), ProtocolError> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::Connecting | SessionState::AwaitingInit => {
                Err(ProtocolError::NotInitialized)
            }
            SessionState::Closing | SessionState::Closed => Err(ProtocolError::Closing),
        }
    }

    /// Bind the resolved agent and go active.
    pub fn activate(&mut self, phone: CanonicalPhone, agent: Agent) {
        self.phone = Some(phone);
        self.agent = Some(agent);
        self.state = SessionState::Active;
        self.touch();
    }

    /// Move to CLOSING and stop dispatch. Returns false if already closing.
    pub fn begin_close(&mut self) -> bool {
        if self.state.is_terminating() {
            return false;
        }
        self.state = SessionState::Closing;
        self.cancel.cancel();
        true
    }

    /// Move to CLOSED, dropping the agent with its history or draft.
    pub fn finish_close(&mut self) {
        self.begin_close();
        self.agent = None;
        self.state = SessionState::Closed;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::agent::{CollectionAgent, RuleExtractor};

    fn collection_agent() -> (CanonicalPhone, Agent) {
        let phone = CanonicalPhone::parse("5550000000").unwrap();
        let agent = Agent::Collection(CollectionAgent::new(
            phone.clone(),
            Arc::new(RuleExtractor::new()),
            5,
        ));
        (phone, agent)
    }

    #[test]
    fn test_lifecycle() {
        let mut session = Session::new();
        assert_eq!(session.state, SessionState::Connecting);

        session.mark_established();
        assert_eq!(session.state, SessionState::AwaitingInit);
        assert_eq!(session.check_message(), Err(ProtocolError::NotInitialized));
        assert!(session.check_init().is_ok());

        let (phone, agent) = collection_agent();
        session.activate(phone, agent);
        assert_eq!(session.state, SessionState::Active);
        assert!(session.check_message().is_ok());
        assert_eq!(session.check_init(), Err(ProtocolError::AlreadyInitialized));

        let token = session.cancel_token();
        assert!(session.begin_close());
        assert!(token.is_cancelled());
        assert!(!session.begin_close());
        assert_eq!(session.check_message(), Err(ProtocolError::Closing));

        session.finish_close();
        assert_eq!(session.state, SessionState::Closed);
        assert!(session.agent.is_none());
    }

    #[test]
    fn test_finish_close_from_awaiting_init_cancels() {
        let mut session = Session::new();
        session.mark_established();
        let token = session.cancel_token();
        session.finish_close();
        assert!(token.is_cancelled());
        assert_eq!(session.state, SessionState::Closed);
    }
}
