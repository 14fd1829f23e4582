//! Conversational agents and the per-connection session machinery.
//!
//! A session is bound to exactly one [`Agent`], chosen by the
//! [`AgentRouter`] from the caller's phone:
//! - a known pharmacy gets the informational agent
//! - an unknown one gets the collection agent
//!
//! Sessions live in the [`SessionRegistry`]; the idle reaper closes the
//! ones that go quiet.

mod collection;
mod draft;
mod extractor;
mod info;
mod llm;
mod memory;
mod reaper;
mod router;
pub mod session;
mod session_manager;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

pub use collection::CollectionAgent;
pub use draft::{CollectionDraft, Field, PharmacyData, validate_email};
pub use extractor::{Extraction, FieldExtractor, RuleExtractor};
pub use info::InfoAgent;
pub use llm::LlmExtractor;
pub use memory::{ConversationWindow, Exchange, Topic};
pub use reaper::spawn_reaper;
pub use router::AgentRouter;
pub use session::{Session, SessionState};
pub use session_manager::SessionRegistry;

/// Which behavior a session is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Info,
    Collection,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Info => "info",
            AgentKind::Collection => "collection",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an agent produced for one message, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    Response {
        content: String,
    },
    Progress {
        content: String,
        fields_collected: Vec<Field>,
        fields_remaining: Vec<Field>,
    },
    Complete {
        content: String,
        pharmacy_data: PharmacyData,
    },
}

/// The agent attached to an active session.
#[derive(Debug)]
pub enum Agent {
    Info(InfoAgent),
    Collection(CollectionAgent),
}

impl Agent {
    pub fn kind(&self) -> AgentKind {
        match self {
            Agent::Info(_) => AgentKind::Info,
            Agent::Collection(_) => AgentKind::Collection,
        }
    }

    pub fn greeting(&self) -> String {
        match self {
            Agent::Info(agent) => agent.greeting(),
            Agent::Collection(agent) => agent.greeting(),
        }
    }

    /// Handle one message. Calls on the same agent must not overlap,
    /// which `&mut self` enforces.
    pub async fn handle(&mut self, text: &str) -> Result<Vec<AgentEvent>, ProtocolError> {
        match self {
            Agent::Info(agent) => Ok(vec![AgentEvent::Response {
                content: agent.handle(text),
            }]),
            Agent::Collection(agent) => agent.handle(text).await,
        }
    }
}
