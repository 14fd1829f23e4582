//! Request and response DTOs for the web gateway.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::agent::{AgentEvent, AgentKind, Field, PharmacyData};
use crate::error::ProtocolError;

// --- WebSocket ---

/// Message sent by a WebSocket client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum WsClientMessage {
    /// Identify the caller and start the conversation.
    #[serde(rename = "init")]
    Init { phone: String },
    /// Free text for the active agent.
    #[serde(rename = "message")]
    Message { content: String },
    /// End the session.
    #[serde(rename = "close")]
    Close,
}

impl WsClientMessage {
    const TYPES: [&'static str; 3] = ["init", "message", "close"];

    /// Parse a text frame, distinguishing unparseable JSON, a missing
    /// `type`, and an unknown `type`.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        if !value.is_object() {
            return Err(ProtocolError::Malformed(
                "expected a JSON object".to_string(),
            ));
        }
        let kind = match value.get("type") {
            None | Some(Value::Null) => return Err(ProtocolError::MissingType),
            Some(Value::String(kind)) => kind.as_str(),
            Some(_) => {
                return Err(ProtocolError::Malformed(
                    "'type' must be a string".to_string(),
                ));
            }
        };
        if !Self::TYPES.contains(&kind) {
            return Err(ProtocolError::UnknownType(kind.to_string()));
        }
        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Message sent by the server to a WebSocket client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum WsServerMessage {
    #[serde(rename = "connection_established")]
    ConnectionEstablished { session_id: Uuid },
    #[serde(rename = "agent_ready")]
    AgentReady {
        agent_type: AgentKind,
        message: String,
    },
    #[serde(rename = "response")]
    Response { content: String },
    #[serde(rename = "collection_progress")]
    CollectionProgress {
        content: String,
        fields_collected: Vec<Field>,
        fields_remaining: Vec<Field>,
    },
    #[serde(rename = "collection_complete")]
    CollectionComplete {
        content: String,
        pharmacy_data: PharmacyData,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

impl WsServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        WsServerMessage::Error {
            message: message.into(),
        }
    }
}

impl From<AgentEvent> for WsServerMessage {
    fn from(event: AgentEvent) -> Self {
        match event {
            AgentEvent::Response { content } => WsServerMessage::Response { content },
            AgentEvent::Progress {
                content,
                fields_collected,
                fields_remaining,
            } => WsServerMessage::CollectionProgress {
                content,
                fields_collected,
                fields_remaining,
            },
            AgentEvent::Complete {
                content,
                pharmacy_data,
            } => WsServerMessage::CollectionComplete {
                content,
                pharmacy_data,
            },
        }
    }
}

// --- Records ---

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub phone: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvalidateRequest {
    pub phone: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub removed: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// --- Health ---

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub environment: String,
    pub active_sessions: usize,
}
