use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    ConversationId, MemberRole, MessageId, MessageSuggestion, MessageView, NewReference, UserId,
};

/// Events fanned out to conversation rooms. Closed internally; on the wire the
/// `data` half travels as an open JSON object inside [`EventEnvelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    /// A message was accepted, with its derived attachments and suggestions
    MessageCreated(MessageView),

    /// Soft edit: body replaced, edit timestamp recorded
    MessageEdited {
        message_id: MessageId,
        body: String,
        edited_at: DateTime<Utc>,
    },

    /// Tombstone: id and ordering stay, body is gone
    MessageDeleted {
        message_id: MessageId,
        deleted_at: DateTime<Utc>,
    },

    ReactionAdded {
        message_id: MessageId,
        user_id: UserId,
        emoji: String,
    },

    ReactionRemoved {
        message_id: MessageId,
        user_id: UserId,
        emoji: String,
    },

    /// Sent only to the author of a sensitive message
    PasswordWarning {
        message_id: MessageId,
        suggestions: Vec<MessageSuggestion>,
    },

    MemberJoined {
        user_id: UserId,
        role: MemberRole,
    },

    MemberLeft {
        user_id: UserId,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageCreated(_) => "message_created",
            Self::MessageEdited { .. } => "message_edited",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::ReactionAdded { .. } => "reaction_added",
            Self::ReactionRemoved { .. } => "reaction_removed",
            Self::PasswordWarning { .. } => "password_warning",
            Self::MemberJoined { .. } => "member_joined",
            Self::MemberLeft { .. } => "member_left",
        }
    }
}

/// Wire shape: `{"type", "conversation_id", "data", "timestamp"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub conversation_id: ConversationId,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(
        conversation_id: ConversationId,
        payload: &EventPayload,
        timestamp: DateTime<Utc>,
    ) -> serde_json::Result<Self> {
        let data = match serde_json::to_value(payload)? {
            serde_json::Value::Object(mut tagged) => tagged
                .remove("data")
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            other => other,
        };

        Ok(Self {
            event_type: payload.event_type().to_string(),
            conversation_id,
            data,
            timestamp,
        })
    }

    /// Decode the open `data` object back into the closed payload type.
    /// Unknown event types surface as an error rather than a panic.
    pub fn decode(&self) -> serde_json::Result<EventPayload> {
        serde_json::from_value(serde_json::json!({
            "type": self.event_type,
            "data": self.data,
        }))
    }
}

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Join conversation rooms. Ids outside the connection's allowed set are ignored.
    Subscribe { conversation_ids: Vec<ConversationId> },

    Unsubscribe { conversation_ids: Vec<ConversationId> },

    /// Submit a message to the ingestion pipeline
    SendMessage {
        conversation_id: ConversationId,
        body: String,
        #[serde(default)]
        references: Vec<NewReference>,
    },

    /// Advance the caller's last-read pointer
    MarkRead {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
}
