use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ConversationId, ConversationKind, MemberRole, MessageId, NewReference, TeamId, UserId};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the WebSocket upgrade.
/// Tokens are minted by the login service; this workspace only validates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub username: String,
    pub exp: usize,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateConversationRequest {
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub name: String,
    #[serde(default)]
    pub team_id: Option<TeamId>,
    #[serde(default)]
    pub member_ids: Vec<UserId>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddMemberRequest {
    pub user_id: UserId,
    #[serde(default = "default_role")]
    pub role: MemberRole,
}

fn default_role() -> MemberRole {
    MemberRole::Member
}

/// Caller's own preferences in a conversation. Absent fields are left
/// alone; `"muted_until": null` unmutes.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemberSettingsRequest {
    #[serde(default, deserialize_with = "present")]
    pub muted_until: Option<Option<DateTime<Utc>>>,
    #[serde(default)]
    pub is_hidden: Option<bool>,
}

/// Distinguishes an explicit `null` from a missing field.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub message_id: MessageId,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub body: String,
    #[serde(default)]
    pub references: Vec<NewReference>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditMessageRequest {
    pub body: String,
}

// -- Password vault --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateVaultItemRequest {
    pub title: String,
    pub secret: String,
    #[serde(default)]
    pub source_message_id: Option<MessageId>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShareVaultItemRequest {
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub allow_reveal: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct RevealResponse {
    pub id: u64,
    pub title: String,
    pub secret: String,
}
