use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type ConversationId = u64;
pub type UserId = u64;
pub type MessageId = u64;
pub type TeamId = u64;

/// Error returned when a stored or submitted enum string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Closed string enums: serde names, `as_str` for SQL columns, `FromStr` for reads.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $label:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant { kind: $label, value: other.to_string() }),
                }
            }
        }
    };
}

string_enum!(
    /// Fixed at creation time.
    ConversationKind, "conversation type" {
        Global => "global",
        Team => "team",
        Group => "group",
        Dm => "dm",
        Personal => "self",
        PasswordVault => "password_vault",
    }
);

string_enum!(
    MemberRole, "member role" {
        Owner => "owner",
        Admin => "admin",
        Member => "member",
        Viewer => "viewer",
    }
);

impl MemberRole {
    pub fn can_write(&self) -> bool {
        !matches!(self, MemberRole::Viewer)
    }

    pub fn can_manage(&self) -> bool {
        matches!(self, MemberRole::Owner | MemberRole::Admin)
    }
}

string_enum!(
    AttachmentKind, "attachment kind" {
        File => "file",
        Image => "image",
        Youtube => "youtube",
        Github => "github",
        Website => "website",
        Bookmark => "bookmark",
        Task => "task",
        Event => "event",
        Calendar => "calendar",
        Activity => "activity",
        LearningPath => "learning_path",
        SavedSearch => "saved_search",
        VoiceNote => "voice_note",
    }
);

string_enum!(
    SuggestionType, "suggestion type" {
        SaveBookmark => "save_bookmark",
        SaveYoutube => "save_youtube",
        LinkGithub => "link_github",
        CreateTask => "create_task",
        CreateEvent => "create_event",
        SaveSearch => "save_search",
        PasswordWarning => "password_warning",
        MoveToPasswordVault => "move_to_password_vault",
    }
);

impl SuggestionType {
    /// Secret-handling suggestions go to the author alone, never to the room.
    pub fn is_author_only(&self) -> bool {
        matches!(
            self,
            SuggestionType::PasswordWarning | SuggestionType::MoveToPasswordVault
        )
    }
}

string_enum!(
    SuggestionStatus, "suggestion status" {
        Pending => "pending",
        Accepted => "accepted",
        Dismissed => "dismissed",
    }
);

impl SuggestionStatus {
    /// Only `pending` may move, and only to a terminal state.
    pub fn can_transition_to(&self, next: SuggestionStatus) -> bool {
        matches!(
            (self, next),
            (SuggestionStatus::Pending, SuggestionStatus::Accepted)
                | (SuggestionStatus::Pending, SuggestionStatus::Dismissed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub name: String,
    pub team_id: Option<TeamId>,
    pub is_default: bool,
    pub is_archived: bool,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMember {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub role: MemberRole,
    pub last_read_message_id: Option<MessageId>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub muted_until: Option<DateTime<Utc>>,
    pub is_hidden: bool,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub body: String,
    pub is_sensitive: bool,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageAttachment {
    pub id: u64,
    pub message_id: MessageId,
    pub kind: AttachmentKind,
    pub title: String,
    pub url: Option<String>,
    pub preview: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageReference {
    pub id: u64,
    pub message_id: MessageId,
    pub entity_type: String,
    pub entity_id: u64,
    pub deep_link: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSuggestion {
    pub id: u64,
    pub message_id: MessageId,
    #[serde(rename = "type")]
    pub kind: SuggestionType,
    pub payload: serde_json::Value,
    pub status: SuggestionStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageReaction {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// The secret itself never leaves the store unencrypted; it is not serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasswordVaultItem {
    pub id: u64,
    pub owner_id: UserId,
    pub title: String,
    #[serde(skip)]
    pub encrypted_secret: Vec<u8>,
    #[serde(skip)]
    pub nonce: Vec<u8>,
    pub source_message_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasswordVaultShare {
    pub id: u64,
    pub item_id: u64,
    pub conversation_id: ConversationId,
    pub shared_by: UserId,
    pub allow_reveal: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PasswordVaultShare {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

// -- Unpersisted derivations --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAttachment {
    pub kind: AttachmentKind,
    pub title: String,
    pub url: Option<String>,
    pub preview: serde_json::Value,
}

/// Wire shape `{"type": ..., "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSuggestion {
    #[serde(rename = "type")]
    pub kind: SuggestionType,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReference {
    pub entity_type: String,
    pub entity_id: u64,
    pub deep_link: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<UserId>,
}

/// A message together with everything derived from it, as clients render it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    #[serde(default)]
    pub attachments: Vec<MessageAttachment>,
    #[serde(default)]
    pub references: Vec<MessageReference>,
    #[serde(default)]
    pub suggestions: Vec<MessageSuggestion>,
    #[serde(default)]
    pub reactions: Vec<ReactionGroup>,
}

impl MessageView {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            attachments: vec![],
            references: vec![],
            suggestions: vec![],
            reactions: vec![],
        }
    }

    /// The copy other members get: author-only suggestions removed.
    pub fn for_room(&self) -> Self {
        let mut view = self.clone();
        view.suggestions.retain(|s| !s.kind.is_author_only());
        view
    }

    pub fn visible_to(self, viewer: UserId) -> Self {
        if viewer == self.message.sender_id {
            self
        } else {
            self.for_room()
        }
    }
}
