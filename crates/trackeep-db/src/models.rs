//! Row mapping between SQLite columns and the shared model types.
//!
//! Ids are stored as INTEGER (i64) and exposed as u64; timestamps are stored
//! as fixed-width RFC 3339 text so that string order is time order.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;

use trackeep_types::models::{
    Conversation, ConversationMember, Message, MessageAttachment, MessageReference,
    MessageSuggestion, PasswordVaultItem, PasswordVaultShare, UnknownVariant,
};

pub const CONVERSATION_COLUMNS: &str =
    "id, kind, name, team_id, is_default, is_archived, last_message_at, created_at";

pub const MEMBER_COLUMNS: &str = "conversation_id, user_id, role, last_read_message_id, \
     last_read_at, muted_until, is_hidden, joined_at";

pub const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, body, is_sensitive, created_at, edited_at, deleted_at";

pub const ATTACHMENT_COLUMNS: &str = "id, message_id, kind, title, url, preview, created_at";

pub const REFERENCE_COLUMNS: &str =
    "id, message_id, entity_type, entity_id, deep_link, created_at";

pub const SUGGESTION_COLUMNS: &str =
    "id, message_id, kind, payload, status, created_at, resolved_at";

pub const VAULT_ITEM_COLUMNS: &str =
    "id, owner_id, title, encrypted_secret, nonce, source_message_id, created_at";

pub const VAULT_SHARE_COLUMNS: &str =
    "id, item_id, conversation_id, shared_by, allow_reveal, expires_at, created_at";

pub fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn id(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    Ok(row.get::<_, i64>(idx)? as u64)
}

pub fn opt_id(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<u64>> {
    Ok(row.get::<_, Option<i64>>(idx)?.map(|v| v as u64))
}

pub fn time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_time(idx, &raw)
}

pub fn opt_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|raw| parse_time(idx, &raw))
        .transpose()
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn variant<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = UnknownVariant>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn json(row: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: id(row, 0)?,
        kind: variant(row, 1)?,
        name: row.get(2)?,
        team_id: opt_id(row, 3)?,
        is_default: row.get(4)?,
        is_archived: row.get(5)?,
        last_message_at: opt_time(row, 6)?,
        created_at: time(row, 7)?,
    })
}

pub fn member(row: &Row<'_>) -> rusqlite::Result<ConversationMember> {
    Ok(ConversationMember {
        conversation_id: id(row, 0)?,
        user_id: id(row, 1)?,
        role: variant(row, 2)?,
        last_read_message_id: opt_id(row, 3)?,
        last_read_at: opt_time(row, 4)?,
        muted_until: opt_time(row, 5)?,
        is_hidden: row.get(6)?,
        joined_at: time(row, 7)?,
    })
}

pub fn message(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: id(row, 0)?,
        conversation_id: id(row, 1)?,
        sender_id: id(row, 2)?,
        body: row.get(3)?,
        is_sensitive: row.get(4)?,
        created_at: time(row, 5)?,
        edited_at: opt_time(row, 6)?,
        deleted_at: opt_time(row, 7)?,
    })
}

pub fn attachment(row: &Row<'_>) -> rusqlite::Result<MessageAttachment> {
    Ok(MessageAttachment {
        id: id(row, 0)?,
        message_id: id(row, 1)?,
        kind: variant(row, 2)?,
        title: row.get(3)?,
        url: row.get(4)?,
        preview: json(row, 5)?,
        created_at: time(row, 6)?,
    })
}

pub fn reference(row: &Row<'_>) -> rusqlite::Result<MessageReference> {
    Ok(MessageReference {
        id: id(row, 0)?,
        message_id: id(row, 1)?,
        entity_type: row.get(2)?,
        entity_id: id(row, 3)?,
        deep_link: row.get(4)?,
        created_at: time(row, 5)?,
    })
}

pub fn suggestion(row: &Row<'_>) -> rusqlite::Result<MessageSuggestion> {
    Ok(MessageSuggestion {
        id: id(row, 0)?,
        message_id: id(row, 1)?,
        kind: variant(row, 2)?,
        payload: json(row, 3)?,
        status: variant(row, 4)?,
        created_at: time(row, 5)?,
        resolved_at: opt_time(row, 6)?,
    })
}

pub fn vault_item(row: &Row<'_>) -> rusqlite::Result<PasswordVaultItem> {
    Ok(PasswordVaultItem {
        id: id(row, 0)?,
        owner_id: id(row, 1)?,
        title: row.get(2)?,
        encrypted_secret: row.get(3)?,
        nonce: row.get(4)?,
        source_message_id: opt_id(row, 5)?,
        created_at: time(row, 6)?,
    })
}

pub fn vault_share(row: &Row<'_>) -> rusqlite::Result<PasswordVaultShare> {
    Ok(PasswordVaultShare {
        id: id(row, 0)?,
        item_id: id(row, 1)?,
        conversation_id: id(row, 2)?,
        shared_by: id(row, 3)?,
        allow_reveal: row.get(4)?,
        expires_at: opt_time(row, 5)?,
        created_at: time(row, 6)?,
    })
}
