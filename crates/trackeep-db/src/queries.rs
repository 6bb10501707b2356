use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ToSql};

use trackeep_types::models::{
    Conversation, ConversationId, ConversationKind, ConversationMember, MemberRole, Message,
    MessageAttachment, MessageId, MessageReaction, MessageReference, MessageSuggestion,
    NewAttachment, NewReference, NewSuggestion, SuggestionStatus, TeamId, UserId,
};

use crate::models::{
    self, ATTACHMENT_COLUMNS, CONVERSATION_COLUMNS, MEMBER_COLUMNS, MESSAGE_COLUMNS,
    REFERENCE_COLUMNS, SUGGESTION_COLUMNS, ts,
};
use crate::{Database, GLOBAL_CONVERSATION_ID};

/// Outcome of moving a suggestion out of `pending`.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(MessageSuggestion),
    /// Already terminal; suggestions are never reopened or flipped.
    AlreadyResolved(SuggestionStatus),
    NotFound,
}

impl Database {
    // -- Conversations --

    pub fn create_conversation(
        &self,
        kind: ConversationKind,
        name: &str,
        team_id: Option<TeamId>,
        owner_id: Option<UserId>,
        is_default: bool,
    ) -> Result<Conversation> {
        let now = Utc::now();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (kind, name, team_id, owner_id, is_default, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    kind.as_str(),
                    name,
                    team_id.map(|v| v as i64),
                    owner_id.map(|v| v as i64),
                    is_default,
                    ts(now),
                ],
            )?;

            Ok(Conversation {
                id: conn.last_insert_rowid() as u64,
                kind,
                name: name.to_string(),
                team_id,
                is_default,
                is_archived: false,
                last_message_at: None,
                created_at: now,
            })
        })
    }

    pub fn get_conversation(&self, id: ConversationId) -> Result<Option<Conversation>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                [id as i64],
                models::conversation,
            )
            .optional()
        })
    }

    /// Visible conversations of a user, most recently active first.
    pub fn list_conversations_for_user(&self, user_id: UserId) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM conversations c
                 JOIN conversation_members m ON m.conversation_id = c.id
                 WHERE m.user_id = ?1 AND m.is_hidden = 0
                 ORDER BY c.last_message_at IS NULL, c.last_message_at DESC, c.id",
                prefixed("c", CONVERSATION_COLUMNS)
            ))?;
            let rows = stmt
                .query_map([user_id as i64], models::conversation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn archive_conversation(&self, id: ConversationId) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE conversations SET is_archived = 1 WHERE id = ?1 AND is_archived = 0",
                [id as i64],
            )?;
            Ok(changed == 1)
        })
    }

    /// Record activity. Never moves `last_message_at` backwards.
    pub fn touch_conversation(&self, id: ConversationId, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE conversations SET last_message_at = ?2
                 WHERE id = ?1 AND (last_message_at IS NULL OR last_message_at < ?2)",
                rusqlite::params![id as i64, ts(at)],
            )?;
            Ok(())
        })
    }

    /// The user's private `self` conversation, created on first use. Lookup
    /// and insert share one transaction, so concurrent first connections of
    /// the same user agree on a single row.
    pub fn ensure_self_conversation(&self, user_id: UserId) -> Result<Conversation> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let select = format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                 WHERE kind = 'self' AND owner_id = ?1"
            );

            if let Some(existing) = tx
                .query_row(&select, [user_id as i64], models::conversation)
                .optional()?
            {
                return Ok(existing);
            }

            let now = ts(Utc::now());
            tx.execute(
                "INSERT INTO conversations (kind, name, team_id, owner_id, is_default, created_at)
                 VALUES ('self', 'Notes to self', NULL, ?1, 1, ?2)",
                rusqlite::params![user_id as i64, now],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO conversation_members (conversation_id, user_id, role, joined_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, user_id as i64, MemberRole::Owner.as_str(), now],
            )?;

            let conversation = tx.query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                [id],
                models::conversation,
            )?;
            tx.commit()?;
            Ok(conversation)
        })
    }

    /// Make sure the user belongs to the workspace `global` conversation.
    pub fn ensure_global_membership(&self, user_id: UserId) -> Result<()> {
        self.add_member(GLOBAL_CONVERSATION_ID, user_id, MemberRole::Member)?;
        Ok(())
    }

    // -- Members --

    /// Returns false when the user already was a member (role unchanged).
    pub fn add_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        role: MemberRole,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO conversation_members (conversation_id, user_id, role, joined_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![conversation_id as i64, user_id as i64, role.as_str(), ts(Utc::now())],
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn remove_member(&self, conversation_id: ConversationId, user_id: UserId) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM conversation_members WHERE conversation_id = ?1 AND user_id = ?2",
                [conversation_id as i64, user_id as i64],
            )?;
            Ok(removed == 1)
        })
    }

    pub fn get_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<Option<ConversationMember>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {MEMBER_COLUMNS} FROM conversation_members
                     WHERE conversation_id = ?1 AND user_id = ?2"
                ),
                [conversation_id as i64, user_id as i64],
                models::member,
            )
            .optional()
        })
    }

    pub fn list_members(&self, conversation_id: ConversationId) -> Result<Vec<ConversationMember>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MEMBER_COLUMNS} FROM conversation_members
                 WHERE conversation_id = ?1 ORDER BY joined_at, user_id"
            ))?;
            let rows = stmt
                .query_map([conversation_id as i64], models::member)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Conversations a connection may subscribe to.
    pub fn member_conversation_ids(&self, user_id: UserId) -> Result<Vec<ConversationId>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT conversation_id FROM conversation_members WHERE user_id = ?1
                 ORDER BY conversation_id",
            )?;
            let rows = stmt
                .query_map([user_id as i64], |row| models::id(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Move the last-read pointer forward. Returns false when `message_id` is
    /// not newer than the current pointer or does not belong to the conversation.
    pub fn advance_last_read(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        message_id: MessageId,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE conversation_members
                 SET last_read_message_id = ?3, last_read_at = ?4
                 WHERE conversation_id = ?1 AND user_id = ?2
                   AND (last_read_message_id IS NULL OR last_read_message_id < ?3)
                   AND EXISTS (SELECT 1 FROM messages WHERE id = ?3 AND conversation_id = ?1)",
                rusqlite::params![conversation_id as i64, user_id as i64, message_id as i64, ts(at)],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn set_muted_until(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE conversation_members SET muted_until = ?3
                 WHERE conversation_id = ?1 AND user_id = ?2",
                rusqlite::params![conversation_id as i64, user_id as i64, until.map(ts)],
            )?;
            Ok(())
        })
    }

    pub fn set_hidden(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        hidden: bool,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE conversation_members SET is_hidden = ?3
                 WHERE conversation_id = ?1 AND user_id = ?2",
                rusqlite::params![conversation_id as i64, user_id as i64, hidden],
            )?;
            Ok(())
        })
    }

    // -- Messages --

    pub fn create_message(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        body: &str,
        is_sensitive: bool,
    ) -> Result<Message> {
        let now = Utc::now();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (conversation_id, sender_id, body, is_sensitive, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![conversation_id as i64, sender_id as i64, body, is_sensitive, ts(now)],
            )?;

            Ok(Message {
                id: conn.last_insert_rowid() as u64,
                conversation_id,
                sender_id,
                body: body.to_string(),
                is_sensitive,
                created_at: now,
                edited_at: None,
                deleted_at: None,
            })
        })
    }

    pub fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                [id as i64],
                models::message,
            )
            .optional()
        })
    }

    /// Newest first. `before` is a message id cursor: only messages ordered
    /// strictly before it are returned.
    pub fn get_messages(
        &self,
        conversation_id: ConversationId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<Message>> {
        self.with_conn(|conn| query_messages(conn, conversation_id, limit, before))
    }

    /// Soft edit. Deleted messages cannot be edited.
    pub fn edit_message(
        &self,
        id: MessageId,
        body: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Message>> {
        let changed = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE messages SET body = ?2, edited_at = ?3 WHERE id = ?1 AND deleted_at IS NULL",
                rusqlite::params![id as i64, body, ts(at)],
            )?)
        })?;

        if changed == 0 {
            return Ok(None);
        }
        self.get_message(id)
    }

    /// Tombstone: the body is cleared, id and ordering stay.
    pub fn delete_message(&self, id: MessageId, at: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET body = '', deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
                rusqlite::params![id as i64, ts(at)],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Derived rows --

    pub fn append_attachments(
        &self,
        message_id: MessageId,
        attachments: &[NewAttachment],
    ) -> Result<Vec<MessageAttachment>> {
        if attachments.is_empty() {
            return Ok(vec![]);
        }
        let now = Utc::now();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut stored = Vec::with_capacity(attachments.len());
            for a in attachments {
                tx.execute(
                    "INSERT INTO message_attachments (message_id, kind, title, url, preview, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        message_id as i64,
                        a.kind.as_str(),
                        a.title,
                        a.url,
                        a.preview.to_string(),
                        ts(now),
                    ],
                )?;
                stored.push(MessageAttachment {
                    id: tx.last_insert_rowid() as u64,
                    message_id,
                    kind: a.kind,
                    title: a.title.clone(),
                    url: a.url.clone(),
                    preview: a.preview.clone(),
                    created_at: now,
                });
            }
            tx.commit()?;
            Ok(stored)
        })
    }

    pub fn append_references(
        &self,
        message_id: MessageId,
        references: &[NewReference],
    ) -> Result<Vec<MessageReference>> {
        if references.is_empty() {
            return Ok(vec![]);
        }
        let now = Utc::now();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut stored = Vec::with_capacity(references.len());
            for r in references {
                tx.execute(
                    "INSERT INTO message_references (message_id, entity_type, entity_id, deep_link, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        message_id as i64,
                        r.entity_type,
                        r.entity_id as i64,
                        r.deep_link,
                        ts(now),
                    ],
                )?;
                stored.push(MessageReference {
                    id: tx.last_insert_rowid() as u64,
                    message_id,
                    entity_type: r.entity_type.clone(),
                    entity_id: r.entity_id,
                    deep_link: r.deep_link.clone(),
                    created_at: now,
                });
            }
            tx.commit()?;
            Ok(stored)
        })
    }

    pub fn append_suggestions(
        &self,
        message_id: MessageId,
        suggestions: &[NewSuggestion],
    ) -> Result<Vec<MessageSuggestion>> {
        if suggestions.is_empty() {
            return Ok(vec![]);
        }
        let now = Utc::now();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut stored = Vec::with_capacity(suggestions.len());
            for s in suggestions {
                tx.execute(
                    "INSERT INTO message_suggestions (message_id, kind, payload, status, created_at)
                     VALUES (?1, ?2, ?3, 'pending', ?4)",
                    rusqlite::params![message_id as i64, s.kind.as_str(), s.payload.to_string(), ts(now)],
                )?;
                stored.push(MessageSuggestion {
                    id: tx.last_insert_rowid() as u64,
                    message_id,
                    kind: s.kind,
                    payload: s.payload.clone(),
                    status: SuggestionStatus::Pending,
                    created_at: now,
                    resolved_at: None,
                });
            }
            tx.commit()?;
            Ok(stored)
        })
    }

    pub fn attachments_for_messages(&self, ids: &[MessageId]) -> Result<Vec<MessageAttachment>> {
        self.with_conn(|conn| {
            query_by_message_ids(conn, "message_attachments", ATTACHMENT_COLUMNS, ids, models::attachment)
        })
    }

    pub fn references_for_messages(&self, ids: &[MessageId]) -> Result<Vec<MessageReference>> {
        self.with_conn(|conn| {
            query_by_message_ids(conn, "message_references", REFERENCE_COLUMNS, ids, models::reference)
        })
    }

    pub fn suggestions_for_messages(&self, ids: &[MessageId]) -> Result<Vec<MessageSuggestion>> {
        self.with_conn(|conn| {
            query_by_message_ids(conn, "message_suggestions", SUGGESTION_COLUMNS, ids, models::suggestion)
        })
    }

    // -- Suggestions --

    pub fn get_suggestion(&self, id: u64) -> Result<Option<MessageSuggestion>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {SUGGESTION_COLUMNS} FROM message_suggestions WHERE id = ?1"),
                [id as i64],
                models::suggestion,
            )
            .optional()
        })
    }

    /// `pending → accepted | dismissed`. The status check and the write are
    /// one statement, so two racing resolutions cannot both succeed.
    pub fn resolve_suggestion(
        &self,
        id: u64,
        status: SuggestionStatus,
        at: DateTime<Utc>,
    ) -> Result<Resolution> {
        if !SuggestionStatus::Pending.can_transition_to(status) {
            bail!("suggestions can only be accepted or dismissed, not set to {}", status);
        }

        let changed = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE message_suggestions SET status = ?2, resolved_at = ?3
                 WHERE id = ?1 AND status = 'pending'",
                rusqlite::params![id as i64, status.as_str(), ts(at)],
            )?)
        })?;

        match self.get_suggestion(id)? {
            Some(s) if changed == 1 => Ok(Resolution::Resolved(s)),
            Some(s) => Ok(Resolution::AlreadyResolved(s.status)),
            None => Ok(Resolution::NotFound),
        }
    }

    // -- Reactions --

    /// Idempotent: reacting twice with the same emoji is a no-op (returns false).
    pub fn add_reaction(&self, message_id: MessageId, user_id: UserId, emoji: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO message_reactions (message_id, user_id, emoji, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![message_id as i64, user_id as i64, emoji, ts(Utc::now())],
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn remove_reaction(&self, message_id: MessageId, user_id: UserId, emoji: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM message_reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                rusqlite::params![message_id as i64, user_id as i64, emoji],
            )?;
            Ok(removed == 1)
        })
    }

    /// Batch-fetch reactions for a set of message IDs.
    pub fn reactions_for_messages(&self, ids: &[MessageId]) -> Result<Vec<MessageReaction>> {
        self.with_conn(|conn| {
            query_by_message_ids(
                conn,
                "message_reactions",
                "message_id, user_id, emoji, created_at",
                ids,
                |row| {
                    Ok(MessageReaction {
                        message_id: models::id(row, 0)?,
                        user_id: models::id(row, 1)?,
                        emoji: row.get(2)?,
                        created_at: models::time(row, 3)?,
                    })
                },
            )
        })
    }
}

fn query_messages(
    conn: &Connection,
    conversation_id: ConversationId,
    limit: u32,
    before: Option<MessageId>,
) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE conversation_id = ?1
           AND (?2 IS NULL OR (created_at, id) < (SELECT created_at, id FROM messages WHERE id = ?2))
         ORDER BY created_at DESC, id DESC
         LIMIT ?3"
    ))?;

    let rows = stmt
        .query_map(
            rusqlite::params![conversation_id as i64, before.map(|v| v as i64), limit],
            models::message,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_by_message_ids<T, F>(
    conn: &Connection,
    table: &str,
    columns: &str,
    ids: &[MessageId],
    map: F,
) -> Result<Vec<T>>
where
    F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
{
    if ids.is_empty() {
        return Ok(vec![]);
    }

    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT {} FROM {} WHERE message_id IN ({}) ORDER BY message_id, created_at, rowid",
        columns,
        table,
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let values: Vec<i64> = ids.iter().map(|id| *id as i64).collect();
    let params: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();

    let rows = stmt
        .query_map(params.as_slice(), map)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn prefixed(alias: &str, columns: &str) -> String {
    columns
        .split(',')
        .map(|c| format!("{}.{}", alias, c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trackeep_types::models::{AttachmentKind, SuggestionType};

    fn db_with_conversation() -> (Database, Conversation) {
        let db = Database::open_in_memory().unwrap();
        let conv = db
            .create_conversation(ConversationKind::Group, "release", None, None, false)
            .unwrap();
        db.add_member(conv.id, 10, MemberRole::Owner).unwrap();
        db.add_member(conv.id, 11, MemberRole::Member).unwrap();
        (db, conv)
    }

    #[test]
    fn global_conversation_is_seeded() {
        let db = Database::open_in_memory().unwrap();
        let global = db.get_conversation(GLOBAL_CONVERSATION_ID).unwrap().unwrap();
        assert_eq!(global.kind, ConversationKind::Global);
        assert!(global.is_default);

        db.ensure_global_membership(4).unwrap();
        db.ensure_global_membership(4).unwrap();
        assert_eq!(db.member_conversation_ids(4).unwrap(), vec![GLOBAL_CONVERSATION_ID]);
    }

    #[test]
    fn self_conversation_is_created_once() {
        let db = Database::open_in_memory().unwrap();
        let first = db.ensure_self_conversation(9).unwrap();
        let second = db.ensure_self_conversation(9).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.kind, ConversationKind::Personal);
        assert_eq!(
            db.get_member(first.id, 9).unwrap().unwrap().role,
            MemberRole::Owner
        );
    }

    #[test]
    fn concurrent_first_connections_share_one_self_conversation() {
        let db = std::sync::Arc::new(Database::open_in_memory().unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                std::thread::spawn(move || db.ensure_self_conversation(21).map(|c| c.id))
            })
            .collect();

        let ids: Vec<ConversationId> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();
        assert!(ids.iter().all(|&id| id == ids[0]));
        assert_eq!(db.member_conversation_ids(21).unwrap(), vec![ids[0]]);
    }

    #[test]
    fn members_are_unique_pairs() {
        let (db, conv) = db_with_conversation();
        assert!(!db.add_member(conv.id, 10, MemberRole::Viewer).unwrap());
        assert_eq!(db.get_member(conv.id, 10).unwrap().unwrap().role, MemberRole::Owner);
        assert!(db.remove_member(conv.id, 11).unwrap());
        assert!(!db.remove_member(conv.id, 11).unwrap());
        assert_eq!(db.list_members(conv.id).unwrap().len(), 1);
    }

    #[test]
    fn messages_page_newest_first_with_cursor() {
        let (db, conv) = db_with_conversation();
        let ids: Vec<_> = (0..5)
            .map(|i| db.create_message(conv.id, 10, &format!("m{i}"), false).unwrap().id)
            .collect();

        let page = db.get_messages(conv.id, 2, None).unwrap();
        assert_eq!(page.iter().map(|m| m.id).collect::<Vec<_>>(), vec![ids[4], ids[3]]);

        let older = db.get_messages(conv.id, 10, Some(ids[3])).unwrap();
        assert_eq!(
            older.iter().map(|m| m.id).collect::<Vec<_>>(),
            vec![ids[2], ids[1], ids[0]]
        );
    }

    #[test]
    fn delete_is_a_tombstone() {
        let (db, conv) = db_with_conversation();
        let m = db.create_message(conv.id, 10, "oops", false).unwrap();
        assert!(db.delete_message(m.id, Utc::now()).unwrap());
        assert!(!db.delete_message(m.id, Utc::now()).unwrap());

        let stored = db.get_message(m.id).unwrap().unwrap();
        assert!(stored.is_deleted());
        assert_eq!(stored.body, "");
        assert_eq!(db.get_messages(conv.id, 10, None).unwrap().len(), 1);
        assert!(db.edit_message(m.id, "again", Utc::now()).unwrap().is_none());
    }

    #[test]
    fn edit_records_timestamp_and_keeps_sensitivity() {
        let (db, conv) = db_with_conversation();
        let m = db.create_message(conv.id, 10, "pwd=x", true).unwrap();
        let edited = db.edit_message(m.id, "nothing here", Utc::now()).unwrap().unwrap();
        assert_eq!(edited.body, "nothing here");
        assert!(edited.edited_at.is_some());
        assert!(edited.is_sensitive);
    }

    #[test]
    fn last_read_never_regresses() {
        let (db, conv) = db_with_conversation();
        let a = db.create_message(conv.id, 10, "a", false).unwrap();
        let b = db.create_message(conv.id, 10, "b", false).unwrap();

        assert!(db.advance_last_read(conv.id, 11, b.id, Utc::now()).unwrap());
        assert!(!db.advance_last_read(conv.id, 11, a.id, Utc::now()).unwrap());
        assert!(!db.advance_last_read(conv.id, 11, b.id, Utc::now()).unwrap());
        let member = db.get_member(conv.id, 11).unwrap().unwrap();
        assert_eq!(member.last_read_message_id, Some(b.id));
        assert!(member.last_read_at.is_some());
    }

    #[test]
    fn last_read_rejects_foreign_messages() {
        let (db, conv) = db_with_conversation();
        let other = db
            .create_conversation(ConversationKind::Dm, "dm", None, None, false)
            .unwrap();
        let m = db.create_message(other.id, 10, "elsewhere", false).unwrap();
        assert!(!db.advance_last_read(conv.id, 11, m.id, Utc::now()).unwrap());
    }

    #[test]
    fn reactions_are_idempotent() {
        let (db, conv) = db_with_conversation();
        let m = db.create_message(conv.id, 10, "ship it", false).unwrap();

        assert!(db.add_reaction(m.id, 11, "🚀").unwrap());
        assert!(!db.add_reaction(m.id, 11, "🚀").unwrap());
        assert!(db.add_reaction(m.id, 10, "🚀").unwrap());
        assert_eq!(db.reactions_for_messages(&[m.id]).unwrap().len(), 2);

        assert!(db.remove_reaction(m.id, 11, "🚀").unwrap());
        assert!(!db.remove_reaction(m.id, 11, "🚀").unwrap());
    }

    #[test]
    fn suggestions_resolve_once() {
        let (db, conv) = db_with_conversation();
        let m = db.create_message(conv.id, 10, "todo", false).unwrap();
        let stored = db
            .append_suggestions(
                m.id,
                &[NewSuggestion {
                    kind: SuggestionType::CreateTask,
                    payload: json!({ "title": "todo" }),
                }],
            )
            .unwrap();
        let id = stored[0].id;

        match db.resolve_suggestion(id, SuggestionStatus::Accepted, Utc::now()).unwrap() {
            Resolution::Resolved(s) => {
                assert_eq!(s.status, SuggestionStatus::Accepted);
                assert!(s.resolved_at.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            db.resolve_suggestion(id, SuggestionStatus::Dismissed, Utc::now()).unwrap(),
            Resolution::AlreadyResolved(SuggestionStatus::Accepted)
        );
        assert_eq!(
            db.resolve_suggestion(999, SuggestionStatus::Dismissed, Utc::now()).unwrap(),
            Resolution::NotFound
        );
        assert!(db.resolve_suggestion(id, SuggestionStatus::Pending, Utc::now()).is_err());
    }

    #[test]
    fn derived_rows_round_trip() {
        let (db, conv) = db_with_conversation();
        let m = db.create_message(conv.id, 10, "see link", false).unwrap();
        db.append_attachments(
            m.id,
            &[NewAttachment {
                kind: AttachmentKind::Github,
                title: "a/b".into(),
                url: Some("https://github.com/a/b".into()),
                preview: json!({ "owner": "a", "repo": "b" }),
            }],
        )
        .unwrap();
        db.append_references(
            m.id,
            &[NewReference {
                entity_type: "task".into(),
                entity_id: 77,
                deep_link: "/tasks/77".into(),
            }],
        )
        .unwrap();

        let attachments = db.attachments_for_messages(&[m.id]).unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].preview["repo"], "b");
        let references = db.references_for_messages(&[m.id]).unwrap();
        assert_eq!(references[0].entity_id, 77);
        assert!(db.suggestions_for_messages(&[]).unwrap().is_empty());
    }

    #[test]
    fn touch_orders_conversation_list() {
        let (db, conv) = db_with_conversation();
        let other = db
            .create_conversation(ConversationKind::Team, "team", Some(3), None, false)
            .unwrap();
        db.add_member(other.id, 10, MemberRole::Member).unwrap();

        let later = Utc::now();
        let earlier = later - chrono::Duration::minutes(5);
        db.touch_conversation(other.id, later).unwrap();
        db.touch_conversation(conv.id, earlier).unwrap();
        // stale touch is ignored
        db.touch_conversation(other.id, earlier).unwrap();

        let list = db.list_conversations_for_user(10).unwrap();
        assert_eq!(list.iter().map(|c| c.id).collect::<Vec<_>>(), vec![other.id, conv.id]);

        db.set_hidden(conv.id, 10, true).unwrap();
        assert_eq!(db.list_conversations_for_user(10).unwrap().len(), 1);
    }
}

