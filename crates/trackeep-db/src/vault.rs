use anyhow::Result;
use chrono::{DateTime, Utc};

use trackeep_types::models::{
    ConversationId, MessageId, PasswordVaultItem, PasswordVaultShare, UserId,
};

use crate::Database;
use crate::models::{self, VAULT_ITEM_COLUMNS, VAULT_SHARE_COLUMNS, ts};
use crate::queries::OptionalExt;

impl Database {
    // -- Password vault --

    /// Store an already-encrypted secret. Plaintext never reaches this layer.
    pub fn create_vault_item(
        &self,
        owner_id: UserId,
        title: &str,
        encrypted_secret: &[u8],
        nonce: &[u8],
        source_message_id: Option<MessageId>,
    ) -> Result<PasswordVaultItem> {
        let now = Utc::now();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO password_vault_items
                    (owner_id, title, encrypted_secret, nonce, source_message_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    owner_id as i64,
                    title,
                    encrypted_secret,
                    nonce,
                    source_message_id.map(|v| v as i64),
                    ts(now),
                ],
            )?;

            Ok(PasswordVaultItem {
                id: conn.last_insert_rowid() as u64,
                owner_id,
                title: title.to_string(),
                encrypted_secret: encrypted_secret.to_vec(),
                nonce: nonce.to_vec(),
                source_message_id,
                created_at: now,
            })
        })
    }

    pub fn get_vault_item(&self, id: u64) -> Result<Option<PasswordVaultItem>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {VAULT_ITEM_COLUMNS} FROM password_vault_items WHERE id = ?1"),
                [id as i64],
                models::vault_item,
            )
            .optional()
        })
    }

    /// Share (or re-share with new terms) an item with one conversation.
    pub fn share_vault_item(
        &self,
        item_id: u64,
        conversation_id: ConversationId,
        shared_by: UserId,
        allow_reveal: bool,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<PasswordVaultShare> {
        let now = Utc::now();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO password_vault_shares
                    (item_id, conversation_id, shared_by, allow_reveal, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (item_id, conversation_id) DO UPDATE SET
                    shared_by = excluded.shared_by,
                    allow_reveal = excluded.allow_reveal,
                    expires_at = excluded.expires_at",
                rusqlite::params![
                    item_id as i64,
                    conversation_id as i64,
                    shared_by as i64,
                    allow_reveal,
                    expires_at.map(ts),
                    ts(now),
                ],
            )?;

            let share = conn.query_row(
                &format!(
                    "SELECT {VAULT_SHARE_COLUMNS} FROM password_vault_shares
                     WHERE item_id = ?1 AND conversation_id = ?2"
                ),
                [item_id as i64, conversation_id as i64],
                models::vault_share,
            )?;
            Ok(share)
        })
    }

    pub fn shares_for_item(&self, item_id: u64) -> Result<Vec<PasswordVaultShare>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {VAULT_SHARE_COLUMNS} FROM password_vault_shares WHERE item_id = ?1 ORDER BY id"
            ))?;
            let rows = stmt
                .query_map([item_id as i64], models::vault_share)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Owner always; otherwise a member of a conversation holding a live share
    /// that allows reveal. Metadata-only shares never reveal.
    pub fn can_reveal_vault_item(
        &self,
        item: &PasswordVaultItem,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if item.owner_id == user_id {
            return Ok(true);
        }

        for share in self.shares_for_item(item.id)? {
            if !share.allow_reveal || !share.is_live_at(now) {
                continue;
            }
            if self.get_member(share.conversation_id, user_id)?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackeep_types::models::{ConversationKind, MemberRole};

    #[test]
    fn reveal_requires_live_revealable_share() {
        let db = Database::open_in_memory().unwrap();
        let conv = db
            .create_conversation(ConversationKind::Group, "ops", None, None, false)
            .unwrap();
        db.add_member(conv.id, 2, MemberRole::Member).unwrap();
        let msg = db.create_message(conv.id, 1, "password: x", true).unwrap();

        let item = db
            .create_vault_item(1, "ops login", b"cipher", b"nonce-bytes!", Some(msg.id))
            .unwrap();
        assert_eq!(db.get_vault_item(item.id).unwrap().unwrap().source_message_id, Some(msg.id));

        let now = Utc::now();
        assert!(db.can_reveal_vault_item(&item, 1, now).unwrap());
        assert!(!db.can_reveal_vault_item(&item, 2, now).unwrap());

        db.share_vault_item(item.id, conv.id, 1, false, None).unwrap();
        assert!(!db.can_reveal_vault_item(&item, 2, now).unwrap());

        let share = db.share_vault_item(item.id, conv.id, 1, true, None).unwrap();
        assert!(share.allow_reveal);
        assert_eq!(db.shares_for_item(item.id).unwrap().len(), 1);
        assert!(db.can_reveal_vault_item(&item, 2, now).unwrap());
        assert!(!db.can_reveal_vault_item(&item, 3, now).unwrap());

        let past = now - chrono::Duration::hours(1);
        db.share_vault_item(item.id, conv.id, 1, true, Some(past)).unwrap();
        assert!(!db.can_reveal_vault_item(&item, 2, now).unwrap());
    }
}
