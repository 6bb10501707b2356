use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS conversations (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            kind            TEXT NOT NULL,
            name            TEXT NOT NULL,
            team_id         INTEGER,
            owner_id        INTEGER,
            is_default      INTEGER NOT NULL DEFAULT 0,
            is_archived     INTEGER NOT NULL DEFAULT 0,
            last_message_at TEXT,
            created_at      TEXT NOT NULL
        );

        -- One self conversation per user
        CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_self
            ON conversations(owner_id) WHERE kind = 'self';

        CREATE TABLE IF NOT EXISTS conversation_members (
            conversation_id      INTEGER NOT NULL REFERENCES conversations(id),
            user_id              INTEGER NOT NULL,
            role                 TEXT NOT NULL,
            last_read_message_id INTEGER,
            last_read_at         TEXT,
            muted_until          TEXT,
            is_hidden            INTEGER NOT NULL DEFAULT 0,
            joined_at            TEXT NOT NULL,
            PRIMARY KEY (conversation_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_members_user
            ON conversation_members(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id INTEGER NOT NULL REFERENCES conversations(id),
            sender_id       INTEGER NOT NULL,
            body            TEXT NOT NULL,
            is_sensitive    INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL,
            edited_at       TEXT,
            deleted_at      TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at, id);

        CREATE TABLE IF NOT EXISTS message_attachments (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            kind        TEXT NOT NULL,
            title       TEXT NOT NULL,
            url         TEXT,
            preview     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_attachments_message
            ON message_attachments(message_id);

        CREATE TABLE IF NOT EXISTS message_references (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            entity_type TEXT NOT NULL,
            entity_id   INTEGER NOT NULL,
            deep_link   TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_references_message
            ON message_references(message_id);

        CREATE TABLE IF NOT EXISTS message_suggestions (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            kind        TEXT NOT NULL,
            payload     TEXT NOT NULL,
            status      TEXT NOT NULL DEFAULT 'pending',
            created_at  TEXT NOT NULL,
            resolved_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_suggestions_message
            ON message_suggestions(message_id);

        CREATE TABLE IF NOT EXISTS message_reactions (
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            user_id     INTEGER NOT NULL,
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            PRIMARY KEY (message_id, user_id, emoji)
        );

        CREATE TABLE IF NOT EXISTS password_vault_items (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id          INTEGER NOT NULL,
            title             TEXT NOT NULL,
            encrypted_secret  BLOB NOT NULL,
            nonce             BLOB NOT NULL,
            source_message_id INTEGER REFERENCES messages(id),
            created_at        TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS password_vault_shares (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            item_id         INTEGER NOT NULL REFERENCES password_vault_items(id),
            conversation_id INTEGER NOT NULL REFERENCES conversations(id),
            shared_by       INTEGER NOT NULL,
            allow_reveal    INTEGER NOT NULL DEFAULT 0,
            expires_at      TEXT,
            created_at      TEXT NOT NULL,
            UNIQUE (item_id, conversation_id)
        );

        -- Seed the workspace global conversation
        INSERT OR IGNORE INTO conversations (id, kind, name, is_default, created_at)
            VALUES (1, 'global', 'general', 1, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'));
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
