use std::sync::Arc;

use axum::http::StatusCode;
use tracing::error;

use trackeep_crypto::VaultCipher;
use trackeep_gateway::Gateway;
use trackeep_types::models::{ConversationId, ConversationMember, UserId};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub gateway: Gateway,
    pub jwt_secret: String,
    pub vault: VaultCipher,
}

impl AppStateInner {
    /// Run a blocking database call off the async runtime, mapping failures
    /// to 500.
    pub async fn db<T, F>(&self, f: F) -> Result<T, StatusCode>
    where
        F: FnOnce(&trackeep_db::Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.gateway.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?
            .map_err(|e| {
                error!("Database error: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })
    }

    /// The caller's membership, or 403. Role checks happen here, not in the hub.
    pub async fn require_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<ConversationMember, StatusCode> {
        self.db(move |db| db.get_member(conversation_id, user_id))
            .await?
            .ok_or(StatusCode::FORBIDDEN)
    }

    pub async fn require_writer(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<ConversationMember, StatusCode> {
        let member = self.require_member(conversation_id, user_id).await?;
        if !member.role.can_write() {
            return Err(StatusCode::FORBIDDEN);
        }
        Ok(member)
    }

    pub async fn require_manager(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<ConversationMember, StatusCode> {
        let member = self.require_member(conversation_id, user_id).await?;
        if !member.role.can_manage() {
            return Err(StatusCode::FORBIDDEN);
        }
        Ok(member)
    }
}
