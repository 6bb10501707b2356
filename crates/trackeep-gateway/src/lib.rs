pub mod connection;
pub mod hub;
pub mod ingest;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use trackeep_db::Database;
use trackeep_types::models::{ConversationId, MemberRole, UserId};

pub use hub::{Client, Frame, Hub};
pub use ingest::{IngestError, Ingested, MessageStore, Pipeline, Submission};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Frames buffered per client before it is considered too slow
    pub outbound_queue: usize,
    pub heartbeat_interval: Duration,
    /// Drop a connection after this long without any inbound frame
    pub idle_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            outbound_queue: 256,
            heartbeat_interval: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Everything a connection or request handler needs: storage, the hub and
/// the ingestion pipeline over both.
#[derive(Clone)]
pub struct Gateway {
    pub db: Arc<Database>,
    pub pipeline: Pipeline<Database>,
    pub config: GatewayConfig,
}

impl Gateway {
    pub fn new(db: Arc<Database>, config: GatewayConfig) -> Self {
        let hub = Hub::new(config.outbound_queue);
        Self {
            pipeline: Pipeline::new(db.clone(), hub),
            db,
            config,
        }
    }

    pub fn hub(&self) -> &Hub {
        self.pipeline.hub()
    }

    /// Conversations the user may subscribe to. Also makes sure the user has
    /// their `global` membership and `self` conversation.
    pub async fn allowed_conversations(&self, user_id: UserId) -> anyhow::Result<HashSet<ConversationId>> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            db.ensure_global_membership(user_id)?;
            db.ensure_self_conversation(user_id)?;
            Ok(())
        })
        .await??;
        self.member_conversations(user_id).await
    }

    /// Current memberships as stored, with no side effects.
    pub async fn member_conversations(&self, user_id: UserId) -> anyhow::Result<HashSet<ConversationId>> {
        let db = self.db.clone();
        let ids = tokio::task::spawn_blocking(move || db.member_conversation_ids(user_id)).await??;
        Ok(ids.into_iter().collect())
    }

    pub async fn member_role(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> anyhow::Result<Option<MemberRole>> {
        let db = self.db.clone();
        let member = tokio::task::spawn_blocking(move || db.get_member(conversation_id, user_id)).await??;
        Ok(member.map(|m| m.role))
    }
}
