use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, warn};

use trackeep_gateway::{IngestError, Submission};
use trackeep_types::api::{Claims, EditMessageRequest, SendMessageRequest};
use trackeep_types::events::EventPayload;
use trackeep_types::models::{
    ConversationId, Message, MessageId, MessageReaction, MessageView, ReactionGroup,
};

use crate::state::{AppState, AppStateInner};

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: the id of the oldest message from the previous page.
    pub before: Option<MessageId>,
}

fn default_limit() -> u32 {
    50
}

/// A page of messages, newest first, with everything derived from them.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<ConversationId>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    state.require_member(conversation_id, claims.sub).await?;

    let limit = query.limit.clamp(1, 200);
    let before = query.before;

    let (messages, attachments, references, suggestions, reactions) = state
        .db(move |db| {
            let messages = db.get_messages(conversation_id, limit, before)?;
            let ids: Vec<MessageId> = messages.iter().map(|m| m.id).collect();
            Ok((
                messages,
                db.attachments_for_messages(&ids)?,
                db.references_for_messages(&ids)?,
                db.suggestions_for_messages(&ids)?,
                db.reactions_for_messages(&ids)?,
            ))
        })
        .await?;

    let mut views: Vec<MessageView> = messages.into_iter().map(MessageView::new).collect();
    let index: HashMap<MessageId, usize> = views
        .iter()
        .enumerate()
        .map(|(i, v)| (v.message.id, i))
        .collect();

    for a in attachments {
        if let Some(&i) = index.get(&a.message_id) {
            views[i].attachments.push(a);
        }
    }
    for r in references {
        if let Some(&i) = index.get(&r.message_id) {
            views[i].references.push(r);
        }
    }
    for s in suggestions {
        if let Some(&i) = index.get(&s.message_id) {
            views[i].suggestions.push(s);
        }
    }
    for (message_id, groups) in group_reactions(&reactions) {
        if let Some(&i) = index.get(&message_id) {
            views[i].reactions = groups;
        }
    }

    let viewer = claims.sub;
    let views: Vec<MessageView> = views.into_iter().map(|v| v.visible_to(viewer)).collect();
    Ok(Json(views))
}

/// Group reactions by message, then by emoji in first-reacted order.
fn group_reactions(rows: &[MessageReaction]) -> HashMap<MessageId, Vec<ReactionGroup>> {
    let mut by_message: HashMap<MessageId, Vec<ReactionGroup>> = HashMap::new();
    for r in rows {
        let groups = by_message.entry(r.message_id).or_default();
        match groups.iter_mut().find(|g| g.emoji == r.emoji) {
            Some(group) => {
                group.count += 1;
                group.user_ids.push(r.user_id);
            }
            None => groups.push(ReactionGroup {
                emoji: r.emoji.clone(),
                count: 1,
                user_ids: vec![r.user_id],
            }),
        }
    }
    by_message
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<ConversationId>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    state.require_writer(conversation_id, claims.sub).await?;

    let submission = Submission {
        conversation_id,
        sender_id: claims.sub,
        body: req.body,
        references: req.references,
    };

    let out = state
        .gateway
        .pipeline
        .ingest(submission)
        .await
        .map_err(|e| match e {
            IngestError::EmptyBody => StatusCode::BAD_REQUEST,
            IngestError::Archived(_) => StatusCode::CONFLICT,
            other => {
                error!("Message ingestion failed: {}", other);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        })?;

    Ok((StatusCode::CREATED, Json(out.view)))
}

/// Load a message and make sure it lives in the conversation from the path.
async fn message_in(
    state: &AppStateInner,
    conversation_id: ConversationId,
    message_id: MessageId,
) -> Result<Message, StatusCode> {
    let message = state
        .db(move |db| db.get_message(message_id))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;
    if message.conversation_id != conversation_id {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(message)
}

/// Soft edit by the sender. The detector is not re-run; sensitivity is
/// decided once, at creation.
pub async fn edit_message(
    State(state): State<AppState>,
    Path((conversation_id, message_id)): Path<(ConversationId, MessageId)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<EditMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    state.require_writer(conversation_id, claims.sub).await?;
    let message = message_in(&state, conversation_id, message_id).await?;
    if message.sender_id != claims.sub {
        return Err(StatusCode::FORBIDDEN);
    }

    let body = req.body.trim().to_string();
    if body.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let edited = state
        .db(move |db| db.edit_message(message_id, &body, Utc::now()))
        .await?
        .ok_or(StatusCode::CONFLICT)?;

    let Some(edited_at) = edited.edited_at else {
        warn!("Edited message {} has no edit timestamp", message_id);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    };
    state.gateway.hub().broadcast(
        conversation_id,
        &EventPayload::MessageEdited {
            message_id,
            body: edited.body.clone(),
            edited_at,
        },
    );

    Ok(Json(edited))
}

/// Tombstone by the sender or a conversation admin.
pub async fn delete_message(
    State(state): State<AppState>,
    Path((conversation_id, message_id)): Path<(ConversationId, MessageId)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let member = state.require_member(conversation_id, claims.sub).await?;
    let message = message_in(&state, conversation_id, message_id).await?;
    if message.sender_id != claims.sub && !member.role.can_manage() {
        return Err(StatusCode::FORBIDDEN);
    }

    let deleted_at = Utc::now();
    let deleted = state
        .db(move |db| db.delete_message(message_id, deleted_at))
        .await?;
    if !deleted {
        // Already a tombstone
        return Err(StatusCode::NOT_FOUND);
    }

    state.gateway.hub().broadcast(
        conversation_id,
        &EventPayload::MessageDeleted {
            message_id,
            deleted_at,
        },
    );

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reactions_group_by_emoji_in_first_seen_order() {
        let now = Utc::now();
        let row = |message_id, user_id, emoji: &str| MessageReaction {
            message_id,
            user_id,
            emoji: emoji.to_string(),
            created_at: now,
        };
        let rows = vec![
            row(1, 10, "👍"),
            row(1, 11, "🎉"),
            row(1, 12, "👍"),
            row(2, 10, "👀"),
        ];

        let grouped = group_reactions(&rows);
        let first = &grouped[&1];
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].emoji, "👍");
        assert_eq!(first[0].count, 2);
        assert_eq!(first[0].user_ids, vec![10, 12]);
        assert_eq!(first[1].emoji, "🎉");
        assert_eq!(grouped[&2][0].count, 1);
    }
}
