use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use trackeep_types::api::Claims;
use trackeep_types::events::EventPayload;
use trackeep_types::models::{ConversationId, MessageId};

use crate::state::{AppState, AppStateInner};

const MAX_EMOJI_LEN: usize = 32;

async fn check_target(
    state: &AppStateInner,
    conversation_id: ConversationId,
    message_id: MessageId,
    user_id: u64,
    emoji: &str,
) -> Result<(), StatusCode> {
    if emoji.trim().is_empty() || emoji.chars().count() > MAX_EMOJI_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }
    state.require_writer(conversation_id, user_id).await?;

    let message = state
        .db(move |db| db.get_message(message_id))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;
    if message.conversation_id != conversation_id || message.is_deleted() {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(())
}

/// Idempotent: re-reacting is a no-op and broadcasts nothing.
pub async fn add_reaction(
    State(state): State<AppState>,
    Path((conversation_id, message_id, emoji)): Path<(ConversationId, MessageId, String)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    check_target(&state, conversation_id, message_id, claims.sub, &emoji).await?;

    let user_id = claims.sub;
    let stored = emoji.clone();
    let added = state
        .db(move |db| db.add_reaction(message_id, user_id, &stored))
        .await?;

    if added {
        state.gateway.hub().broadcast(
            conversation_id,
            &EventPayload::ReactionAdded {
                message_id,
                user_id,
                emoji,
            },
        );
    }

    Ok(Json(serde_json::json!({ "added": added })))
}

pub async fn remove_reaction(
    State(state): State<AppState>,
    Path((conversation_id, message_id, emoji)): Path<(ConversationId, MessageId, String)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    check_target(&state, conversation_id, message_id, claims.sub, &emoji).await?;

    let user_id = claims.sub;
    let stored = emoji.clone();
    let removed = state
        .db(move |db| db.remove_reaction(message_id, user_id, &stored))
        .await?;

    if removed {
        state.gateway.hub().broadcast(
            conversation_id,
            &EventPayload::ReactionRemoved {
                message_id,
                user_id,
                emoji,
            },
        );
    }

    Ok(Json(serde_json::json!({ "removed": removed })))
}
