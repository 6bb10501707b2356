use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;

use trackeep_types::api::{Claims, CreateConversationRequest, MarkReadRequest};
use trackeep_types::models::{ConversationId, ConversationKind, MemberRole};

use crate::state::AppState;

const MAX_NAME_LEN: usize = 100;

/// Conversations the caller belongs to, most recently active first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = claims.sub;
    let conversations = state
        .db(move |db| {
            db.ensure_global_membership(user_id)?;
            db.ensure_self_conversation(user_id)?;
            db.list_conversations_for_user(user_id)
        })
        .await?;

    Ok(Json(conversations))
}

pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let name = req.name.trim().to_string();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }

    // `global` and `self` exist implicitly and are never created by hand
    let mut member_ids: Vec<_> = req
        .member_ids
        .into_iter()
        .filter(|id| *id != claims.sub)
        .collect();
    member_ids.sort_unstable();
    member_ids.dedup();

    match req.kind {
        ConversationKind::Global | ConversationKind::Personal => {
            return Err(StatusCode::BAD_REQUEST);
        }
        ConversationKind::Team if req.team_id.is_none() => return Err(StatusCode::BAD_REQUEST),
        ConversationKind::Dm if member_ids.len() != 1 => return Err(StatusCode::BAD_REQUEST),
        _ => {}
    }

    let owner = claims.sub;
    let kind = req.kind;
    let team_id = req.team_id;
    let conversation = state
        .db(move |db| {
            let conversation = db.create_conversation(kind, &name, team_id, None, false)?;
            db.add_member(conversation.id, owner, MemberRole::Owner)?;
            for user_id in member_ids {
                db.add_member(conversation.id, user_id, MemberRole::Member)?;
            }
            Ok(conversation)
        })
        .await?;

    Ok((StatusCode::CREATED, Json(conversation)))
}

pub async fn archive_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<ConversationId>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    state.require_manager(conversation_id, claims.sub).await?;

    // Archiving twice is fine
    state
        .db(move |db| db.archive_conversation(conversation_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Advance the caller's last-read pointer. Moving backwards is a no-op.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<ConversationId>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    state.require_member(conversation_id, claims.sub).await?;

    let user_id = claims.sub;
    let advanced = state
        .db(move |db| db.advance_last_read(conversation_id, user_id, req.message_id, Utc::now()))
        .await?;

    Ok(Json(serde_json::json!({ "advanced": advanced })))
}
