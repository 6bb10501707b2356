use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use trackeep_types::api::{AddMemberRequest, Claims, MemberSettingsRequest};
use trackeep_types::events::EventPayload;
use trackeep_types::models::{ConversationId, ConversationKind, MemberRole, UserId};

use crate::state::AppState;

/// Membership only changes in conversations people are invited to.
fn has_managed_membership(kind: ConversationKind) -> bool {
    matches!(
        kind,
        ConversationKind::Team | ConversationKind::Group | ConversationKind::PasswordVault
    )
}

pub async fn list_members(
    State(state): State<AppState>,
    Path(conversation_id): Path<ConversationId>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    state.require_member(conversation_id, claims.sub).await?;
    let members = state.db(move |db| db.list_members(conversation_id)).await?;
    Ok(Json(members))
}

/// Mute or hide a conversation for the caller. Muting only affects
/// notifications; a muted member still receives room events.
pub async fn update_settings(
    State(state): State<AppState>,
    Path(conversation_id): Path<ConversationId>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MemberSettingsRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    state.require_member(conversation_id, claims.sub).await?;

    let user_id = claims.sub;
    let MemberSettingsRequest {
        muted_until,
        is_hidden,
    } = req;
    let member = state
        .db(move |db| {
            if let Some(until) = muted_until {
                db.set_muted_until(conversation_id, user_id, until)?;
            }
            if let Some(hidden) = is_hidden {
                db.set_hidden(conversation_id, user_id, hidden)?;
            }
            db.get_member(conversation_id, user_id)
        })
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(member))
}

pub async fn add_member(
    State(state): State<AppState>,
    Path(conversation_id): Path<ConversationId>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddMemberRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    state.require_manager(conversation_id, claims.sub).await?;
    if req.role == MemberRole::Owner {
        return Err(StatusCode::BAD_REQUEST);
    }

    let conversation = state
        .db(move |db| db.get_conversation(conversation_id))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;
    if !has_managed_membership(conversation.kind) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let AddMemberRequest { user_id, role } = req;
    let added = state
        .db(move |db| db.add_member(conversation_id, user_id, role))
        .await?;

    if added {
        info!("User {} added to conversation {} as {}", user_id, conversation_id, role);
        state
            .gateway
            .hub()
            .broadcast(conversation_id, &EventPayload::MemberJoined { user_id, role });
        Ok((StatusCode::CREATED, Json(serde_json::json!({ "added": true }))))
    } else {
        Ok((StatusCode::OK, Json(serde_json::json!({ "added": false }))))
    }
}

/// Admins remove others; anyone may leave. Owners stay.
pub async fn remove_member(
    State(state): State<AppState>,
    Path((conversation_id, user_id)): Path<(ConversationId, UserId)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let caller = state.require_member(conversation_id, claims.sub).await?;
    if user_id != claims.sub && !caller.role.can_manage() {
        return Err(StatusCode::FORBIDDEN);
    }

    let conversation = state
        .db(move |db| db.get_conversation(conversation_id))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;
    if !has_managed_membership(conversation.kind) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let target = state
        .db(move |db| db.get_member(conversation_id, user_id))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;
    if target.role == MemberRole::Owner {
        return Err(StatusCode::BAD_REQUEST);
    }

    let removed = state
        .db(move |db| db.remove_member(conversation_id, user_id))
        .await?;
    if !removed {
        return Err(StatusCode::NOT_FOUND);
    }

    let hub = state.gateway.hub();
    hub.broadcast(conversation_id, &EventPayload::MemberLeft { user_id });
    let dropped = hub.unsubscribe_user(conversation_id, user_id);
    info!(
        "User {} removed from conversation {} ({} live client(s) unsubscribed)",
        user_id, conversation_id, dropped
    );

    Ok(StatusCode::NO_CONTENT)
}
