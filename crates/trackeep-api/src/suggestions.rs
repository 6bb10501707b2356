use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::debug;

use trackeep_db::Resolution;
use trackeep_types::api::Claims;
use trackeep_types::models::SuggestionStatus;

use crate::state::AppState;

pub async fn accept_suggestion(
    State(state): State<AppState>,
    Path(suggestion_id): Path<u64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    resolve(state, suggestion_id, claims, SuggestionStatus::Accepted).await
}

pub async fn dismiss_suggestion(
    State(state): State<AppState>,
    Path(suggestion_id): Path<u64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    resolve(state, suggestion_id, claims, SuggestionStatus::Dismissed).await
}

/// `pending -> accepted | dismissed`, once. Anything already resolved is 409.
async fn resolve(
    state: AppState,
    suggestion_id: u64,
    claims: Claims,
    status: SuggestionStatus,
) -> Result<impl IntoResponse, StatusCode> {
    let (suggestion, message) = state
        .db(move |db| {
            let Some(suggestion) = db.get_suggestion(suggestion_id)? else {
                return Ok(None);
            };
            let message = db.get_message(suggestion.message_id)?;
            Ok(message.map(|m| (suggestion, m)))
        })
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;

    state.require_member(message.conversation_id, claims.sub).await?;

    // Author-only suggestions are invisible to everyone else
    if suggestion.kind.is_author_only() && message.sender_id != claims.sub {
        return Err(StatusCode::NOT_FOUND);
    }

    let outcome = state
        .db(move |db| db.resolve_suggestion(suggestion_id, status, Utc::now()))
        .await?;

    match outcome {
        Resolution::Resolved(s) => {
            debug!("Suggestion {} ({}) -> {}", s.id, s.kind, s.status);
            Ok(Json(s))
        }
        Resolution::AlreadyResolved(_) => Err(StatusCode::CONFLICT),
        Resolution::NotFound => Err(StatusCode::NOT_FOUND),
    }
}
