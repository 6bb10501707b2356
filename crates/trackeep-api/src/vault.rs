use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{error, info, warn};

use trackeep_types::api::{Claims, CreateVaultItemRequest, RevealResponse, ShareVaultItemRequest};
use trackeep_types::models::{SuggestionStatus, SuggestionType};

use crate::state::AppState;

const MAX_TITLE_LEN: usize = 200;
const MAX_SECRET_LEN: usize = 8 * 1024;

/// Store a secret encrypted. When it came from a chat message, the sender's
/// pending `move_to_password_vault` suggestion on that message is accepted.
pub async fn create_item(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateVaultItemRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let title = req.title.trim().to_string();
    if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.secret.is_empty() || req.secret.len() > MAX_SECRET_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }

    if let Some(message_id) = req.source_message_id {
        let message = state
            .db(move |db| db.get_message(message_id))
            .await?
            .ok_or(StatusCode::NOT_FOUND)?;
        if message.sender_id != claims.sub {
            return Err(StatusCode::FORBIDDEN);
        }
    }

    let sealed = state.vault.seal(claims.sub, req.secret.as_bytes()).map_err(|e| {
        error!("Vault encryption failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let owner = claims.sub;
    let source = req.source_message_id;
    let item = state
        .db(move |db| {
            let item =
                db.create_vault_item(owner, &title, &sealed.ciphertext, &sealed.nonce, source)?;

            if let Some(message_id) = source {
                let now = Utc::now();
                for s in db.suggestions_for_messages(&[message_id])? {
                    if s.kind == SuggestionType::MoveToPasswordVault
                        && s.status == SuggestionStatus::Pending
                    {
                        db.resolve_suggestion(s.id, SuggestionStatus::Accepted, now)?;
                    }
                }
            }
            Ok(item)
        })
        .await?;

    info!("User {} stored vault item {}", owner, item.id);
    Ok((StatusCode::CREATED, Json(item)))
}

/// Only the owner shares, and only into conversations they belong to.
pub async fn share_item(
    State(state): State<AppState>,
    Path(item_id): Path<u64>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ShareVaultItemRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let item = state
        .db(move |db| db.get_vault_item(item_id))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;
    if item.owner_id != claims.sub {
        return Err(StatusCode::FORBIDDEN);
    }
    state.require_member(req.conversation_id, claims.sub).await?;

    if req.expires_at.is_some_and(|at| at <= Utc::now()) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let shared_by = claims.sub;
    let share = state
        .db(move |db| {
            db.share_vault_item(item_id, req.conversation_id, shared_by, req.allow_reveal, req.expires_at)
        })
        .await?;

    Ok((StatusCode::CREATED, Json(share)))
}

/// Plaintext for the owner, or for members of a conversation holding a live
/// share that allows reveal. Metadata-only shares get 403.
pub async fn reveal_item(
    State(state): State<AppState>,
    Path(item_id): Path<u64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = claims.sub;
    let (item, allowed) = state
        .db(move |db| {
            let Some(item) = db.get_vault_item(item_id)? else {
                return Ok(None);
            };
            let allowed = db.can_reveal_vault_item(&item, user_id, Utc::now())?;
            Ok(Some((item, allowed)))
        })
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;

    if !allowed {
        warn!("User {} denied reveal of vault item {}", user_id, item_id);
        return Err(StatusCode::FORBIDDEN);
    }

    let plaintext = state
        .vault
        .open(item.owner_id, &item.encrypted_secret, &item.nonce)
        .map_err(|e| {
            error!("Vault item {} failed to decrypt: {}", item_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    let secret = String::from_utf8(plaintext).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    info!("User {} revealed vault item {}", user_id, item_id);
    Ok(Json(RevealResponse {
        id: item.id,
        title: item.title,
        secret,
    }))
}
