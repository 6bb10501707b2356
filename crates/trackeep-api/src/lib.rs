pub mod conversations;
pub mod members;
pub mod messages;
pub mod middleware;
pub mod reactions;
pub mod state;
pub mod suggestions;
pub mod vault;

use axum::{
    Router,
    routing::{delete, get, patch, post, put},
};

use crate::state::AppState;

/// All authenticated REST routes.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route(
            "/conversations/{conversation_id}/archive",
            post(conversations::archive_conversation),
        )
        .route("/conversations/{conversation_id}/read", post(conversations::mark_read))
        .route(
            "/conversations/{conversation_id}/settings",
            patch(members::update_settings),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route(
            "/conversations/{conversation_id}/messages/{message_id}",
            patch(messages::edit_message).delete(messages::delete_message),
        )
        .route(
            "/conversations/{conversation_id}/messages/{message_id}/reactions/{emoji}",
            put(reactions::add_reaction).delete(reactions::remove_reaction),
        )
        .route(
            "/conversations/{conversation_id}/members",
            get(members::list_members).post(members::add_member),
        )
        .route(
            "/conversations/{conversation_id}/members/{user_id}",
            delete(members::remove_member),
        )
        .route("/suggestions/{suggestion_id}/accept", post(suggestions::accept_suggestion))
        .route("/suggestions/{suggestion_id}/dismiss", post(suggestions::dismiss_suggestion))
        .route("/vault/items", post(vault::create_item))
        .route("/vault/items/{item_id}/shares", post(vault::share_item))
        .route("/vault/items/{item_id}/reveal", get(vault::reveal_item))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state)
}
