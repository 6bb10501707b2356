use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use trackeep_api::middleware::create_token;
use trackeep_api::routes;
use trackeep_api::state::{AppState, AppStateInner};
use trackeep_crypto::{VaultCipher, VaultKey};
use trackeep_db::{Database, GLOBAL_CONVERSATION_ID};
use trackeep_gateway::{Gateway, GatewayConfig};
use trackeep_types::models::MemberRole;

const SECRET: &str = "test-secret";

fn app() -> (Router, AppState) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let state: AppState = Arc::new(AppStateInner {
        gateway: Gateway::new(db, GatewayConfig::default()),
        jwt_secret: SECRET.into(),
        vault: VaultCipher::new(&VaultKey::generate()),
    });
    (routes(state.clone()), state)
}

async fn call(app: &Router, user: u64, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let token = create_token(SECRET, user, &format!("user{user}")).unwrap();
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"));
    let body = match body {
        Some(v) => {
            req = req.header(header::CONTENT_TYPE, "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };

    let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Group owned by user 1 with user 2 as a member.
async fn group(app: &Router) -> u64 {
    let (status, conv) = call(
        app,
        1,
        "POST",
        "/conversations",
        Some(json!({ "type": "group", "name": "release crew", "member_ids": [2] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    conv["id"].as_u64().unwrap()
}

#[tokio::test]
async fn missing_or_bad_token_is_unauthorized() {
    let (app, _) = app();
    let resp = app
        .clone()
        .oneshot(Request::builder().uri("/conversations").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/conversations")
                .header(header::AUTHORIZATION, "Bearer nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn listing_creates_global_and_self_lazily() {
    let (app, _) = app();
    let (status, list) = call(&app, 7, "GET", "/conversations", None).await;
    assert_eq!(status, StatusCode::OK);
    let kinds: Vec<&str> = list
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["type"].as_str().unwrap())
        .collect();
    assert!(kinds.contains(&"global"));
    assert!(kinds.contains(&"self"));

    let (status, _) = call(
        &app,
        7,
        "POST",
        "/conversations",
        Some(json!({ "type": "self", "name": "another" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sensitive_suggestions_are_visible_to_the_author_only() {
    let (app, _) = app();
    let conv = group(&app).await;

    let (status, msg) = call(
        &app,
        2,
        "POST",
        &format!("/conversations/{conv}/messages"),
        Some(json!({ "body": "password: SuperSecret123!" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(msg["is_sensitive"], true);

    let (_, author_view) = call(&app, 2, "GET", &format!("/conversations/{conv}/messages"), None).await;
    let (_, other_view) = call(&app, 1, "GET", &format!("/conversations/{conv}/messages"), None).await;
    let types = |v: &Value| -> Vec<String> {
        v[0]["suggestions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["type"].as_str().unwrap().to_string())
            .collect()
    };
    assert_eq!(types(&author_view), ["password_warning", "move_to_password_vault"]);
    assert!(types(&other_view).is_empty());

    let (status, _) = call(&app, 3, "GET", &format!("/conversations/{conv}/messages"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn blank_messages_and_viewers_are_rejected() {
    let (app, state) = app();
    let conv = group(&app).await;
    state
        .gateway
        .db
        .add_member(conv, 5, MemberRole::Viewer)
        .unwrap();

    let uri = format!("/conversations/{conv}/messages");
    let (status, _) = call(&app, 1, "POST", &uri, Some(json!({ "body": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, 5, "POST", &uri, Some(json!({ "body": "hi" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, list) = call(&app, 5, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(list.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn reactions_are_idempotent() {
    let (app, state) = app();
    let conv = group(&app).await;
    let (_, msg) = call(
        &app,
        1,
        "POST",
        &format!("/conversations/{conv}/messages"),
        Some(json!({ "body": "shipped" })),
    )
    .await;
    let mid = msg["id"].as_u64().unwrap();

    let (peer, mut rx) = state.gateway.hub().register(1);
    state.gateway.hub().subscribe(&peer, conv);

    let uri = format!("/conversations/{conv}/messages/{mid}/reactions/tada");
    let (status, first) = call(&app, 2, "PUT", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["added"], true);
    let (_, second) = call(&app, 2, "PUT", &uri, None).await;
    assert_eq!(second["added"], false);

    let (_, list) = call(&app, 1, "GET", &format!("/conversations/{conv}/messages"), None).await;
    assert_eq!(list[0]["reactions"][0]["count"], 1);

    let (_, removed) = call(&app, 2, "DELETE", &uri, None).await;
    assert_eq!(removed["removed"], true);

    // one added, one removed; the repeated PUT broadcast nothing
    let mut types = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        let v: Value = serde_json::from_str(&frame).unwrap();
        types.push(v["type"].as_str().unwrap().to_string());
    }
    assert_eq!(types, ["reaction_added", "reaction_removed"]);
}

#[tokio::test]
async fn edit_and_delete_follow_ownership() {
    let (app, _) = app();
    let conv = group(&app).await;
    let (_, msg) = call(
        &app,
        2,
        "POST",
        &format!("/conversations/{conv}/messages"),
        Some(json!({ "body": "frist" })),
    )
    .await;
    let uri = format!("/conversations/{conv}/messages/{}", msg["id"]);

    let (status, _) = call(&app, 1, "PATCH", &uri, Some(json!({ "body": "hijack" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, edited) = call(&app, 2, "PATCH", &uri, Some(json!({ "body": "first" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(edited["body"], "first");
    assert!(edited["edited_at"].is_string());

    // owner of the group may delete someone else's message
    let (status, _) = call(&app, 1, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, 2, "PATCH", &uri, Some(json!({ "body": "again" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, list) = call(&app, 2, "GET", &format!("/conversations/{conv}/messages"), None).await;
    assert_eq!(list[0]["id"], msg["id"]);
    assert_eq!(list[0]["body"], "");
    assert!(list[0]["deleted_at"].is_string());
}

#[tokio::test]
async fn suggestions_resolve_once() {
    let (app, _) = app();
    let (_, msg) = call(
        &app,
        1,
        "POST",
        &format!("/conversations/{GLOBAL_CONVERSATION_ID}/messages"),
        Some(json!({ "body": "read https://example.com/guide" })),
    )
    .await;
    let sid = msg["suggestions"][0]["id"].as_u64().unwrap();

    let (status, accepted) = call(&app, 1, "POST", &format!("/suggestions/{sid}/accept"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["status"], "accepted");

    let (status, _) = call(&app, 1, "POST", &format!("/suggestions/{sid}/dismiss"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(&app, 1, "POST", "/suggestions/9999/accept", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn vault_reveal_needs_a_live_revealable_share() {
    let (app, _) = app();
    let conv = group(&app).await;
    let (_, msg) = call(
        &app,
        1,
        "POST",
        &format!("/conversations/{conv}/messages"),
        Some(json!({ "body": "password: hunter2hunter2" })),
    )
    .await;

    let (status, item) = call(
        &app,
        1,
        "POST",
        "/vault/items",
        Some(json!({ "title": "staging db", "secret": "hunter2hunter2", "source_message_id": msg["id"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(item.get("encrypted_secret").is_none());
    let item_id = item["id"].as_u64().unwrap();

    // the move-to-vault suggestion was accepted along the way
    let (_, list) = call(&app, 1, "GET", &format!("/conversations/{conv}/messages"), None).await;
    let moved = list[0]["suggestions"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["type"] == "move_to_password_vault")
        .cloned()
        .unwrap();
    assert_eq!(moved["status"], "accepted");

    let reveal = format!("/vault/items/{item_id}/reveal");
    let (status, _) = call(&app, 2, "GET", &reveal, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let shares = format!("/vault/items/{item_id}/shares");
    let (status, _) = call(&app, 1, "POST", &shares, Some(json!({ "conversation_id": conv }))).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = call(&app, 2, "GET", &reveal, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(&app, 2, "POST", &shares, Some(json!({ "conversation_id": conv }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    call(&app, 1, "POST", &shares, Some(json!({ "conversation_id": conv, "allow_reveal": true }))).await;
    let (status, revealed) = call(&app, 2, "GET", &reveal, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(revealed["secret"], "hunter2hunter2");

    let (status, owner) = call(&app, 1, "GET", &reveal, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(owner["title"], "staging db");
}

#[tokio::test]
async fn removing_a_member_unsubscribes_their_clients() {
    let (app, state) = app();
    let conv = group(&app).await;
    let hub = state.gateway.hub();
    let (phone, _phone_rx) = hub.register(2);
    let (owner, mut owner_rx) = hub.register(1);
    hub.subscribe(&phone, conv);
    hub.subscribe(&owner, conv);

    let (status, _) = call(&app, 2, "DELETE", &format!("/conversations/{conv}/members/1"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(&app, 1, "DELETE", &format!("/conversations/{conv}/members/2"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(hub.subscriber_count(conv), 1);
    assert!(hub.rooms_of(&phone).is_empty());

    let frame = owner_rx.try_recv().unwrap();
    let v: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(v["type"], "member_left");
    assert_eq!(v["data"]["user_id"], 2);

    let (status, _) = call(&app, 2, "GET", &format!("/conversations/{conv}/messages"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, added) = call(
        &app,
        1,
        "POST",
        &format!("/conversations/{conv}/members"),
        Some(json!({ "user_id": 2, "role": "viewer" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(added["added"], true);
}

#[tokio::test]
async fn mark_read_never_regresses() {
    let (app, _) = app();
    let conv = group(&app).await;
    let uri = format!("/conversations/{conv}/messages");
    let (_, first) = call(&app, 1, "POST", &uri, Some(json!({ "body": "one" }))).await;
    let (_, second) = call(&app, 1, "POST", &uri, Some(json!({ "body": "two" }))).await;

    let read = format!("/conversations/{conv}/read");
    let (_, r) = call(&app, 2, "POST", &read, Some(json!({ "message_id": second["id"] }))).await;
    assert_eq!(r["advanced"], true);
    let (_, r) = call(&app, 2, "POST", &read, Some(json!({ "message_id": first["id"] }))).await;
    assert_eq!(r["advanced"], false);
}

#[tokio::test]
async fn archived_conversations_refuse_new_messages() {
    let (app, _) = app();
    let conv = group(&app).await;
    let uri = format!("/conversations/{conv}/messages");
    let (status, _) = call(&app, 2, "POST", &uri, Some(json!({ "body": "before" }))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = call(&app, 1, "POST", &format!("/conversations/{conv}/archive"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = call(&app, 2, "POST", &uri, Some(json!({ "body": "after" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, list) = call(&app, 2, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn members_mute_and_hide_for_themselves() {
    let (app, _) = app();
    let conv = group(&app).await;
    let settings = format!("/conversations/{conv}/settings");

    let (status, member) = call(
        &app,
        2,
        "PATCH",
        &settings,
        Some(json!({ "muted_until": "2099-01-01T00:00:00Z", "is_hidden": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(member["user_id"], 2);
    assert!(member["muted_until"].as_str().unwrap().starts_with("2099-01-01"));
    assert_eq!(member["is_hidden"], true);

    let (_, list) = call(&app, 2, "GET", "/conversations", None).await;
    assert!(list.as_array().unwrap().iter().all(|c| c["id"] != conv));
    // the owner's view is untouched
    let (_, list) = call(&app, 1, "GET", "/conversations", None).await;
    assert!(list.as_array().unwrap().iter().any(|c| c["id"] == conv));

    // explicit null unmutes, the hidden flag is left alone
    let (status, member) = call(&app, 2, "PATCH", &settings, Some(json!({ "muted_until": null }))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(member["muted_until"].is_null());
    assert_eq!(member["is_hidden"], true);

    let (status, _) = call(&app, 9, "PATCH", &settings, Some(json!({ "is_hidden": false }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
