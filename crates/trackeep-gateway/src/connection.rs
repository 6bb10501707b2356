use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, trace, warn};

use trackeep_types::events::ClientCommand;
use trackeep_types::models::{ConversationId, UserId};

use crate::Gateway;
use crate::hub::Client;
use crate::ingest::Submission;

/// Per-connection state the reader task owns.
pub struct Session {
    pub user_id: UserId,
    /// Rooms this connection may join; refreshed on every subscribe command
    pub allowed: HashSet<ConversationId>,
}

/// Handle a pre-authenticated WebSocket connection. The caller resolved the
/// user and the conversations they may subscribe to at the upgrade layer.
pub async fn handle_connection(
    socket: WebSocket,
    gateway: Gateway,
    user_id: UserId,
    allowed: HashSet<ConversationId>,
) {
    let (mut sender, mut receiver) = socket.split();
    let hub = gateway.hub().clone();
    let (client, mut outbound) = hub.register(user_id);

    info!("User {} connected to gateway (client {})", user_id, client.id);

    // Heartbeat: the writer pings, the reader records pongs
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();
    let heartbeat_interval = gateway.config.heartbeat_interval;

    // Writer: drain the hub queue -> socket, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                frame = outbound.recv() => {
                    // None: the hub closed our queue (dropped as too slow)
                    let Some(frame) = frame else { break };
                    if sender.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }

        let _ = sender.close().await;
    });

    // Reader: client commands, bounded by the idle timeout
    let recv_client = client.clone();
    let recv_gateway = gateway.clone();
    let idle_timeout = gateway.config.idle_timeout;
    let mut recv_task = tokio::spawn(async move {
        let mut session = Session { user_id, allowed };

        loop {
            let msg = match tokio::time::timeout(idle_timeout, receiver.next()).await {
                Ok(Some(Ok(msg))) => msg,
                Ok(Some(Err(e))) => {
                    debug!("User {} socket error: {}", user_id, e);
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    info!("User {} idle for {:?}, dropping connection", user_id, idle_timeout);
                    break;
                }
            };

            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => handle_command(&recv_gateway, &recv_client, &mut session, cmd).await,
                    Err(e) => {
                        warn!(
                            "User {} bad command: {} -- raw: {}",
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.disconnect(&client);
    info!("User {} disconnected from gateway (client {})", user_id, client.id);
}

/// Apply one client command. Failures are logged; the connection stays up.
pub async fn handle_command(
    gateway: &Gateway,
    client: &Arc<Client>,
    session: &mut Session,
    cmd: ClientCommand,
) {
    let user_id = session.user_id;
    let hub = gateway.hub();

    match cmd {
        ClientCommand::Subscribe { conversation_ids } => {
            match gateway.allowed_conversations(user_id).await {
                Ok(allowed) => session.allowed = allowed,
                Err(e) => warn!("Failed to refresh conversations for user {}: {}", user_id, e),
            }

            let mut joined = Vec::new();
            for conversation_id in conversation_ids {
                if !session.allowed.contains(&conversation_id) {
                    warn!(
                        "User {} tried to subscribe to conversation {} without membership",
                        user_id, conversation_id
                    );
                    continue;
                }
                if hub.subscribe(client, conversation_id) {
                    joined.push(conversation_id);
                }
            }

            let revoked = prune_revoked(gateway, client, session, &joined).await;
            debug!("User {} joined {} room(s)", user_id, joined.len() - revoked);
        }

        ClientCommand::Unsubscribe { conversation_ids } => {
            for conversation_id in conversation_ids {
                hub.unsubscribe(client, conversation_id);
            }
        }

        ClientCommand::SendMessage {
            conversation_id,
            body,
            references,
        } => {
            match gateway.member_role(conversation_id, user_id).await {
                Ok(Some(role)) if role.can_write() => {}
                Ok(_) => {
                    warn!("User {} may not write to conversation {}", user_id, conversation_id);
                    return;
                }
                Err(e) => {
                    warn!("Membership lookup failed for user {}: {}", user_id, e);
                    return;
                }
            }

            let submission = Submission {
                conversation_id,
                sender_id: user_id,
                body,
                references,
            };
            match gateway.pipeline.ingest(submission).await {
                Ok(out) => trace!("Message {} ingested over gateway", out.view.message.id),
                Err(e) => warn!("User {} message rejected: {}", user_id, e),
            }
        }

        ClientCommand::MarkRead {
            conversation_id,
            message_id,
        } => {
            let db = gateway.db.clone();
            let result = tokio::task::spawn_blocking(move || {
                db.advance_last_read(conversation_id, user_id, message_id, Utc::now())
            })
            .await;
            match result {
                Ok(Ok(advanced)) => trace!(
                    "User {} read pointer in {} -> {} (advanced: {})",
                    user_id, conversation_id, message_id, advanced
                ),
                Ok(Err(e)) => warn!("Failed to mark read for user {}: {}", user_id, e),
                Err(e) => warn!("Mark-read task failed: {}", e),
            }
        }
    }
}

/// Back out of rooms whose membership was revoked between the read that
/// authorized the subscribe and the subscribe itself. Revocation deletes the
/// row before it unsubscribes, so any removal this read misses will still
/// find the client in the room. Fails closed when storage is unreachable.
async fn prune_revoked(
    gateway: &Gateway,
    client: &Arc<Client>,
    session: &mut Session,
    joined: &[ConversationId],
) -> usize {
    if joined.is_empty() {
        return 0;
    }

    let current = match gateway.member_conversations(session.user_id).await {
        Ok(current) => current,
        Err(e) => {
            warn!("Membership re-check failed for user {}: {}", session.user_id, e);
            HashSet::new()
        }
    };

    let mut revoked = 0;
    for &conversation_id in joined {
        if !current.contains(&conversation_id) {
            gateway.hub().unsubscribe(client, conversation_id);
            session.allowed.remove(&conversation_id);
            revoked += 1;
        }
    }
    if revoked > 0 {
        info!("User {} lost {} room(s) to a concurrent revocation", session.user_id, revoked);
    }
    revoked
}
