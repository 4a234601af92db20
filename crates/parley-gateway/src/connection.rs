use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::task;
use tracing::{info, warn};
use uuid::Uuid;

use parley_store::Database;
use parley_types::events::{ClientEvent, EventKind, ServerEvent};
use parley_types::token::Claims;

use crate::handlers::{self, EventContext, Outbound, Recipient};
use crate::registry::{ConnId, Registry};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a pre-authenticated WebSocket connection. The token was already
/// verified at the HTTP upgrade layer, so the identity is bound to the
/// channel before the first frame arrives.
pub async fn handle_connection(
    socket: WebSocket,
    registry: Registry,
    db: Arc<Database>,
    identity: Claims,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();
    let user_id = identity.sub;

    info!("{} ({}) connected to gateway", identity.name, user_id);

    let (conn_id, mut rx) = registry.register(user_id).await;

    // Join one room per conversation the user belongs to and has not
    // soft-deleted, so room broadcasts reach this channel right away.
    join_active_conversations(&registry, &db, conn_id, user_id).await;

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward registry events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };

                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to serialize outbound event: {}", e);
                            continue;
                        }
                    };

                    if sender.send(Message::Text(text.into())).await.is_err() {
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
    });

    // Read events from the client, one at a time in arrival order
    let ctx = EventContext {
        db,
        registry: registry.clone(),
        identity,
        conn_id,
        jwt_secret,
    };
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => handle_frame(&ctx, &text).await,
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

    registry.unregister(user_id, conn_id).await;
    info!("{} disconnected from gateway", user_id);
}

async fn join_active_conversations(
    registry: &Registry,
    db: &Arc<Database>,
    conn_id: ConnId,
    user_id: Uuid,
) {
    let db = db.clone();
    let uid = user_id.to_string();
    let ids = match task::spawn_blocking(move || db.conversation_ids_for_user(&uid)).await {
        Ok(Ok(ids)) => ids,
        Ok(Err(e)) => {
            warn!("Failed to load conversations for {}: {}", user_id, e);
            return;
        }
        Err(e) => {
            warn!("Conversation load task failed for {}: {}", user_id, e);
            return;
        }
    };

    let mut joined = 0usize;
    for raw in ids {
        match raw.parse::<Uuid>() {
            Ok(room) => {
                registry.join(conn_id, room).await;
                joined += 1;
            }
            Err(e) => warn!("Corrupt conversation id '{}': {}", raw, e),
        }
    }

    info!("{} joined {} conversation rooms", user_id, joined);
}

async fn handle_frame(ctx: &EventContext, text: &str) {
    match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => {
            let out = handlers::dispatch(ctx, event).await;
            deliver(ctx, out).await;
        }
        Err(e) => {
            // A recognizable event name still gets a failure envelope back;
            // anything else is logged and dropped.
            let kind = serde_json::from_str::<serde_json::Value>(text)
                .ok()
                .and_then(|v| v.get("event")?.as_str()?.parse::<EventKind>().ok());

            match kind {
                Some(kind) => {
                    warn!(
                        "{} ({}) bad {} payload: {}",
                        ctx.identity.name,
                        ctx.identity.sub,
                        kind.name(),
                        e
                    );
                    ctx.registry
                        .send_to_conn(ctx.conn_id, ServerEvent::failure(kind, "Invalid request"))
                        .await;
                }
                None => {
                    // Truncate the excerpt on a char boundary
                    let mut cut = text.len().min(200);
                    while !text.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    warn!(
                        "{} ({}) bad frame: {} -- raw: {}",
                        ctx.identity.name,
                        ctx.identity.sub,
                        e,
                        &text[..cut]
                    );
                }
            }
        }
    }
}

async fn deliver(ctx: &EventContext, out: Vec<Outbound>) {
    for item in out {
        match item.to {
            Recipient::Caller => ctx.registry.send_to_conn(ctx.conn_id, item.event).await,
            Recipient::Conn(conn_id) => ctx.registry.send_to_conn(conn_id, item.event).await,
            Recipient::User(user_id) => ctx.registry.send_to_user(user_id, item.event).await,
            Recipient::Room(room) => ctx.registry.broadcast_room(room, item.event).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::events::ServerEvent;
    use tokio::sync::mpsc;

    async fn ctx_with_channel(
        registry: &Registry,
    ) -> (EventContext, mpsc::UnboundedReceiver<ServerEvent>) {
        let user_id = Uuid::new_v4();
        let (conn_id, rx) = registry.register(user_id).await;
        let ctx = EventContext {
            db: Arc::new(Database::open_in_memory().unwrap()),
            registry: registry.clone(),
            identity: Claims {
                sub: user_id,
                email: "ada@example.com".into(),
                name: "ada".into(),
                avatar: String::new(),
                exp: 0,
            },
            conn_id,
            jwt_secret: "test-secret".into(),
        };
        (ctx, rx)
    }

    #[tokio::test]
    async fn bad_payload_for_known_event_gets_failure_envelope() {
        let registry = Registry::new();
        let (ctx, mut rx) = ctx_with_channel(&registry).await;

        // newMessage without a conversationId does not parse
        handle_frame(&ctx, r#"{"event":"newMessage","payload":{"content":"hi"}}"#).await;

        match rx.try_recv().expect("caller gets a response") {
            ServerEvent::NewMessage(env) => {
                assert!(!env.success);
                assert_eq!(env.msg.as_deref(), Some("Invalid request"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unrecognized_frame_is_dropped_without_response() {
        let registry = Registry::new();
        let (ctx, mut rx) = ctx_with_channel(&registry).await;

        handle_frame(&ctx, r#"{"event":"joinRoom","payload":{}}"#).await;
        handle_frame(&ctx, "not json at all").await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn long_multibyte_frame_is_excerpted_without_panicking() {
        // The warn excerpt must cut on a char boundary. Log with a live
        // subscriber so the format arguments are actually evaluated, as
        // they are in production.
        let _guard = tracing::subscriber::set_default(tracing_subscriber::fmt().finish());

        let registry = Registry::new();
        let (ctx, mut rx) = ctx_with_channel(&registry).await;

        // A euro sign straddles the 200-byte excerpt limit
        let mut raw = "x".repeat(199);
        raw.push_str("€€€");
        handle_frame(&ctx, &raw).await;

        assert!(rx.try_recv().is_err());
    }
}
