mod auth;
mod connection;
mod messages;
mod presence;
mod rooms;

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use uuid::Uuid;

use crate::config::MAX_WEBSOCKET_MESSAGE_SIZE;
use crate::context::AppContext;
use crate::error::AppError;
use crate::message::{ClientEvent, PresenceStatus, ReactionAction, ServerEvent};
use crate::metrics;
use connection::{ConnectionHandler, WebSocketStreamType};

pub async fn handle_websocket(ws_stream: WebSocketStreamType, addr: SocketAddr, ctx: AppContext) {
    metrics::CONNECTIONS_TOTAL.inc();
    let connection_id = Uuid::new_v4();
    let span = tracing::info_span!("websocket_connection", %addr, %connection_id);
    let _enter = span.enter();

    tracing::info!("New connection from: {}", addr);

    let (ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut handler = ConnectionHandler::new(ws_sender, tx, connection_id, addr);

    // Handshake: the first frame must carry a valid access token within the
    // window, or the connection is dropped with no session state allocated.
    let window = Duration::from_secs(ctx.config.handshake_timeout_secs);
    let claims = match tokio::time::timeout(window, ws_receiver.next()).await {
        Err(_) => {
            metrics::HANDSHAKE_FAILURES_TOTAL.inc();
            handler.send_app_error(&AppError::AuthenticationRequired).await;
            return;
        }
        Ok(None) | Ok(Some(Ok(WsMessage::Close(_)))) => return,
        Ok(Some(Err(e))) => {
            tracing::debug!(error = %e, "WebSocket error during handshake from {}", addr);
            return;
        }
        Ok(Some(Ok(WsMessage::Binary(data)))) => {
            match rmp_serde::from_slice::<ClientEvent>(&data) {
                Ok(ClientEvent::Connect { access_token }) => {
                    match auth::authenticate(&mut handler, &ctx, &access_token).await {
                        Some(claims) => claims,
                        None => return,
                    }
                }
                Ok(_) => {
                    metrics::HANDSHAKE_FAILURES_TOTAL.inc();
                    handler.send_app_error(&AppError::AuthenticationRequired).await;
                    return;
                }
                Err(e) => {
                    tracing::warn!("Failed to parse handshake from {}: {}", addr, e);
                    handler
                        .send_app_error(&AppError::validation("invalid message format"))
                        .await;
                    return;
                }
            }
        }
        Ok(Some(Ok(_))) => {
            metrics::HANDSHAKE_FAILURES_TOTAL.inc();
            handler.send_app_error(&AppError::AuthenticationRequired).await;
            return;
        }
    };

    if auth::establish_session(&mut handler, &ctx, &claims).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            maybe_msg = ws_receiver.next() => {
                let Some(msg) = maybe_msg else { break };
                match msg {
                    Ok(WsMessage::Binary(data)) => {
                        if data.len() > MAX_WEBSOCKET_MESSAGE_SIZE {
                            handler
                                .send_app_error(&AppError::validation("message too large"))
                                .await;
                            continue;
                        }
                        match rmp_serde::from_slice::<ClientEvent>(&data) {
                            Ok(event) => dispatch(&mut handler, &ctx, event).await,
                            Err(e) => {
                                tracing::warn!("Failed to parse message from {}: {}", addr, e);
                                handler
                                    .send_app_error(&AppError::validation("invalid message format"))
                                    .await;
                            }
                        }
                    }
                    Ok(WsMessage::Close(_)) => {
                        tracing::info!("Connection closed by client: {}", addr);
                        break;
                    }
                    Ok(WsMessage::Ping(data)) => {
                        let _ = handler.ws_sender_mut().send(WsMessage::Pong(data)).await;
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "WebSocket error from {}", addr);
                        break;
                    }
                    _ => {}
                }
            }

            Some(event) = rx.recv() => {
                if handler.send_event(&event).await.is_err() {
                    break;
                }
            }
        }
    }

    let display_name = handler
        .identity()
        .map(|identity| identity.display_name.clone())
        .unwrap_or_default();
    finalize_disconnect(&ctx, connection_id, &display_name).await;
    tracing::info!("Connection closed: {}", addr);
}

async fn dispatch(handler: &mut ConnectionHandler, ctx: &AppContext, event: ClientEvent) {
    match event {
        ClientEvent::Connect { .. } => {
            handler
                .send_app_error(&AppError::validation("already authenticated"))
                .await;
        }
        ClientEvent::JoinConversation { conversation_id } => {
            rooms::handle_join(handler, ctx, conversation_id).await;
        }
        ClientEvent::LeaveConversation { conversation_id } => {
            rooms::handle_leave(handler, ctx, conversation_id).await;
        }
        ClientEvent::SendMessage {
            conversation_id,
            content,
            reply_to,
            attachments,
        } => {
            messages::handle_send_message(handler, ctx, conversation_id, content, reply_to, attachments)
                .await;
        }
        ClientEvent::TypingStart { conversation_id } => {
            presence::handle_typing_start(handler, ctx, conversation_id).await;
        }
        ClientEvent::TypingStop { conversation_id } => {
            presence::handle_typing_stop(handler, ctx, conversation_id).await;
        }
        ClientEvent::PresenceUpdate { status } => {
            presence::handle_presence_update(handler, ctx, status).await;
        }
        ClientEvent::ReactionAdd { message_id, emoji } => {
            messages::handle_reaction(handler, ctx, message_id, emoji, ReactionAction::Add).await;
        }
        ClientEvent::ReactionRemove { message_id, emoji } => {
            messages::handle_reaction(handler, ctx, message_id, emoji, ReactionAction::Remove).await;
        }
        ClientEvent::ConversationRead {
            conversation_id,
            last_read_message_id,
        } => {
            messages::handle_conversation_read(handler, ctx, conversation_id, last_read_message_id)
                .await;
        }
    }
}

/// One atomic cleanup per closed connection: the registry computes what fell
/// out of scope (typing timers, room presence, the offline transition) and
/// the broadcasts follow.
async fn finalize_disconnect(ctx: &AppContext, connection_id: Uuid, display_name: &str) {
    let Some(cleanup) = ctx.registry.close_connection(connection_id).await else {
        return;
    };

    for conversation_id in &cleanup.typing_stopped {
        ctx.broadcast_to_room(
            conversation_id,
            ServerEvent::TypingUser {
                conversation_id: conversation_id.clone(),
                user_id: cleanup.user_id,
                user_name: display_name.to_string(),
                is_typing: false,
            },
        )
        .await;
    }

    for conversation_id in &cleanup.rooms_departed {
        ctx.broadcast_to_room(
            conversation_id,
            ServerEvent::ConversationPresence {
                conversation_id: conversation_id.clone(),
                user_id: cleanup.user_id,
                present: false,
            },
        )
        .await;
    }

    if let Some(last_seen) = cleanup.went_offline {
        ctx.broadcast_global(ServerEvent::PresenceUser {
            user_id: cleanup.user_id,
            status: PresenceStatus::Offline,
            last_seen: Some(last_seen),
        })
        .await;
    }
}
