use chrono::Utc;
use uuid::Uuid;

use crate::context::AppContext;
use crate::error::AppError;
use crate::handlers::connection::ConnectionHandler;
use crate::message::{MessagePayload, ReactionAction, ServerEvent};
use crate::metrics;

/// Relays a message to every connection in the conversation, here and on
/// other processes. Durable persistence belongs to the external message
/// store; the gateway's contract is at-least-once broadcast to currently
/// connected members.
pub async fn handle_send_message(
    handler: &mut ConnectionHandler,
    ctx: &AppContext,
    conversation_id: String,
    content: String,
    reply_to: Option<String>,
    attachments: Vec<String>,
) {
    let Some(identity) = handler.identity().cloned() else {
        handler.send_app_error(&AppError::AuthenticationRequired).await;
        return;
    };

    if !ctx
        .registry
        .is_joined(handler.connection_id(), &conversation_id)
        .await
    {
        handler
            .send_app_error(&AppError::NotARoomMember(conversation_id))
            .await;
        return;
    }

    if content.trim().is_empty() {
        handler
            .send_app_error(&AppError::validation("message content is empty"))
            .await;
        return;
    }

    // Typing state never outlives a sent message: the stop broadcast goes
    // out before the message itself.
    if ctx
        .registry
        .stop_typing(identity.user_id, &conversation_id)
        .await
    {
        ctx.broadcast_to_room(
            &conversation_id,
            ServerEvent::TypingUser {
                conversation_id: conversation_id.clone(),
                user_id: identity.user_id,
                user_name: identity.display_name.clone(),
                is_typing: false,
            },
        )
        .await;
    }

    let payload = MessagePayload {
        id: Uuid::new_v4().to_string(),
        conversation_id: conversation_id.clone(),
        sender_id: identity.user_id,
        sender_name: identity.display_name,
        content,
        reply_to,
        attachments,
        created_at: Utc::now(),
    };

    metrics::MESSAGES_RELAYED_TOTAL.inc();
    ctx.broadcast_to_room(&conversation_id, ServerEvent::MessageNew(payload))
        .await;
}

pub async fn handle_reaction(
    handler: &mut ConnectionHandler,
    ctx: &AppContext,
    message_id: String,
    emoji: String,
    action: ReactionAction,
) {
    let Some(identity) = handler.identity().cloned() else {
        handler.send_app_error(&AppError::AuthenticationRequired).await;
        return;
    };

    let conversation_id = match ctx.directory.conversation_for_message(&message_id).await {
        Ok(Some(conversation_id)) => conversation_id,
        Ok(None) => {
            handler
                .send_app_error(&AppError::validation("unknown message id"))
                .await;
            return;
        }
        Err(e) => {
            handler.send_app_error(&e).await;
            return;
        }
    };

    if !ctx
        .registry
        .is_joined(handler.connection_id(), &conversation_id)
        .await
    {
        handler
            .send_app_error(&AppError::NotARoomMember(conversation_id))
            .await;
        return;
    }

    ctx.broadcast_to_room(
        &conversation_id,
        ServerEvent::ReactionUpdate {
            message_id,
            user_id: identity.user_id,
            emoji,
            action,
        },
    )
    .await;
}

pub async fn handle_conversation_read(
    handler: &mut ConnectionHandler,
    ctx: &AppContext,
    conversation_id: String,
    last_read_message_id: Option<String>,
) {
    let Some(identity) = handler.identity().cloned() else {
        handler.send_app_error(&AppError::AuthenticationRequired).await;
        return;
    };

    if !ctx
        .registry
        .is_joined(handler.connection_id(), &conversation_id)
        .await
    {
        handler
            .send_app_error(&AppError::NotARoomMember(conversation_id))
            .await;
        return;
    }

    ctx.broadcast_to_room(
        &conversation_id,
        ServerEvent::ConversationRead {
            conversation_id: conversation_id.clone(),
            user_id: identity.user_id,
            last_read_message_id,
        },
    )
    .await;
}
