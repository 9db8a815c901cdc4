use std::time::Duration;

use crate::context::AppContext;
use crate::error::AppError;
use crate::handlers::connection::ConnectionHandler;
use crate::message::{PresenceStatus, ServerEvent};

/// idle -> typing: (re)arms the debounce timer and broadcasts the typing
/// flag on the transition. The timer firing is the authoritative stop unless
/// an explicit stop or a sent message arrives first.
pub async fn handle_typing_start(
    handler: &mut ConnectionHandler,
    ctx: &AppContext,
    conversation_id: String,
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

    let armed = ctx
        .registry
        .arm_typing(identity.user_id, &conversation_id)
        .await;

    if armed.was_idle {
        ctx.broadcast_to_room(
            &conversation_id,
            ServerEvent::TypingUser {
                conversation_id: conversation_id.clone(),
                user_id: identity.user_id,
                user_name: identity.display_name.clone(),
                is_typing: true,
            },
        )
        .await;
    }

    let debounce = Duration::from_millis(ctx.config.typing_debounce_ms);
    let generation = armed.generation;
    let task_ctx = ctx.clone();
    let task_room = conversation_id.clone();
    let user_id = identity.user_id;
    let user_name = identity.display_name.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(debounce).await;
        if task_ctx
            .registry
            .expire_typing(user_id, &task_room, generation)
            .await
        {
            task_ctx
                .broadcast_to_room(
                    &task_room,
                    ServerEvent::TypingUser {
                        conversation_id: task_room.clone(),
                        user_id,
                        user_name,
                        is_typing: false,
                    },
                )
                .await;
        }
    });

    ctx.registry
        .store_typing_handle(identity.user_id, &conversation_id, generation, handle)
        .await;
}

/// typing -> idle on an explicit stop. Broadcast exactly once per
/// transition; stops while already idle are no-ops.
pub async fn handle_typing_stop(
    handler: &mut ConnectionHandler,
    ctx: &AppContext,
    conversation_id: String,
) {
    let Some(identity) = handler.identity().cloned() else {
        handler.send_app_error(&AppError::AuthenticationRequired).await;
        return;
    };

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
                user_name: identity.display_name,
                is_typing: false,
            },
        )
        .await;
    }
}

/// Explicit presence update from any of the user's connections. `offline`
/// is derived solely from connection-count bookkeeping and cannot be set by
/// clients.
pub async fn handle_presence_update(
    handler: &mut ConnectionHandler,
    ctx: &AppContext,
    status: PresenceStatus,
) {
    let Some(identity) = handler.identity().cloned() else {
        handler.send_app_error(&AppError::AuthenticationRequired).await;
        return;
    };

    if status == PresenceStatus::Offline {
        handler
            .send_app_error(&AppError::validation(
                "offline presence is derived from connection state",
            ))
            .await;
        return;
    }

    if ctx.registry.set_presence(identity.user_id, status).await {
        ctx.broadcast_global(ServerEvent::PresenceUser {
            user_id: identity.user_id,
            status,
            last_seen: None,
        })
        .await;
    }
}
