use crate::context::AppContext;
use crate::error::AppError;
use crate::handlers::connection::ConnectionHandler;
use crate::message::ServerEvent;

/// Joins the connection to a conversation after checking authorization
/// against the membership directory. Unauthorized joins are rejected with an
/// explicit error event and mutate nothing.
pub async fn handle_join(handler: &mut ConnectionHandler, ctx: &AppContext, conversation_id: String) {
    let Some(identity) = handler.identity().cloned() else {
        handler.send_app_error(&AppError::AuthenticationRequired).await;
        return;
    };

    match ctx.directory.is_member(identity.user_id, &conversation_id).await {
        Ok(true) => {}
        Ok(false) => {
            handler
                .send_app_error(&AppError::NotARoomMember(conversation_id))
                .await;
            return;
        }
        Err(e) => {
            handler.send_app_error(&e).await;
            return;
        }
    }

    match ctx
        .registry
        .join_room(handler.connection_id(), &conversation_id)
        .await
    {
        Ok(outcome) => {
            tracing::debug!(
                connection_id = %handler.connection_id(),
                conversation_id = %conversation_id,
                "Joined conversation"
            );
            if outcome.first_in_room {
                ctx.broadcast_to_room(
                    &conversation_id,
                    ServerEvent::ConversationPresence {
                        conversation_id: conversation_id.clone(),
                        user_id: identity.user_id,
                        present: true,
                    },
                )
                .await;
            }
        }
        Err(e) => handler.send_app_error(&e).await,
    }
}

/// Leaves a conversation, notifying remaining occupants that this user's
/// presence within the room ended (and clearing any typing state there).
pub async fn handle_leave(handler: &mut ConnectionHandler, ctx: &AppContext, conversation_id: String) {
    let Some(identity) = handler.identity().cloned() else {
        handler.send_app_error(&AppError::AuthenticationRequired).await;
        return;
    };

    let outcome = match ctx
        .registry
        .leave_room(handler.connection_id(), &conversation_id)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            handler.send_app_error(&e).await;
            return;
        }
    };

    if !outcome.was_joined {
        return;
    }

    if outcome.typing_cancelled {
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

    if outcome.user_left_room {
        ctx.broadcast_to_room(
            &conversation_id,
            ServerEvent::ConversationPresence {
                conversation_id: conversation_id.clone(),
                user_id: identity.user_id,
                present: false,
            },
        )
        .await;
    }
}
