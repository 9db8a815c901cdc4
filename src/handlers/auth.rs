use crate::auth::Claims;
use crate::context::AppContext;
use crate::error::AppError;
use crate::handlers::connection::{ConnectionHandler, Identity};
use crate::message::{PresenceStatus, ServerEvent};
use crate::metrics;
use crate::utils::log_safe_id;

/// Validates the handshake credential, consulting the rate limiter keyed by
/// `identifier:origin` before and after the attempt. On any failure the
/// caller drops the connection without allocating session state.
pub async fn authenticate(
    handler: &mut ConnectionHandler,
    ctx: &AppContext,
    access_token: &str,
) -> Option<Claims> {
    if access_token.is_empty() {
        metrics::HANDSHAKE_FAILURES_TOTAL.inc();
        handler.send_app_error(&AppError::AuthenticationRequired).await;
        return None;
    }

    let origin = handler.addr().ip().to_string();
    let identifier = ctx
        .tokens
        .peek_subject(access_token)
        .unwrap_or_else(|| "unknown".to_string());

    let decision = ctx.auth_limiter.check_attempt(&identifier, &origin);
    if !decision.allowed {
        metrics::HANDSHAKE_FAILURES_TOTAL.inc();
        let retry_after_secs = decision
            .retry_after
            .map(|d| d.as_secs())
            .unwrap_or(0)
            .max(1);
        handler
            .send_app_error(&AppError::RateLimited { retry_after_secs })
            .await;
        return None;
    }

    match ctx.tokens.validate_access(access_token).await {
        Ok(claims) => {
            ctx.auth_limiter.reset(&identifier, &origin);
            Some(claims)
        }
        Err(e) => {
            ctx.auth_limiter.record_failure(&identifier, &origin);
            metrics::HANDSHAKE_FAILURES_TOTAL.inc();
            handler.send_app_error(&e).await;
            None
        }
    }
}

/// Registers the authenticated connection: seat in the registry, implicit
/// per-user broadcast channel, online presence on the user's first live
/// connection, and the handshake acknowledgement.
pub async fn establish_session(
    handler: &mut ConnectionHandler,
    ctx: &AppContext,
    claims: &Claims,
) -> Result<(), ()> {
    let user_id = match claims.user_id() {
        Ok(user_id) => user_id,
        Err(e) => {
            handler.send_app_error(&e).await;
            return Err(());
        }
    };

    let display_name = ctx
        .directory
        .display_name(user_id)
        .await
        .unwrap_or_else(|| claims.sub.clone());

    let became_online = ctx
        .registry
        .register_connection(
            handler.connection_id(),
            user_id,
            &claims.role,
            handler.tx().clone(),
        )
        .await;

    handler.set_identity(Identity {
        user_id,
        role: claims.role.clone(),
        display_name,
    });

    if ctx.config.logging.enable_user_identifiers {
        tracing::info!(%user_id, connection_id = %handler.connection_id(), "Session established");
    } else {
        tracing::info!(
            user_hash = %log_safe_id(&user_id.to_string(), &ctx.config.logging.hash_salt),
            connection_id = %handler.connection_id(),
            "Session established"
        );
    }

    if became_online {
        ctx.broadcast_global(ServerEvent::PresenceUser {
            user_id,
            status: PresenceStatus::Online,
            last_seen: None,
        })
        .await;
    }

    let ack = ServerEvent::ConnectSuccess {
        user_id,
        connection_id: handler.connection_id(),
    };
    let _ = handler.send_event(&ack).await;

    Ok(())
}
