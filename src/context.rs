use std::sync::Arc;
use uuid::Uuid;

use crate::auth::TokenService;
use crate::config::Config;
use crate::fanout::{FanoutAdapter, FanoutScope};
use crate::message::ServerEvent;
use crate::rate_limit::RateLimiter;
use crate::rooms::ConversationDirectory;
use crate::session::SessionRegistry;

/// Application context containing shared dependencies, constructed once at
/// process start and passed by reference so tests can run isolated
/// instances.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub tokens: Arc<TokenService>,
    pub auth_limiter: Arc<RateLimiter>,
    pub sensitive_limiter: Arc<RateLimiter>,
    pub registry: Arc<SessionRegistry>,
    pub directory: Arc<dyn ConversationDirectory>,
    pub fanout: Arc<FanoutAdapter>,
    /// Unique identifier for this gateway process (fan-out origin tag).
    pub instance_id: String,
}

impl AppContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        tokens: Arc<TokenService>,
        auth_limiter: Arc<RateLimiter>,
        sensitive_limiter: Arc<RateLimiter>,
        registry: Arc<SessionRegistry>,
        directory: Arc<dyn ConversationDirectory>,
        fanout: Arc<FanoutAdapter>,
        instance_id: String,
    ) -> Self {
        Self {
            config,
            tokens,
            auth_limiter,
            sensitive_limiter,
            registry,
            directory,
            fanout,
            instance_id,
        }
    }

    /// Delivers to local room members first, then hands the event to the
    /// fan-out adapter for sockets on other processes.
    pub async fn broadcast_to_room(&self, conversation_id: &str, event: ServerEvent) {
        self.registry
            .broadcast_room_local(conversation_id, &event)
            .await;
        let scope = FanoutScope::Room {
            conversation_id: conversation_id.to_string(),
        };
        if let Err(e) = self.fanout.publish(scope, event).await {
            tracing::warn!(error = %e, conversation_id, "Fan-out publish failed");
        }
    }

    pub async fn broadcast_to_user(&self, user_id: Uuid, event: ServerEvent) {
        self.registry.broadcast_user_local(user_id, &event).await;
        if let Err(e) = self.fanout.publish(FanoutScope::User { user_id }, event).await {
            tracing::warn!(error = %e, %user_id, "Fan-out publish failed");
        }
    }

    /// Fleet-wide broadcast (presence changes): any UI may display any
    /// user's global status.
    pub async fn broadcast_global(&self, event: ServerEvent) {
        self.registry.broadcast_global_local(&event).await;
        if let Err(e) = self.fanout.publish(FanoutScope::Global, event).await {
            tracing::warn!(error = %e, "Fan-out publish failed");
        }
    }
}
