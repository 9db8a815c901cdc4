use futures_util::StreamExt;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppResult;
use crate::message::ServerEvent;
use crate::metrics;
use crate::session::SessionRegistry;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Addressing for one fan-out broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum FanoutScope {
    Room { conversation_id: String },
    User { user_id: Uuid },
    Global,
}

/// What travels on the shared broker channel. `origin` lets each process
/// skip envelopes it published itself: local recipients were already served
/// before the publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutEnvelope {
    pub origin: String,
    #[serde(flatten)]
    pub scope: FanoutScope,
    pub event: ServerEvent,
}

/// Bridges gateway processes through Redis pub/sub so room, user, and global
/// broadcasts reach sockets held by any process in the fleet.
///
/// If the broker is unreachable at startup (or no REDIS_URL is configured)
/// the adapter fails open into single-process mode: publishes become no-ops
/// and no subscriber is spawned. A single-instance deployment has no
/// cross-process audience to reach, so this is a warning, not a crash.
pub struct FanoutAdapter {
    publisher: Option<redis::aio::ConnectionManager>,
    client: Option<redis::Client>,
    channel: String,
    instance_id: String,
}

impl FanoutAdapter {
    pub async fn connect(config: &Config, instance_id: String) -> Self {
        let channel = config.fanout_channel.clone();

        let url = match &config.redis_url {
            Some(url) => url.clone(),
            None => {
                tracing::warn!(
                    "No REDIS_URL configured; fan-out disabled, running in single-process mode"
                );
                return Self::degraded(channel, instance_id);
            }
        };

        let client = match redis::Client::open(url) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Failed to parse REDIS_URL; fan-out disabled, running in single-process mode"
                );
                return Self::degraded(channel, instance_id);
            }
        };

        match tokio::time::timeout(CONNECT_TIMEOUT, client.get_connection_manager()).await {
            Ok(Ok(publisher)) => {
                tracing::info!(channel = %channel, "Connected to fan-out broker");
                Self {
                    publisher: Some(publisher),
                    client: Some(client),
                    channel,
                    instance_id,
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    error = %e,
                    "Fan-out broker unreachable; running in single-process mode"
                );
                Self::degraded(channel, instance_id)
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = CONNECT_TIMEOUT.as_secs(),
                    "Fan-out broker connection timed out; running in single-process mode"
                );
                Self::degraded(channel, instance_id)
            }
        }
    }

    fn degraded(channel: String, instance_id: String) -> Self {
        Self {
            publisher: None,
            client: None,
            channel,
            instance_id,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.publisher.is_none()
    }

    /// Publishes one envelope to the shared channel. No-op in single-process
    /// mode.
    pub async fn publish(&self, scope: FanoutScope, event: ServerEvent) -> AppResult<()> {
        let Some(publisher) = &self.publisher else {
            return Ok(());
        };

        let envelope = FanoutEnvelope {
            origin: self.instance_id.clone(),
            scope,
            event,
        };
        let payload = serde_json::to_string(&envelope)?;

        let mut conn = publisher.clone();
        let _: () = conn.publish(&self.channel, payload).await?;
        metrics::FANOUT_PUBLISHES_TOTAL.inc();
        Ok(())
    }

    pub async fn ping(&self) -> AppResult<()> {
        let Some(publisher) = &self.publisher else {
            return Ok(());
        };
        let mut conn = publisher.clone();
        let _: () = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    /// Spawns the subscriber loop delivering cross-process envelopes into the
    /// local registry. Reconnects with a fixed delay if the pub/sub stream
    /// drops.
    pub fn spawn_subscriber(self: &Arc<Self>, registry: Arc<SessionRegistry>) {
        let Some(client) = self.client.clone() else {
            return;
        };
        let channel = self.channel.clone();
        let instance_id = self.instance_id.clone();

        tokio::spawn(async move {
            loop {
                let mut pubsub = match client.get_async_pubsub().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to create pub/sub connection, retrying in 5s...");
                        tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                        continue;
                    }
                };

                if let Err(e) = pubsub.subscribe(channel.as_str()).await {
                    tracing::error!(
                        error = %e,
                        channel = %channel,
                        "Failed to subscribe to fan-out channel, retrying in 5s..."
                    );
                    tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                    continue;
                }

                tracing::info!(channel = %channel, "Subscribed to fan-out channel");

                let mut stream = pubsub.on_message();
                while let Some(msg) = stream.next().await {
                    let payload: String = match msg.get_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to read fan-out payload");
                            continue;
                        }
                    };

                    let envelope: FanoutEnvelope = match serde_json::from_str(&payload) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to parse fan-out envelope");
                            continue;
                        }
                    };

                    if envelope.origin == instance_id {
                        continue;
                    }

                    match envelope.scope {
                        FanoutScope::Room { conversation_id } => {
                            registry
                                .broadcast_room_local(&conversation_id, &envelope.event)
                                .await;
                        }
                        FanoutScope::User { user_id } => {
                            registry.broadcast_user_local(user_id, &envelope.event).await;
                        }
                        FanoutScope::Global => {
                            registry.broadcast_global_local(&envelope.event).await;
                        }
                    }
                }

                tracing::warn!("Fan-out pub/sub stream ended, reconnecting...");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });
    }
}
