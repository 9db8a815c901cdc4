use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fleet-wide user status, derived from live connection counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

/// A message relayed to a conversation. Durable persistence is the message
/// store's concern; this is the wire shape only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientEvent {
    #[serde(rename = "connect", rename_all = "camelCase")]
    Connect { access_token: String },

    #[serde(rename = "join:conversation", rename_all = "camelCase")]
    JoinConversation { conversation_id: String },

    #[serde(rename = "leave:conversation", rename_all = "camelCase")]
    LeaveConversation { conversation_id: String },

    #[serde(rename = "message:send", rename_all = "camelCase")]
    SendMessage {
        conversation_id: String,
        content: String,
        #[serde(default)]
        reply_to: Option<String>,
        #[serde(default)]
        attachments: Vec<String>,
    },

    #[serde(rename = "typing:start", rename_all = "camelCase")]
    TypingStart { conversation_id: String },

    #[serde(rename = "typing:stop", rename_all = "camelCase")]
    TypingStop { conversation_id: String },

    #[serde(rename = "presence:update")]
    PresenceUpdate { status: PresenceStatus },

    #[serde(rename = "reaction:add", rename_all = "camelCase")]
    ReactionAdd { message_id: String, emoji: String },

    #[serde(rename = "reaction:remove", rename_all = "camelCase")]
    ReactionRemove { message_id: String, emoji: String },

    #[serde(rename = "conversation:read", rename_all = "camelCase")]
    ConversationRead {
        conversation_id: String,
        #[serde(default)]
        last_read_message_id: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerEvent {
    #[serde(rename = "connect:success", rename_all = "camelCase")]
    ConnectSuccess {
        user_id: Uuid,
        connection_id: Uuid,
    },

    #[serde(rename = "message:new")]
    MessageNew(MessagePayload),

    #[serde(rename = "typing:user", rename_all = "camelCase")]
    TypingUser {
        conversation_id: String,
        user_id: Uuid,
        user_name: String,
        is_typing: bool,
    },

    #[serde(rename = "presence:user", rename_all = "camelCase")]
    PresenceUser {
        user_id: Uuid,
        status: PresenceStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seen: Option<DateTime<Utc>>,
    },

    /// Room-scoped signal that a user's presence within the conversation
    /// began or ended (join/leave/disconnect).
    #[serde(rename = "conversation:presence", rename_all = "camelCase")]
    ConversationPresence {
        conversation_id: String,
        user_id: Uuid,
        present: bool,
    },

    #[serde(rename = "reaction:update", rename_all = "camelCase")]
    ReactionUpdate {
        message_id: String,
        user_id: Uuid,
        emoji: String,
        action: ReactionAction,
    },

    #[serde(rename = "conversation:read", rename_all = "camelCase")]
    ConversationRead {
        conversation_id: String,
        user_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_read_message_id: Option<String>,
    },

    #[serde(rename = "error")]
    Error { code: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionAction {
    Add,
    Remove,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_carry_wire_names() {
        let bytes = rmp_serde::to_vec_named(&ClientEvent::TypingStart {
            conversation_id: "r1".to_string(),
        })
        .unwrap();
        let as_json: serde_json::Value = rmp_serde::from_slice(&bytes).unwrap();
        assert!(as_json.get("typing:start").is_some());
    }

    #[test]
    fn server_event_roundtrip() {
        let event = ServerEvent::TypingUser {
            conversation_id: "r1".to_string(),
            user_id: Uuid::new_v4(),
            user_name: "ada".to_string(),
            is_typing: true,
        };
        let bytes = rmp_serde::to_vec_named(&event).unwrap();
        match rmp_serde::from_slice::<ServerEvent>(&bytes).unwrap() {
            ServerEvent::TypingUser { is_typing, .. } => assert!(is_typing),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
