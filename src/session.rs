use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::message::{PresenceStatus, ServerEvent};

pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// One accepted connection. Owned exclusively by the accepting process;
/// never shared across the fleet.
struct Seat {
    user_id: Uuid,
    #[allow(dead_code)]
    role: String,
    sender: EventSender,
    rooms: HashSet<String>,
}

struct PresenceRecord {
    status: PresenceStatus,
    last_seen: Option<DateTime<Utc>>,
}

struct TypingTimer {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

type TypingKey = (Uuid, String);

#[derive(Default)]
struct RegistryInner {
    seats: HashMap<Uuid, Seat>,
    /// user id -> live connection ids
    users: HashMap<Uuid, HashSet<Uuid>>,
    /// conversation id -> connection ids joined on this process
    rooms: HashMap<String, HashSet<Uuid>>,
    presence: HashMap<Uuid, PresenceRecord>,
    typing: HashMap<TypingKey, TypingTimer>,
    typing_generation: u64,
}

impl Default for PresenceRecord {
    fn default() -> Self {
        Self {
            status: PresenceStatus::Offline,
            last_seen: None,
        }
    }
}

/// Everything the disconnect handler must broadcast after one atomic
/// cleanup pass.
pub struct DisconnectCleanup {
    pub user_id: Uuid,
    /// Rooms whose typing timer was cancelled (no other connection of this
    /// user remained active there).
    pub typing_stopped: Vec<String>,
    /// Rooms in which this was the user's last connection.
    pub rooms_departed: Vec<String>,
    /// Set when the user's live-connection count reached zero.
    pub went_offline: Option<DateTime<Utc>>,
}

pub struct JoinOutcome {
    /// True when this is the user's first connection joined to the room.
    pub first_in_room: bool,
}

pub struct LeaveOutcome {
    pub was_joined: bool,
    pub typing_cancelled: bool,
    /// True when no other connection of this user remains in the room.
    pub user_left_room: bool,
}

pub struct TypingArmed {
    pub generation: u64,
    /// True on the idle -> typing transition; re-arms while already typing
    /// only reset the timer.
    pub was_idle: bool,
}

/// Process-wide session state: connection seats, room rosters, per-user
/// connection counts, presence, and typing timers. All cross-connection
/// aggregates are mutated through this one synchronized accessor so that a
/// user's concurrent connects/disconnects cannot lose updates.
#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<RegistryInner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an authenticated connection. Returns true when this is the
    /// user's first live connection (the online presence transition).
    pub async fn register_connection(
        &self,
        connection_id: Uuid,
        user_id: Uuid,
        role: &str,
        sender: EventSender,
    ) -> bool {
        let mut inner = self.inner.write().await;
        inner.seats.insert(
            connection_id,
            Seat {
                user_id,
                role: role.to_string(),
                sender,
                rooms: HashSet::new(),
            },
        );

        let conns = inner.users.entry(user_id).or_default();
        conns.insert(connection_id);
        let became_online = conns.len() == 1;

        if became_online {
            inner.presence.insert(
                user_id,
                PresenceRecord {
                    status: PresenceStatus::Online,
                    last_seen: None,
                },
            );
        }

        became_online
    }

    /// Removes a connection and everything it owned in one pass under the
    /// write lock: roster entries, orphaned typing timers, and the offline
    /// transition when this was the user's last connection.
    pub async fn close_connection(&self, connection_id: Uuid) -> Option<DisconnectCleanup> {
        let mut inner = self.inner.write().await;
        let seat = inner.seats.remove(&connection_id)?;
        let user_id = seat.user_id;

        let remaining = match inner.users.get_mut(&user_id) {
            Some(conns) => {
                conns.remove(&connection_id);
                conns.len()
            }
            None => 0,
        };
        let user_still_connected = remaining > 0;
        if !user_still_connected {
            inner.users.remove(&user_id);
        }

        let mut typing_stopped = Vec::new();
        let mut rooms_departed = Vec::new();
        for room in &seat.rooms {
            if let Some(roster) = inner.rooms.get_mut(room) {
                roster.remove(&connection_id);
                if roster.is_empty() {
                    inner.rooms.remove(room);
                }
            }

            if !Self::user_in_room(&inner, user_id, room) {
                rooms_departed.push(room.clone());
                if let Some(timer) = inner.typing.remove(&(user_id, room.clone())) {
                    if let Some(handle) = timer.handle {
                        handle.abort();
                    }
                    typing_stopped.push(room.clone());
                }
            }
        }

        let went_offline = if user_still_connected {
            None
        } else {
            let now = Utc::now();
            inner.presence.insert(
                user_id,
                PresenceRecord {
                    status: PresenceStatus::Offline,
                    last_seen: Some(now),
                },
            );
            Some(now)
        };

        Some(DisconnectCleanup {
            user_id,
            typing_stopped,
            rooms_departed,
            went_offline,
        })
    }

    pub async fn join_room(&self, connection_id: Uuid, room: &str) -> AppResult<JoinOutcome> {
        let mut inner = self.inner.write().await;
        let user_id = {
            let seat = inner
                .seats
                .get_mut(&connection_id)
                .ok_or(AppError::ConnectionNotFound)?;
            seat.rooms.insert(room.to_string());
            seat.user_id
        };
        inner
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(connection_id);

        let seats_in_room = inner
            .users
            .get(&user_id)
            .map(|conns| {
                conns
                    .iter()
                    .filter(|id| {
                        inner
                            .seats
                            .get(*id)
                            .map(|seat| seat.rooms.contains(room))
                            .unwrap_or(false)
                    })
                    .count()
            })
            .unwrap_or(0);

        Ok(JoinOutcome {
            first_in_room: seats_in_room == 1,
        })
    }

    pub async fn leave_room(&self, connection_id: Uuid, room: &str) -> AppResult<LeaveOutcome> {
        let mut inner = self.inner.write().await;
        let (user_id, was_joined) = {
            let seat = inner
                .seats
                .get_mut(&connection_id)
                .ok_or(AppError::ConnectionNotFound)?;
            (seat.user_id, seat.rooms.remove(room))
        };

        if was_joined {
            if let Some(roster) = inner.rooms.get_mut(room) {
                roster.remove(&connection_id);
                if roster.is_empty() {
                    inner.rooms.remove(room);
                }
            }
        }

        let user_left_room = was_joined && !Self::user_in_room(&inner, user_id, room);
        let typing_cancelled = if user_left_room {
            match inner.typing.remove(&(user_id, room.to_string())) {
                Some(timer) => {
                    if let Some(handle) = timer.handle {
                        handle.abort();
                    }
                    true
                }
                None => false,
            }
        } else {
            false
        };

        Ok(LeaveOutcome {
            was_joined,
            typing_cancelled,
            user_left_room,
        })
    }

    pub async fn is_joined(&self, connection_id: Uuid, room: &str) -> bool {
        self.inner
            .read()
            .await
            .seats
            .get(&connection_id)
            .map(|seat| seat.rooms.contains(room))
            .unwrap_or(false)
    }

    /// idle -> typing transition, (re)arming the debounce timer generation.
    pub async fn arm_typing(&self, user_id: Uuid, room: &str) -> TypingArmed {
        let mut inner = self.inner.write().await;
        inner.typing_generation += 1;
        let generation = inner.typing_generation;

        let previous = inner.typing.insert(
            (user_id, room.to_string()),
            TypingTimer {
                generation,
                handle: None,
            },
        );
        let was_idle = match previous {
            Some(timer) => {
                if let Some(handle) = timer.handle {
                    handle.abort();
                }
                false
            }
            None => true,
        };

        TypingArmed {
            generation,
            was_idle,
        }
    }

    /// Attaches the spawned debounce task to its typing entry. If the entry
    /// was re-armed or cancelled in between, the stale task is aborted.
    pub async fn store_typing_handle(
        &self,
        user_id: Uuid,
        room: &str,
        generation: u64,
        handle: JoinHandle<()>,
    ) {
        let mut inner = self.inner.write().await;
        match inner.typing.get_mut(&(user_id, room.to_string())) {
            Some(timer) if timer.generation == generation => timer.handle = Some(handle),
            _ => handle.abort(),
        }
    }

    /// typing -> idle on an explicit stop or a sent message. Returns false
    /// when already idle (repeated stops are no-ops, not re-broadcasts).
    pub async fn stop_typing(&self, user_id: Uuid, room: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.typing.remove(&(user_id, room.to_string())) {
            Some(timer) => {
                if let Some(handle) = timer.handle {
                    handle.abort();
                }
                true
            }
            None => false,
        }
    }

    /// typing -> idle driven by the debounce timer itself. The generation
    /// check drops timers that lost a race with a re-arm or cancellation.
    pub async fn expire_typing(&self, user_id: Uuid, room: &str, generation: u64) -> bool {
        let mut inner = self.inner.write().await;
        let key = (user_id, room.to_string());
        match inner.typing.remove(&key) {
            Some(timer) if timer.generation == generation => true,
            Some(timer) => {
                inner.typing.insert(key, timer);
                false
            }
            None => false,
        }
    }

    /// Explicit presence update (`online`/`away`) from one of the user's
    /// connections. Returns true when the status actually changed. The
    /// offline transition is never set this way; it belongs to
    /// [`close_connection`]'s bookkeeping.
    pub async fn set_presence(&self, user_id: Uuid, status: PresenceStatus) -> bool {
        if status == PresenceStatus::Offline {
            return false;
        }
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&user_id) {
            return false;
        }
        let record = inner.presence.entry(user_id).or_default();
        if record.status == status {
            return false;
        }
        record.status = status;
        true
    }

    pub async fn presence_of(
        &self,
        user_id: Uuid,
    ) -> Option<(PresenceStatus, Option<DateTime<Utc>>)> {
        self.inner
            .read()
            .await
            .presence
            .get(&user_id)
            .map(|record| (record.status, record.last_seen))
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.inner
            .read()
            .await
            .users
            .get(&user_id)
            .map(|conns| conns.len())
            .unwrap_or(0)
    }

    pub async fn broadcast_room_local(&self, room: &str, event: &ServerEvent) {
        let senders: Vec<EventSender> = {
            let inner = self.inner.read().await;
            inner
                .rooms
                .get(room)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| inner.seats.get(id).map(|seat| seat.sender.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };
        for sender in senders {
            let _ = sender.send(event.clone());
        }
    }

    pub async fn broadcast_user_local(&self, user_id: Uuid, event: &ServerEvent) {
        let senders: Vec<EventSender> = {
            let inner = self.inner.read().await;
            inner
                .users
                .get(&user_id)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| inner.seats.get(id).map(|seat| seat.sender.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };
        for sender in senders {
            let _ = sender.send(event.clone());
        }
    }

    pub async fn broadcast_global_local(&self, event: &ServerEvent) {
        let senders: Vec<EventSender> = {
            let inner = self.inner.read().await;
            inner.seats.values().map(|seat| seat.sender.clone()).collect()
        };
        for sender in senders {
            let _ = sender.send(event.clone());
        }
    }

    fn user_in_room(inner: &RegistryInner, user_id: Uuid, room: &str) -> bool {
        inner
            .users
            .get(&user_id)
            .map(|conns| {
                conns.iter().any(|id| {
                    inner
                        .seats
                        .get(id)
                        .map(|seat| seat.rooms.contains(room))
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> EventSender {
        mpsc::unbounded_channel().0
    }

    #[tokio::test]
    async fn offline_fires_only_after_last_connection() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();
        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();

        assert!(registry.register_connection(c1, user, "member", sender()).await);
        assert!(!registry.register_connection(c2, user, "member", sender()).await);
        assert_eq!(registry.connection_count(user).await, 2);

        let cleanup = registry.close_connection(c1).await.unwrap();
        assert!(cleanup.went_offline.is_none());

        let cleanup = registry.close_connection(c2).await.unwrap();
        assert!(cleanup.went_offline.is_some());
        let (status, last_seen) = registry.presence_of(user).await.unwrap();
        assert_eq!(status, PresenceStatus::Offline);
        assert!(last_seen.is_some());
    }

    #[tokio::test]
    async fn typing_stop_is_idempotent() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();

        let armed = registry.arm_typing(user, "r1").await;
        assert!(armed.was_idle);

        let rearmed = registry.arm_typing(user, "r1").await;
        assert!(!rearmed.was_idle);

        assert!(registry.stop_typing(user, "r1").await);
        assert!(!registry.stop_typing(user, "r1").await);
    }

    #[tokio::test]
    async fn stale_typing_generation_does_not_expire() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();

        let first = registry.arm_typing(user, "r1").await;
        let second = registry.arm_typing(user, "r1").await;

        assert!(!registry.expire_typing(user, "r1", first.generation).await);
        assert!(registry.expire_typing(user, "r1", second.generation).await);
    }

    #[tokio::test]
    async fn disconnect_keeps_typing_while_another_connection_remains() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();
        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();

        registry.register_connection(c1, user, "member", sender()).await;
        registry.register_connection(c2, user, "member", sender()).await;
        registry.join_room(c1, "r1").await.unwrap();
        registry.join_room(c2, "r1").await.unwrap();
        registry.arm_typing(user, "r1").await;

        let cleanup = registry.close_connection(c1).await.unwrap();
        assert!(cleanup.typing_stopped.is_empty());
        assert!(cleanup.rooms_departed.is_empty());

        let cleanup = registry.close_connection(c2).await.unwrap();
        assert_eq!(cleanup.typing_stopped, vec!["r1".to_string()]);
        assert_eq!(cleanup.rooms_departed, vec!["r1".to_string()]);
    }

    #[tokio::test]
    async fn presence_updates_change_once_and_never_set_offline() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();
        let c1 = Uuid::new_v4();
        registry.register_connection(c1, user, "member", sender()).await;

        assert!(registry.set_presence(user, PresenceStatus::Away).await);
        assert!(!registry.set_presence(user, PresenceStatus::Away).await);
        assert!(registry.set_presence(user, PresenceStatus::Online).await);
        assert!(!registry.set_presence(user, PresenceStatus::Offline).await);
        let (status, _) = registry.presence_of(user).await.unwrap();
        assert_eq!(status, PresenceStatus::Online);
    }
}
