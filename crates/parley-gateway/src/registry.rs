use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use parley_types::events::ServerEvent;

pub type ConnId = Uuid;

/// A room groups the channels of every participant of one conversation, so
/// room ids are conversation ids.
pub type RoomId = Uuid;

/// Maps live channels to authenticated users and room memberships.
///
/// Owned by the process lifecycle and handed to every handler explicitly —
/// never a module-level singleton. Holds no persisted state; everything here
/// is torn down with the connection.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    /// Per-connection send half: conn_id -> sender
    conns: RwLock<HashMap<ConnId, mpsc::UnboundedSender<ServerEvent>>>,

    /// All live connections of a user (multi-device): user_id -> conn ids
    user_conns: RwLock<HashMap<Uuid, HashSet<ConnId>>>,

    /// Room membership: room_id -> conn ids
    rooms: RwLock<HashMap<RoomId, HashSet<ConnId>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                conns: RwLock::new(HashMap::new()),
                user_conns: RwLock::new(HashMap::new()),
                rooms: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Bind a new channel to a user. Returns (conn_id, receiver).
    pub async fn register(&self, user_id: Uuid) -> (ConnId, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        self.inner.conns.write().await.insert(conn_id, tx);
        self.inner
            .user_conns
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id);

        (conn_id, rx)
    }

    /// Tear down a channel: removed from every room and from the registry.
    pub async fn unregister(&self, user_id: Uuid, conn_id: ConnId) {
        self.inner.conns.write().await.remove(&conn_id);

        let mut user_conns = self.inner.user_conns.write().await;
        if let Some(conns) = user_conns.get_mut(&user_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                user_conns.remove(&user_id);
            }
        }
        drop(user_conns);

        let mut rooms = self.inner.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&conn_id);
            !members.is_empty()
        });
    }

    pub async fn join(&self, conn_id: ConnId, room: RoomId) {
        self.inner
            .rooms
            .write()
            .await
            .entry(room)
            .or_default()
            .insert(conn_id);
    }

    pub async fn leave(&self, conn_id: ConnId, room: RoomId) {
        let mut rooms = self.inner.rooms.write().await;
        if let Some(members) = rooms.get_mut(&room) {
            members.remove(&conn_id);
            if members.is_empty() {
                rooms.remove(&room);
            }
        }
    }

    /// All live channels of a user, in no particular order.
    pub async fn channels_for_user(&self, user_id: Uuid) -> Vec<ConnId> {
        self.inner
            .user_conns
            .read()
            .await
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Send to one channel. A closed or unknown channel is ignored.
    pub async fn send_to_conn(&self, conn_id: ConnId, event: ServerEvent) {
        let conns = self.inner.conns.read().await;
        if let Some(tx) = conns.get(&conn_id) {
            let _ = tx.send(event);
        }
    }

    /// Send to every live channel of a user.
    pub async fn send_to_user(&self, user_id: Uuid, event: ServerEvent) {
        let targets = self.channels_for_user(user_id).await;
        let conns = self.inner.conns.read().await;
        for conn_id in targets {
            if let Some(tx) = conns.get(&conn_id) {
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Broadcast to every channel currently in the room.
    pub async fn broadcast_room(&self, room: RoomId, event: ServerEvent) {
        let members: Vec<ConnId> = {
            let rooms = self.inner.rooms.read().await;
            match rooms.get(&room) {
                Some(members) => members.iter().copied().collect(),
                None => return,
            }
        };

        let conns = self.inner.conns.read().await;
        for conn_id in members {
            if let Some(tx) = conns.get(&conn_id) {
                let _ = tx.send(event.clone());
            }
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::events::{EventKind, ServerEvent};

    fn probe() -> ServerEvent {
        ServerEvent::failure(EventKind::GetContacts, "probe")
    }

    #[tokio::test]
    async fn room_broadcast_reaches_joined_channels_only() {
        let registry = Registry::new();
        let room = Uuid::new_v4();

        let (conn_a, mut rx_a) = registry.register(Uuid::new_v4()).await;
        let (_conn_b, mut rx_b) = registry.register(Uuid::new_v4()).await;

        registry.join(conn_a, room).await;
        registry.broadcast_room(room, probe()).await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_to_user_fans_out_to_every_device() {
        let registry = Registry::new();
        let user = Uuid::new_v4();

        let (_phone, mut rx_phone) = registry.register(user).await;
        let (_laptop, mut rx_laptop) = registry.register(user).await;

        registry.send_to_user(user, probe()).await;

        assert!(rx_phone.try_recv().is_ok());
        assert!(rx_laptop.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unregister_removes_channel_from_rooms_and_user_set() {
        let registry = Registry::new();
        let user = Uuid::new_v4();
        let room = Uuid::new_v4();

        let (conn, mut rx) = registry.register(user).await;
        registry.join(conn, room).await;
        registry.unregister(user, conn).await;

        registry.broadcast_room(room, probe()).await;
        registry.send_to_user(user, probe()).await;
        registry.send_to_conn(conn, probe()).await;

        assert!(rx.try_recv().is_err());
        assert!(registry.channels_for_user(user).await.is_empty());
    }

    #[tokio::test]
    async fn leave_stops_room_delivery_for_that_channel() {
        let registry = Registry::new();
        let room = Uuid::new_v4();

        let (conn, mut rx) = registry.register(Uuid::new_v4()).await;
        registry.join(conn, room).await;
        registry.leave(conn, room).await;

        registry.broadcast_room(room, probe()).await;
        assert!(rx.try_recv().is_err());
    }
}
