use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::{events::ServerEvent, room::RoomId};

pub type ConnectionId = Uuid;

/// A frame queued for one connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(Arc<str>),
    Ping,
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("realtime hub is not running")]
    NotRunning,
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

struct ConnectionEntry {
    sender: mpsc::Sender<Outbound>,
    rooms: HashSet<RoomId>,
    /// Set once the client announces itself with `user_online`.
    user_id: Option<i64>,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

impl Registry {
    fn drop_membership(&mut self, connection_id: ConnectionId, room: RoomId) {
        if let Some(members) = self.rooms.get_mut(&room) {
            members.remove(&connection_id);
            if members.is_empty() {
                self.rooms.remove(&room);
            }
        }
    }
}

/// Registry of live connections and the rooms they joined.
///
/// Delivery is best effort: each connection has a bounded queue and a frame
/// that does not fit is dropped for that connection only. Nothing is stored
/// for connections that join later.
pub struct RoomHub {
    registry: RwLock<Registry>,
    running: AtomicBool,
    buffer: usize,
}

impl RoomHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            running: AtomicBool::new(false),
            buffer: buffer.max(1),
        }
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Realtime hub started");
    }

    /// Stop accepting connections and drop every registered one. Writer tasks
    /// see their queue close and hang up.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut registry = self.registry.write().await;
        let dropped = registry.connections.len();
        registry.connections.clear();
        registry.rooms.clear();
        tracing::info!("Realtime hub stopped, dropped {} connections", dropped);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queue sized for one connection.
    pub fn channel(&self) -> (mpsc::Sender<Outbound>, mpsc::Receiver<Outbound>) {
        mpsc::channel(self.buffer)
    }

    pub async fn register(
        &self,
        connection_id: ConnectionId,
        sender: mpsc::Sender<Outbound>,
    ) -> Result<(), BroadcastError> {
        self.ensure_running()?;
        let mut registry = self.registry.write().await;
        registry.connections.insert(
            connection_id,
            ConnectionEntry {
                sender,
                rooms: HashSet::new(),
                user_id: None,
            },
        );
        tracing::info!("Client connected: {}", connection_id);
        Ok(())
    }

    /// Forget a connection and all its room memberships. Returns the user the
    /// connection announced if no other live connection is bound to them.
    pub async fn unregister(&self, connection_id: ConnectionId) -> Option<i64> {
        let mut registry = self.registry.write().await;
        let entry = registry.connections.remove(&connection_id)?;
        for room in &entry.rooms {
            registry.drop_membership(connection_id, *room);
        }
        tracing::info!("Client disconnected: {}", connection_id);

        let user_id = entry.user_id?;
        let still_online = registry
            .connections
            .values()
            .any(|other| other.user_id == Some(user_id));
        (!still_online).then_some(user_id)
    }

    /// Add a connection to a room. Joining twice is a no-op.
    pub async fn join(&self, connection_id: ConnectionId, room: RoomId) -> Result<(), BroadcastError> {
        let mut registry = self.registry.write().await;
        let entry = registry
            .connections
            .get_mut(&connection_id)
            .ok_or(BroadcastError::UnknownConnection(connection_id))?;
        entry.rooms.insert(room);
        registry.rooms.entry(room).or_default().insert(connection_id);
        tracing::debug!("Client {} joined {}", connection_id, room);
        Ok(())
    }

    pub async fn leave(&self, connection_id: ConnectionId, room: RoomId) -> Result<(), BroadcastError> {
        let mut registry = self.registry.write().await;
        let entry = registry
            .connections
            .get_mut(&connection_id)
            .ok_or(BroadcastError::UnknownConnection(connection_id))?;
        entry.rooms.remove(&room);
        registry.drop_membership(connection_id, room);
        tracing::debug!("Client {} left {}", connection_id, room);
        Ok(())
    }

    pub async fn bind_user(&self, connection_id: ConnectionId, user_id: i64) -> Result<(), BroadcastError> {
        let mut registry = self.registry.write().await;
        let entry = registry
            .connections
            .get_mut(&connection_id)
            .ok_or(BroadcastError::UnknownConnection(connection_id))?;
        entry.user_id = Some(user_id);
        Ok(())
    }

    /// Deliver to every connection currently in `room`. Returns how many
    /// connections accepted the frame.
    pub async fn broadcast_to_room(&self, room: RoomId, event: &ServerEvent) -> Result<usize, BroadcastError> {
        self.fan_out(room, None, event).await
    }

    /// Like [`broadcast_to_room`](Self::broadcast_to_room) but skips `exclude`.
    pub async fn broadcast_to_room_except(
        &self,
        room: RoomId,
        exclude: ConnectionId,
        event: &ServerEvent,
    ) -> Result<usize, BroadcastError> {
        self.fan_out(room, Some(exclude), event).await
    }

    /// Deliver to every connected client regardless of rooms.
    pub async fn notify_all(&self, event: &ServerEvent) -> Result<usize, BroadcastError> {
        self.ensure_running()?;
        let frame = Outbound::Text(event.to_frame()?);
        let registry = self.registry.read().await;

        let delivered = registry
            .connections
            .iter()
            .filter(|(id, entry)| deliver(**id, &entry.sender, frame.clone()))
            .count();

        tracing::debug!("{} delivered to {} clients", event.name(), delivered);
        Ok(delivered)
    }

    pub async fn send_to_connection(
        &self,
        connection_id: ConnectionId,
        event: &ServerEvent,
    ) -> Result<bool, BroadcastError> {
        self.ensure_running()?;
        let frame = Outbound::Text(event.to_frame()?);
        let registry = self.registry.read().await;
        let entry = registry
            .connections
            .get(&connection_id)
            .ok_or(BroadcastError::UnknownConnection(connection_id))?;
        Ok(deliver(connection_id, &entry.sender, frame))
    }

    /// Ask every writer to send a transport-level ping.
    pub async fn ping_all(&self) -> usize {
        let registry = self.registry.read().await;
        registry
            .connections
            .iter()
            .filter(|(id, entry)| deliver(**id, &entry.sender, Outbound::Ping))
            .count()
    }

    pub async fn room_members(&self, room: RoomId) -> Vec<ConnectionId> {
        let registry = self.registry.read().await;
        registry
            .rooms
            .get(&room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.connections.len()
    }

    pub async fn room_count(&self) -> usize {
        self.registry.read().await.rooms.len()
    }

    /// Heartbeat loop. Returns once the hub is stopped.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
        ticker.tick().await;
        while self.is_running() {
            ticker.tick().await;
            if !self.is_running() {
                break;
            }
            let pinged = self.ping_all().await;
            tracing::debug!(
                "Heartbeat: {} connections, {} rooms",
                pinged,
                self.room_count().await
            );
        }
    }

    fn ensure_running(&self) -> Result<(), BroadcastError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(BroadcastError::NotRunning)
        }
    }

    async fn fan_out(
        &self,
        room: RoomId,
        exclude: Option<ConnectionId>,
        event: &ServerEvent,
    ) -> Result<usize, BroadcastError> {
        self.ensure_running()?;
        let frame = Outbound::Text(event.to_frame()?);
        let registry = self.registry.read().await;

        let Some(members) = registry.rooms.get(&room) else {
            tracing::debug!("{} to {}: room is empty", event.name(), room);
            return Ok(0);
        };

        let delivered = members
            .iter()
            .filter(|id| Some(**id) != exclude)
            .filter_map(|id| registry.connections.get(id).map(|entry| (*id, entry)))
            .filter(|(id, entry)| deliver(*id, &entry.sender, frame.clone()))
            .count();

        tracing::debug!("{} delivered to {} clients in {}", event.name(), delivered, room);
        Ok(delivered)
    }
}

fn deliver(connection_id: ConnectionId, sender: &mpsc::Sender<Outbound>, frame: Outbound) -> bool {
    match sender.try_send(frame) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!("Dropping frame for {}: queue full", connection_id);
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!("Dropping frame for {}: connection closing", connection_id);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::realtime::events::Presence;

    fn running_hub() -> RoomHub {
        let hub = RoomHub::new(8);
        hub.start();
        hub
    }

    async fn connect(hub: &RoomHub) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let id = Uuid::new_v4();
        let (tx, rx) = hub.channel();
        hub.register(id, tx).await.unwrap();
        (id, rx)
    }

    fn next_event(rx: &mut mpsc::Receiver<Outbound>) -> Option<Value> {
        match rx.try_recv().ok()? {
            Outbound::Text(text) => serde_json::from_str(&text).ok(),
            Outbound::Ping => None,
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_only_room_members() {
        let hub = running_hub();
        let (a, mut rx_a) = connect(&hub).await;
        let (_b, mut rx_b) = connect(&hub).await;
        let room = RoomId::conversation(7);
        hub.join(a, room).await.unwrap();

        let delivered = hub
            .broadcast_to_room(room, &ServerEvent::messages_read(7, 1))
            .await
            .unwrap();

        assert_eq!(delivered, 1);
        assert_eq!(next_event(&mut rx_a).unwrap()["type"], "messages_read");
        assert!(next_event(&mut rx_b).is_none());
    }

    #[tokio::test]
    async fn late_joiners_get_nothing_retroactively() {
        let hub = running_hub();
        let (a, mut rx_a) = connect(&hub).await;
        let room = RoomId::conversation(3);

        hub.broadcast_to_room(room, &ServerEvent::messages_read(3, 1))
            .await
            .unwrap();
        hub.join(a, room).await.unwrap();

        assert!(next_event(&mut rx_a).is_none());
    }

    #[tokio::test]
    async fn except_skips_the_sender() {
        let hub = running_hub();
        let (a, mut rx_a) = connect(&hub).await;
        let (b, mut rx_b) = connect(&hub).await;
        let room = RoomId::conversation(1);
        hub.join(a, room).await.unwrap();
        hub.join(b, room).await.unwrap();

        let delivered = hub
            .broadcast_to_room_except(room, a, &ServerEvent::Pong)
            .await
            .unwrap();

        assert_eq!(delivered, 1);
        assert!(next_event(&mut rx_a).is_none());
        assert_eq!(next_event(&mut rx_b).unwrap()["type"], "pong");
    }

    #[tokio::test]
    async fn leave_and_unregister_drop_membership() {
        let hub = running_hub();
        let (a, _rx_a) = connect(&hub).await;
        let (b, _rx_b) = connect(&hub).await;
        let room = RoomId::conversation(9);
        let other = RoomId::conversation(10);

        hub.join(a, room).await.unwrap();
        hub.join(a, room).await.unwrap();
        hub.join(b, room).await.unwrap();
        hub.join(b, other).await.unwrap();
        assert_eq!(hub.room_members(room).await.len(), 2);

        hub.leave(a, room).await.unwrap();
        assert_eq!(hub.room_members(room).await, vec![b]);

        hub.bind_user(b, 42).await.unwrap();
        assert_eq!(hub.unregister(b).await, Some(42));
        assert!(hub.room_members(room).await.is_empty());
        assert_eq!(hub.room_count().await, 0);
        assert_eq!(hub.connection_count().await, 1);
    }

    #[tokio::test]
    async fn user_goes_offline_with_their_last_connection() {
        let hub = running_hub();
        let (phone, _rx_phone) = connect(&hub).await;
        let (laptop, _rx_laptop) = connect(&hub).await;
        hub.bind_user(phone, 5).await.unwrap();
        hub.bind_user(laptop, 5).await.unwrap();

        assert_eq!(hub.unregister(phone).await, None);
        assert_eq!(hub.unregister(laptop).await, Some(5));
    }

    #[tokio::test]
    async fn notify_all_ignores_rooms() {
        let hub = running_hub();
        let (_a, mut rx_a) = connect(&hub).await;
        let (_b, mut rx_b) = connect(&hub).await;

        let delivered = hub
            .notify_all(&ServerEvent::user_status(5, Presence::Online))
            .await
            .unwrap();

        assert_eq!(delivered, 2);
        assert_eq!(next_event(&mut rx_a).unwrap()["payload"]["userId"], 5);
        assert_eq!(next_event(&mut rx_b).unwrap()["type"], "user_status");
    }

    #[tokio::test]
    async fn broadcasting_before_start_is_refused() {
        let hub = RoomHub::new(8);
        let result = hub
            .broadcast_to_room(RoomId::conversation(1), &ServerEvent::Pong)
            .await;
        assert!(matches!(result, Err(BroadcastError::NotRunning)));

        let (tx, _rx) = hub.channel();
        assert!(matches!(
            hub.register(Uuid::new_v4(), tx).await,
            Err(BroadcastError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn stop_closes_every_queue() {
        let hub = running_hub();
        let (_a, mut rx_a) = connect(&hub).await;

        hub.stop().await;

        assert!(rx_a.recv().await.is_none());
        assert_eq!(hub.connection_count().await, 0);
        assert!(!hub.is_running());
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let hub = RoomHub::new(1);
        hub.start();
        let (a, mut rx_a) = connect(&hub).await;
        let room = RoomId::conversation(2);
        hub.join(a, room).await.unwrap();

        assert_eq!(hub.broadcast_to_room(room, &ServerEvent::Pong).await.unwrap(), 1);
        assert_eq!(hub.broadcast_to_room(room, &ServerEvent::Pong).await.unwrap(), 0);

        assert!(next_event(&mut rx_a).is_some());
        assert!(next_event(&mut rx_a).is_none());
    }

    #[tokio::test]
    async fn unknown_connections_are_reported() {
        let hub = running_hub();
        let ghost = Uuid::new_v4();
        assert!(matches!(
            hub.join(ghost, RoomId::conversation(1)).await,
            Err(BroadcastError::UnknownConnection(id)) if id == ghost
        ));
        assert_eq!(hub.unregister(ghost).await, None);
    }

    #[tokio::test]
    async fn ping_all_queues_transport_pings() {
        let hub = running_hub();
        let (_a, mut rx_a) = connect(&hub).await;

        assert_eq!(hub.ping_all().await, 1);
        assert_eq!(rx_a.recv().await, Some(Outbound::Ping));
    }
}
