//! In-process realtime delivery: connection registry, rooms and wire events.

pub mod events;
pub mod hub;
pub mod room;

pub use events::{ClientEvent, NewMessage, Presence, ServerEvent};
pub use hub::{BroadcastError, ConnectionId, Outbound, RoomHub};
pub use room::RoomId;
