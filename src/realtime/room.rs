use std::fmt;

/// A multicast group of connections.
///
/// Rendered as `conversation_{id}` on the wire and in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomId {
    Conversation(i64),
}

impl RoomId {
    pub fn conversation(conversation_id: i64) -> Self {
        RoomId::Conversation(conversation_id)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomId::Conversation(id) => write!(f, "conversation_{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_conversation_room_name() {
        assert_eq!(RoomId::conversation(7).to_string(), "conversation_7");
    }
}
