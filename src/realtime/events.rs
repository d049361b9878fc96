//! JSON events exchanged over a realtime connection.
//!
//! Every frame is an envelope `{"type": "<event>", "payload": <value>}`.

use std::sync::Arc;

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::models::MessageWithSender;

/// Numeric id that clients may send either as a number or as a numeric string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityId(pub i64);

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(i64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(EntityId(n)),
            Repr::Text(s) => s.trim().parse().map(EntityId).map_err(de::Error::custom),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub conversation_id: EntityId,
    pub user_id: EntityId,
    #[serde(default)]
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadPayload {
    pub conversation_id: EntityId,
    pub user_id: EntityId,
}

/// Events a client may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinConversation(EntityId),
    LeaveConversation(EntityId),
    /// Relayed to the room as `new_message` without being stored.
    SendMessage(Value),
    Typing(TypingPayload),
    ReadMessages(ReadPayload),
    UserOnline(EntityId),
    Ping,
}

impl ClientEvent {
    pub fn parse(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

/// Conversation targeted by a relayed `send_message` payload.
pub fn relay_target(payload: &Value) -> Option<i64> {
    match payload.get("conversationId")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum NewMessage {
    Stored(Box<MessageWithSender>),
    Relayed(Value),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub user_id: i64,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadNotice {
    pub user_id: i64,
    pub conversation_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotice {
    pub user_id: i64,
    pub status: Presence,
}

/// Events the server pushes to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    NewMessage(NewMessage),
    UserTyping(TypingNotice),
    MessagesRead(ReadNotice),
    UserStatus(StatusNotice),
    Pong,
}

impl ServerEvent {
    pub fn stored_message(message: MessageWithSender) -> Self {
        ServerEvent::NewMessage(NewMessage::Stored(Box::new(message)))
    }

    pub fn messages_read(conversation_id: i64, user_id: i64) -> Self {
        ServerEvent::MessagesRead(ReadNotice {
            user_id,
            conversation_id,
        })
    }

    pub fn user_status(user_id: i64, status: Presence) -> Self {
        ServerEvent::UserStatus(StatusNotice { user_id, status })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::NewMessage(_) => "new_message",
            ServerEvent::UserTyping(_) => "user_typing",
            ServerEvent::MessagesRead(_) => "messages_read",
            ServerEvent::UserStatus(_) => "user_status",
            ServerEvent::Pong => "pong",
        }
    }

    /// Encode once so a broadcast can share the frame across connections.
    pub fn to_frame(&self) -> Result<Arc<str>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_room_membership_events() {
        assert_eq!(
            ClientEvent::parse(r#"{"type":"join_conversation","payload":7}"#).unwrap(),
            ClientEvent::JoinConversation(EntityId(7))
        );
        assert_eq!(
            ClientEvent::parse(r#"{"type":"leave_conversation","payload":"12"}"#).unwrap(),
            ClientEvent::LeaveConversation(EntityId(12))
        );
    }

    #[test]
    fn parses_typing_and_read_payloads() {
        let typing = ClientEvent::parse(
            r#"{"type":"typing","payload":{"conversationId":3,"userId":"9","isTyping":true}}"#,
        )
        .unwrap();
        assert_eq!(
            typing,
            ClientEvent::Typing(TypingPayload {
                conversation_id: EntityId(3),
                user_id: EntityId(9),
                is_typing: true,
            })
        );

        let read = ClientEvent::parse(
            r#"{"type":"read_messages","payload":{"conversationId":3,"userId":9}}"#,
        )
        .unwrap();
        assert!(matches!(read, ClientEvent::ReadMessages(_)));
    }

    #[test]
    fn ping_needs_no_payload() {
        assert_eq!(ClientEvent::parse(r#"{"type":"ping"}"#).unwrap(), ClientEvent::Ping);
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(ClientEvent::parse("not json").is_err());
        assert!(ClientEvent::parse(r#"{"type":"teleport","payload":1}"#).is_err());
        assert!(ClientEvent::parse(r#"{"type":"join_conversation","payload":"seven"}"#).is_err());
    }

    #[test]
    fn relay_target_reads_numbers_and_strings() {
        assert_eq!(relay_target(&json!({"conversationId": 4, "content": "x"})), Some(4));
        assert_eq!(relay_target(&json!({"conversationId": "5"})), Some(5));
        assert_eq!(relay_target(&json!({"content": "x"})), None);
    }

    #[test]
    fn server_events_use_the_envelope() {
        let frame = ServerEvent::messages_read(7, 2).to_frame().unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({"type": "messages_read", "payload": {"userId": 2, "conversationId": 7}})
        );

        let status: Value = serde_json::from_str(
            &ServerEvent::user_status(2, Presence::Online).to_frame().unwrap(),
        )
        .unwrap();
        assert_eq!(status["payload"]["status"], "online");
        assert_eq!(ServerEvent::Pong.name(), "pong");
    }
}
