use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::{
    error::{AppError, AppResult},
    models::{ConversationHandle, ConversationSummary, MessageWithSender},
    realtime::{BroadcastError, RoomHub, RoomId, ServerEvent},
};

use super::conversations::ConversationRepository;

/// Persists chat writes, then fans them out to the conversation's room.
///
/// The write and the broadcast are not linked: a stored message stays stored
/// even if nobody is listening or the broadcast fails.
pub struct ChatService {
    repo: ConversationRepository,
    hub: Arc<RoomHub>,
}

impl ChatService {
    pub fn new(db: SqlitePool, hub: Arc<RoomHub>) -> Self {
        Self {
            repo: ConversationRepository::new(db),
            hub,
        }
    }

    pub async fn list_conversations(&self, user_id: i64) -> AppResult<Vec<ConversationSummary>> {
        self.repo.list_conversations(user_id).await
    }

    pub async fn get_messages(
        &self,
        conversation_id: i64,
        page: i64,
        page_size: i64,
    ) -> AppResult<Vec<MessageWithSender>> {
        self.repo
            .get_messages(conversation_id, page, page_size)
            .await
    }

    pub async fn find_or_create_conversation(
        &self,
        user_id: i64,
        participant_id: i64,
    ) -> AppResult<ConversationHandle> {
        self.repo
            .find_or_create_conversation(user_id, participant_id)
            .await
    }

    /// Store a message from a participant and push it to everyone in the room.
    pub async fn send_message(
        &self,
        conversation_id: i64,
        sender_id: i64,
        content: &str,
    ) -> AppResult<MessageWithSender> {
        if content.trim().is_empty() {
            return Err(AppError::Validation("Message content is required".to_string()));
        }
        self.ensure_participant(conversation_id, sender_id).await?;

        let message = self
            .repo
            .append_message(conversation_id, sender_id, content)
            .await?;

        self.publish(
            RoomId::conversation(conversation_id),
            ServerEvent::stored_message(message.clone()),
        )
        .await;

        Ok(message)
    }

    /// Advance the user's read cursor and tell the room.
    pub async fn mark_read(&self, conversation_id: i64, user_id: i64) -> AppResult<DateTime<Utc>> {
        self.ensure_participant(conversation_id, user_id).await?;

        let read_at = self.repo.mark_read(conversation_id, user_id).await?;

        self.publish(
            RoomId::conversation(conversation_id),
            ServerEvent::messages_read(conversation_id, user_id),
        )
        .await;

        Ok(read_at)
    }

    async fn ensure_participant(&self, conversation_id: i64, user_id: i64) -> AppResult<()> {
        if !self.repo.conversation_exists(conversation_id).await? {
            return Err(AppError::ConversationNotFound);
        }
        if !self.repo.is_participant(conversation_id, user_id).await? {
            return Err(AppError::NotParticipant);
        }
        Ok(())
    }

    async fn publish(&self, room: RoomId, event: ServerEvent) {
        match self.hub.broadcast_to_room(room, &event).await {
            Ok(delivered) => {
                tracing::debug!("{} for {} reached {} clients", event.name(), room, delivered)
            }
            Err(BroadcastError::NotRunning) => {
                tracing::error!("{} for {} dropped: realtime hub is not running", event.name(), room)
            }
            Err(e) => tracing::warn!("{} for {} failed: {}", event.name(), room, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;
    use crate::{
        realtime::Outbound,
        storage::db::{connect_in_memory, seed_user},
    };

    struct Fixture {
        chat: ChatService,
        hub: Arc<RoomHub>,
        alice: i64,
        bob: i64,
        outsider: i64,
        conversation_id: i64,
    }

    async fn fixture() -> Fixture {
        let pool = connect_in_memory().await.unwrap();
        let alice = seed_user(&pool, "Alice", "Anders").await;
        let bob = seed_user(&pool, "Bob", "Brown").await;
        let outsider = seed_user(&pool, "Mal", "Lory").await;

        let hub = Arc::new(RoomHub::new(16));
        hub.start();

        let chat = ChatService::new(pool, hub.clone());
        let conversation_id = chat
            .find_or_create_conversation(alice, bob)
            .await
            .unwrap()
            .conversation_id;

        Fixture {
            chat,
            hub,
            alice,
            bob,
            outsider,
            conversation_id,
        }
    }

    async fn joined(hub: &RoomHub, conversation_id: i64) -> mpsc::Receiver<Outbound> {
        let id = Uuid::new_v4();
        let (tx, rx) = hub.channel();
        hub.register(id, tx).await.unwrap();
        hub.join(id, RoomId::conversation(conversation_id))
            .await
            .unwrap();
        rx
    }

    fn next_event(rx: &mut mpsc::Receiver<Outbound>) -> Option<Value> {
        match rx.try_recv().ok()? {
            Outbound::Text(text) => serde_json::from_str(&text).ok(),
            Outbound::Ping => None,
        }
    }

    #[tokio::test]
    async fn sent_message_is_stored_then_broadcast() {
        let f = fixture().await;
        let mut rx = joined(&f.hub, f.conversation_id).await;

        let message = f
            .chat
            .send_message(f.conversation_id, f.alice, "hi")
            .await
            .unwrap();

        let event = next_event(&mut rx).unwrap();
        assert_eq!(event["type"], "new_message");
        assert_eq!(event["payload"]["content"], "hi");
        assert_eq!(event["payload"]["id"], message.message.id);
        assert_eq!(event["payload"]["sender"]["firstName"], "Alice");

        let history = f
            .chat
            .get_messages(f.conversation_id, 1, 50)
            .await
            .unwrap();
        assert_eq!(history.last(), Some(&message));
    }

    #[tokio::test]
    async fn failed_write_broadcasts_nothing() {
        let f = fixture().await;
        let mut rx = joined(&f.hub, f.conversation_id).await;

        let empty = f.chat.send_message(f.conversation_id, f.alice, "   ").await;
        assert!(matches!(empty, Err(AppError::Validation(_))));

        let missing = f.chat.send_message(9_999, f.alice, "hello").await;
        assert!(matches!(missing, Err(AppError::ConversationNotFound)));

        assert!(next_event(&mut rx).is_none());
    }

    #[tokio::test]
    async fn outsiders_cannot_post_or_mark_read() {
        let f = fixture().await;

        assert!(matches!(
            f.chat.send_message(f.conversation_id, f.outsider, "hi").await,
            Err(AppError::NotParticipant)
        ));
        assert!(matches!(
            f.chat.mark_read(f.conversation_id, f.outsider).await,
            Err(AppError::NotParticipant)
        ));
    }

    #[tokio::test]
    async fn stored_message_survives_an_empty_room() {
        let f = fixture().await;

        let message = f
            .chat
            .send_message(f.conversation_id, f.bob, "anyone there?")
            .await
            .unwrap();

        let history = f
            .chat
            .get_messages(f.conversation_id, 1, 50)
            .await
            .unwrap();
        assert_eq!(history, vec![message]);
    }

    #[tokio::test]
    async fn stopped_hub_does_not_fail_the_write() {
        let f = fixture().await;
        f.hub.stop().await;

        let message = f
            .chat
            .send_message(f.conversation_id, f.alice, "still saved")
            .await
            .unwrap();
        assert_eq!(message.message.content, "still saved");
    }

    #[tokio::test]
    async fn mark_read_notifies_the_room() {
        let f = fixture().await;
        let mut rx = joined(&f.hub, f.conversation_id).await;

        let first = f.chat.mark_read(f.conversation_id, f.bob).await.unwrap();
        let second = f.chat.mark_read(f.conversation_id, f.bob).await.unwrap();
        assert!(second >= first);

        let event = next_event(&mut rx).unwrap();
        assert_eq!(event["type"], "messages_read");
        assert_eq!(event["payload"]["userId"], f.bob);
        assert_eq!(event["payload"]["conversationId"], f.conversation_id);
    }
}
