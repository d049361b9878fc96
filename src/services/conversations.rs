use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::{
    error::{AppError, AppResult},
    humanize,
    models::{
        Conversation, ConversationHandle, ConversationSummary, Message, MessageWithSender,
        Participant, UserSummary,
    },
    storage::timestamp::{self, format_timestamp, parse_optional, parse_timestamp},
};

const MESSAGE_COLUMNS: &str = r#"
    m.id, m.conversation_id, m.sender_id, m.content, m.created_at,
    u.first_name, u.last_name, u.email
"#;

#[derive(Debug, FromRow)]
struct MessageRow {
    id: i64,
    conversation_id: i64,
    sender_id: i64,
    content: String,
    created_at: String,
    first_name: String,
    last_name: String,
    email: String,
}

impl MessageRow {
    fn into_message(self) -> AppResult<MessageWithSender> {
        Ok(MessageWithSender {
            message: Message {
                id: self.id,
                conversation_id: self.conversation_id,
                sender_id: self.sender_id,
                content: self.content,
                created_at: parse_timestamp(&self.created_at)?,
            },
            sender: UserSummary {
                id: self.sender_id,
                first_name: self.first_name,
                last_name: self.last_name,
                email: self.email,
            },
        })
    }
}

#[derive(Debug, FromRow)]
struct ConversationRow {
    id: i64,
    created_at: String,
    last_message_at: Option<String>,
    is_group: bool,
}

impl ConversationRow {
    fn into_conversation(self) -> AppResult<Conversation> {
        Ok(Conversation {
            id: self.id,
            created_at: parse_timestamp(&self.created_at)?,
            last_message_at: parse_optional(self.last_message_at.as_deref())?,
            is_group: self.is_group,
        })
    }
}

#[derive(Debug, FromRow)]
struct InboxRow {
    id: i64,
    created_at: String,
    last_message_at: Option<String>,
    is_group: bool,
    participant_id: i64,
    first_name: String,
    last_name: String,
    email: String,
    last_read_at: Option<String>,
    last_message: Option<String>,
    last_message_time: Option<String>,
    unread_count: i64,
}

impl InboxRow {
    fn into_summary(self, now: DateTime<Utc>) -> AppResult<ConversationSummary> {
        let created_at = parse_timestamp(&self.created_at)?;
        let last_activity_at =
            parse_optional(self.last_message_time.as_deref())?.unwrap_or(created_at);

        Ok(ConversationSummary {
            conversation: Conversation {
                id: self.id,
                created_at,
                last_message_at: parse_optional(self.last_message_at.as_deref())?,
                is_group: self.is_group,
            },
            participant: UserSummary {
                id: self.participant_id,
                first_name: self.first_name,
                last_name: self.last_name,
                email: self.email,
            },
            last_message: self.last_message,
            last_activity_at,
            last_message_time: humanize::time_ago(last_activity_at, now),
            last_read_at: parse_optional(self.last_read_at.as_deref())?,
            unread_count: self.unread_count,
        })
    }
}

/// Key identifying the unique 1:1 thread between two users, independent of order.
pub fn direct_key(user_a: i64, user_b: i64) -> String {
    let (low, high) = if user_a <= user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    };
    format!("{}:{}", low, high)
}

/// SQL access for conversations, participants and messages.
#[derive(Clone)]
pub struct ConversationRepository {
    db: SqlitePool,
}

impl ConversationRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Conversations `user_id` takes part in, newest activity first, each seen
    /// from that user's side.
    pub async fn list_conversations(&self, user_id: i64) -> AppResult<Vec<ConversationSummary>> {
        let rows: Vec<InboxRow> = sqlx::query_as(
            r#"
            SELECT c.id, c.created_at, c.last_message_at, c.is_group,
                   u.id AS participant_id, u.first_name, u.last_name, u.email,
                   me.last_read_at,
                   (SELECT m.content FROM messages m
                    WHERE m.conversation_id = c.id
                    ORDER BY m.created_at DESC, m.id DESC LIMIT 1) AS last_message,
                   (SELECT m.created_at FROM messages m
                    WHERE m.conversation_id = c.id
                    ORDER BY m.created_at DESC, m.id DESC LIMIT 1) AS last_message_time,
                   (SELECT COUNT(*) FROM messages m
                    WHERE m.conversation_id = c.id
                    AND m.sender_id != me.user_id
                    AND (me.last_read_at IS NULL OR m.created_at > me.last_read_at)) AS unread_count
            FROM conversation_participants me
            JOIN conversations c ON c.id = me.conversation_id
            JOIN conversation_participants other
                ON other.conversation_id = c.id AND other.user_id != me.user_id
            JOIN users u ON u.id = other.user_id
            WHERE me.user_id = ?
            ORDER BY COALESCE(c.last_message_at, c.created_at) DESC, c.id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        let now = Utc::now();
        rows.into_iter().map(|row| row.into_summary(now)).collect()
    }

    /// One page of a conversation's history, oldest first.
    ///
    /// Pages count back from the newest message: page 1 holds the latest
    /// `page_size` messages, page 2 the ones before those.
    pub async fn get_messages(
        &self,
        conversation_id: i64,
        page: i64,
        page_size: i64,
    ) -> AppResult<Vec<MessageWithSender>> {
        if page < 1 {
            return Err(AppError::Validation("page must be at least 1".to_string()));
        }
        if page_size < 1 {
            return Err(AppError::Validation("limit must be at least 1".to_string()));
        }
        let offset = (page - 1)
            .checked_mul(page_size)
            .ok_or_else(|| AppError::Validation("page is out of range".to_string()))?;

        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages m
            JOIN users u ON u.id = m.sender_id
            WHERE m.conversation_id = ?
            ORDER BY m.created_at DESC, m.id DESC
            LIMIT ? OFFSET ?
            "#
        ))
        .bind(conversation_id)
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        let mut messages = rows
            .into_iter()
            .map(MessageRow::into_message)
            .collect::<AppResult<Vec<_>>>()?;
        messages.reverse();

        Ok(messages)
    }

    /// Return the 1:1 thread between two users, creating it on first contact.
    ///
    /// The unique `direct_key` makes concurrent calls for the same pair
    /// converge on one row.
    pub async fn find_or_create_conversation(
        &self,
        user_id: i64,
        participant_id: i64,
    ) -> AppResult<ConversationHandle> {
        if user_id == participant_id {
            return Err(AppError::Validation(
                "Cannot start a conversation with yourself".to_string(),
            ));
        }
        for id in [user_id, participant_id] {
            if self.get_user_summary(id).await?.is_none() {
                return Err(AppError::UserNotFound);
            }
        }

        let key = direct_key(user_id, participant_id);
        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO conversations (created_at, is_group, direct_key)
            VALUES (?, 0, ?)
            ON CONFLICT (direct_key) DO NOTHING
            "#,
        )
        .bind(format_timestamp(&timestamp::now()))
        .bind(&key)
        .execute(&mut *tx)
        .await?;

        let (conversation_id,): (i64,) =
            sqlx::query_as("SELECT id FROM conversations WHERE direct_key = ?")
                .bind(&key)
                .fetch_one(&mut *tx)
                .await?;

        for uid in [user_id, participant_id] {
            sqlx::query(
                r#"
                INSERT INTO conversation_participants (conversation_id, user_id)
                VALUES (?, ?)
                ON CONFLICT (conversation_id, user_id) DO NOTHING
                "#,
            )
            .bind(conversation_id)
            .bind(uid)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let created = inserted.rows_affected() == 1;
        if created {
            tracing::info!(
                "Created conversation {} between users {} and {}",
                conversation_id,
                user_id,
                participant_id
            );
        }

        Ok(ConversationHandle {
            conversation_id,
            created,
        })
    }

    /// Store a message and bump the conversation's last activity.
    ///
    /// The first statement is a write, so the transaction holds the SQLite
    /// write lock before it reads anything.
    pub async fn append_message(
        &self,
        conversation_id: i64,
        sender_id: i64,
        content: &str,
    ) -> AppResult<MessageWithSender> {
        let created_at = format_timestamp(&timestamp::now());
        let mut tx = self.db.begin().await?;

        // Never move last activity backwards when writers race.
        let bumped = sqlx::query(
            "UPDATE conversations SET last_message_at = MAX(COALESCE(last_message_at, ''), ?) WHERE id = ?",
        )
        .bind(&created_at)
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;
        if bumped.rows_affected() == 0 {
            return Err(AppError::ConversationNotFound);
        }

        let (message_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO messages (conversation_id, sender_id, content, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(conversation_id)
        .bind(sender_id)
        .bind(content)
        .bind(&created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                AppError::UserNotFound
            }
            other => AppError::Database(other),
        })?;

        let row: MessageRow = sqlx::query_as(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages m
            JOIN users u ON u.id = m.sender_id
            WHERE m.id = ?
            "#
        ))
        .bind(message_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        row.into_message()
    }

    /// Move the participant's read cursor to now. Repeating the call only
    /// advances the cursor.
    pub async fn mark_read(&self, conversation_id: i64, user_id: i64) -> AppResult<DateTime<Utc>> {
        let read_at = timestamp::now();

        let result = sqlx::query(
            r#"
            UPDATE conversation_participants
            SET last_read_at = ?
            WHERE conversation_id = ? AND user_id = ?
            "#,
        )
        .bind(format_timestamp(&read_at))
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotParticipant);
        }

        Ok(read_at)
    }

    pub async fn get_conversation(&self, conversation_id: i64) -> AppResult<Option<Conversation>> {
        let row: Option<ConversationRow> = sqlx::query_as(
            "SELECT id, created_at, last_message_at, is_group FROM conversations WHERE id = ?",
        )
        .bind(conversation_id)
        .fetch_optional(&self.db)
        .await?;

        row.map(ConversationRow::into_conversation).transpose()
    }

    pub async fn conversation_exists(&self, conversation_id: i64) -> AppResult<bool> {
        Ok(self.get_conversation(conversation_id).await?.is_some())
    }

    pub async fn get_participant(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> AppResult<Option<Participant>> {
        let row: Option<(i64, i64, Option<String>)> = sqlx::query_as(
            r#"
            SELECT conversation_id, user_id, last_read_at
            FROM conversation_participants
            WHERE conversation_id = ? AND user_id = ?
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        row.map(|(conversation_id, user_id, last_read_at)| {
            Ok(Participant {
                conversation_id,
                user_id,
                last_read_at: parse_optional(last_read_at.as_deref())?,
            })
        })
        .transpose()
    }

    pub async fn is_participant(&self, conversation_id: i64, user_id: i64) -> AppResult<bool> {
        Ok(self
            .get_participant(conversation_id, user_id)
            .await?
            .is_some())
    }

    pub async fn get_user_summary(&self, user_id: i64) -> AppResult<Option<UserSummary>> {
        let user: Option<UserSummary> =
            sqlx::query_as("SELECT id, first_name, last_name, email FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&self.db)
                .await?;

        Ok(user)
    }
}
