use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub is_group: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub conversation_id: i64,
    pub user_id: i64,
    pub last_read_at: Option<DateTime<Utc>>,
}

/// One row of a user's inbox: a conversation seen from the requesting user's side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    /// The other side of the thread; never the requesting user.
    pub participant: super::UserSummary,
    pub last_message: Option<String>,
    /// Message time, or conversation creation time for an empty thread.
    pub last_activity_at: DateTime<Utc>,
    /// `last_activity_at` humanized relative to now, e.g. "5 minutes ago".
    pub last_message_time: String,
    pub last_read_at: Option<DateTime<Utc>>,
    pub unread_count: i64,
}

/// Result of find-or-create for a 1:1 thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationHandle {
    pub conversation_id: i64,
    /// True only when this call inserted the conversation.
    pub created: bool,
}
