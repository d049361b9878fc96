use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Public identity of a user as shown next to conversations and messages.
///
/// Users belong to the auth subsystem; chat only ever reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}
