use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use axum_extra::extract::WithRejection;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppResult},
    models::ConversationSummary,
    services::chat::ChatService,
    AppState,
};

#[derive(Debug, Serialize)]
pub struct ConversationsResponse {
    pub ok: bool,
    pub conversations: Vec<ConversationSummary>,
}

/// `GET /conversations/:id` where `:id` is the requesting user.
pub async fn list_conversations(
    State(state): State<AppState>,
    WithRejection(Path(user_id), _): WithRejection<Path<i64>, AppError>,
) -> AppResult<Json<ConversationsResponse>> {
    let chat_service = ChatService::new(state.db, state.hub);
    let conversations = chat_service.list_conversations(user_id).await?;

    Ok(Json(ConversationsResponse {
        ok: true,
        conversations,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub user_id: Option<i64>,
    pub participant_id: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationCreatedResponse {
    pub ok: bool,
    pub conversation_id: i64,
}

pub async fn find_or_create_conversation(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<CreateConversationRequest>, AppError>,
) -> AppResult<(StatusCode, Json<ConversationCreatedResponse>)> {
    let user_id = req
        .user_id
        .ok_or_else(|| AppError::Validation("userId is required".to_string()))?;
    let participant_id = req
        .participant_id
        .ok_or_else(|| AppError::Validation("participantId is required".to_string()))?;

    let chat_service = ChatService::new(state.db, state.hub);
    let handle = chat_service
        .find_or_create_conversation(user_id, participant_id)
        .await?;

    let status = if handle.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(ConversationCreatedResponse {
            ok: true,
            conversation_id: handle.conversation_id,
        }),
    ))
}
