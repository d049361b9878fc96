use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppResult},
    models::MessageWithSender,
    services::chat::ChatService,
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub ok: bool,
    pub messages: Vec<MessageWithSender>,
}

pub async fn get_messages(
    State(state): State<AppState>,
    WithRejection(Path(conversation_id), _): WithRejection<Path<i64>, AppError>,
    WithRejection(Query(query), _): WithRejection<Query<MessagesQuery>, AppError>,
) -> AppResult<Json<MessagesResponse>> {
    let page = query.page.unwrap_or(1);
    let limit = query
        .limit
        .unwrap_or(state.config.chat.default_page_size)
        .min(state.config.chat.max_page_size);

    let chat_service = ChatService::new(state.db, state.hub);
    let messages = chat_service
        .get_messages(conversation_id, page, limit)
        .await?;

    Ok(Json(MessagesResponse { ok: true, messages }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub sender_id: Option<i64>,
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageCreatedResponse {
    pub ok: bool,
    pub message: MessageWithSender,
}

pub async fn send_message(
    State(state): State<AppState>,
    WithRejection(Path(conversation_id), _): WithRejection<Path<i64>, AppError>,
    WithRejection(Json(req), _): WithRejection<Json<SendMessageRequest>, AppError>,
) -> AppResult<(StatusCode, Json<MessageCreatedResponse>)> {
    let sender_id = req
        .sender_id
        .ok_or_else(|| AppError::Validation("senderId is required".to_string()))?;
    let content = req
        .content
        .ok_or_else(|| AppError::Validation("content is required".to_string()))?;

    let chat_service = ChatService::new(state.db, state.hub);
    let message = chat_service
        .send_message(conversation_id, sender_id, &content)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageCreatedResponse { ok: true, message }),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub user_id: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadResponse {
    pub ok: bool,
    pub message: String,
    pub read_at: DateTime<Utc>,
}

pub async fn mark_read(
    State(state): State<AppState>,
    WithRejection(Path(conversation_id), _): WithRejection<Path<i64>, AppError>,
    WithRejection(Json(req), _): WithRejection<Json<MarkReadRequest>, AppError>,
) -> AppResult<Json<MarkReadResponse>> {
    let user_id = req
        .user_id
        .ok_or_else(|| AppError::Validation("userId is required".to_string()))?;

    let chat_service = ChatService::new(state.db, state.hub);
    let read_at = chat_service.mark_read(conversation_id, user_id).await?;

    Ok(Json(MarkReadResponse {
        ok: true,
        message: "Messages marked as read".to_string(),
        read_at,
    }))
}
