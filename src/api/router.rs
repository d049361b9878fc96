use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use super::{handlers, websocket::handle_websocket};
use crate::AppState;

/// Multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Routes mounted under `/api/chat`.
pub fn create_router(state: AppState) -> Router<AppState> {
    let upload_limit = state.config.upload.max_bytes + MULTIPART_OVERHEAD;

    // Conversation routes; `:id` is the user for the inbox and the conversation elsewhere
    let conversation_routes = Router::new()
        .route(
            "/conversations",
            post(handlers::conversations::find_or_create_conversation),
        )
        .route(
            "/conversations/:id",
            get(handlers::conversations::list_conversations),
        )
        .route(
            "/conversations/:id/messages",
            get(handlers::messages::get_messages).post(handlers::messages::send_message),
        )
        .route("/conversations/:id/read", post(handlers::messages::mark_read));

    let upload_routes = Router::new()
        .route("/upload", post(handlers::upload::upload_attachment))
        .layer(DefaultBodyLimit::max(upload_limit));

    let ws_route = Router::new().route("/ws", get(handle_websocket));

    Router::new()
        .merge(conversation_routes)
        .merge(upload_routes)
        .merge(ws_route)
        .with_state(state)
}
