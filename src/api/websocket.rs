use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use uuid::Uuid;

use crate::{
    realtime::{
        events::{relay_target, TypingNotice},
        ClientEvent, ConnectionId, NewMessage, Outbound, Presence, RoomHub, RoomId, ServerEvent,
    },
    AppState,
};

pub async fn handle_websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<RoomHub>) {
    let connection_id = Uuid::new_v4();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Outbound queue for this client; the hub holds the only sender
    let (tx, mut rx) = hub.channel();
    if let Err(e) = hub.register(connection_id, tx).await {
        tracing::warn!("Refusing connection {}: {}", connection_id, e);
        let _ = ws_sender.send(Message::Close(None)).await;
        return;
    }

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let message = match frame {
                Outbound::Text(text) => Message::Text(text.to_string()),
                Outbound::Ping => Message::Ping(Vec::new()),
            };
            if ws_sender.send(message).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    let recv_hub = hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) => match ClientEvent::parse(&text) {
                    Ok(event) => handle_client_event(&recv_hub, connection_id, event).await,
                    Err(e) => {
                        tracing::warn!("Dropping malformed frame from {}: {}", connection_id, e)
                    }
                },
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::debug!("Connection {} read error: {}", connection_id, e);
                    break;
                }
                // Pings are answered by axum; binary frames are not part of the protocol
                _ => {}
            }
        }
    });

    // Wait for either side to finish, then tear down the other
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    disconnect(&hub, connection_id).await;
}

/// Drop the connection and announce the user offline once their last
/// connection is gone.
async fn disconnect(hub: &RoomHub, connection_id: ConnectionId) {
    if let Some(user_id) = hub.unregister(connection_id).await {
        let offline = ServerEvent::user_status(user_id, Presence::Offline);
        if let Err(e) = hub.notify_all(&offline).await {
            tracing::debug!("Offline status for user {} not sent: {}", user_id, e);
        }
    }
}

/// Apply one client event. Failures are logged and never reported back.
pub async fn handle_client_event(hub: &RoomHub, connection_id: ConnectionId, event: ClientEvent) {
    let result = match event {
        ClientEvent::JoinConversation(id) => {
            tracing::info!("Client {} joined conversation {}", connection_id, id.0);
            hub.join(connection_id, RoomId::conversation(id.0)).await
        }
        ClientEvent::LeaveConversation(id) => {
            tracing::info!("Client {} left conversation {}", connection_id, id.0);
            hub.leave(connection_id, RoomId::conversation(id.0)).await
        }
        ClientEvent::SendMessage(payload) => match relay_target(&payload) {
            Some(conversation_id) => {
                tracing::debug!("Relaying unsaved message to conversation {}", conversation_id);
                hub.broadcast_to_room(
                    RoomId::conversation(conversation_id),
                    &ServerEvent::NewMessage(NewMessage::Relayed(payload)),
                )
                .await
                .map(|_| ())
            }
            None => {
                tracing::warn!("send_message from {} has no conversationId", connection_id);
                Ok(())
            }
        },
        ClientEvent::Typing(typing) => {
            let notice = ServerEvent::UserTyping(TypingNotice {
                user_id: typing.user_id.0,
                is_typing: typing.is_typing,
            });
            hub.broadcast_to_room_except(
                RoomId::conversation(typing.conversation_id.0),
                connection_id,
                &notice,
            )
            .await
            .map(|_| ())
        }
        ClientEvent::ReadMessages(read) => hub
            .broadcast_to_room(
                RoomId::conversation(read.conversation_id.0),
                &ServerEvent::messages_read(read.conversation_id.0, read.user_id.0),
            )
            .await
            .map(|_| ()),
        ClientEvent::UserOnline(user_id) => {
            match hub.bind_user(connection_id, user_id.0).await {
                Ok(()) => hub
                    .notify_all(&ServerEvent::user_status(user_id.0, Presence::Online))
                    .await
                    .map(|_| ()),
                Err(e) => Err(e),
            }
        }
        ClientEvent::Ping => hub
            .send_to_connection(connection_id, &ServerEvent::Pong)
            .await
            .map(|_| ()),
    };

    if let Err(e) = result {
        tracing::warn!("Event from {} dropped: {}", connection_id, e);
    }
}
