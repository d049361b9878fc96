use std::{net::SocketAddr, time::Duration};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use codesprint_chat_backend::{
    build_app, config::Config, services::chat::ChatService, storage::db, AppState,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> (SocketAddr, AppState) {
    let db = db::connect_in_memory().await.unwrap();
    let state = AppState::new(db, Config::default());
    state.hub.start();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_app(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/api/chat/ws"))
        .await
        .unwrap();
    client
}

async fn emit(client: &mut Client, event: Value) {
    client.send(Message::Text(event.to_string())).await.unwrap();
}

async fn next_event(client: &mut Client) -> Value {
    let wait = async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("connection ended: {other:?}"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("no event within 5s")
}

/// Round-trip a ping so every earlier frame from this client has been applied.
async fn sync(client: &mut Client) {
    emit(client, json!({"type": "ping"})).await;
    assert_eq!(next_event(client).await, json!({"type": "pong"}));
}

async fn seed_user(state: &AppState, first_name: &str) -> i64 {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO users (first_name, last_name, email) VALUES (?, 'Tester', ?) RETURNING id",
    )
    .bind(first_name)
    .bind(format!("{}@codesprint.test", first_name.to_lowercase()))
    .fetch_one(&state.db)
    .await
    .unwrap();
    id
}

#[tokio::test]
async fn stored_messages_reach_joined_clients() {
    let (addr, state) = spawn_server().await;
    let alice = seed_user(&state, "Alice").await;
    let bob = seed_user(&state, "Bob").await;

    let chat = ChatService::new(state.db.clone(), state.hub.clone());
    let handle = chat.find_or_create_conversation(alice, bob).await.unwrap();

    let mut client = connect(addr).await;
    emit(
        &mut client,
        json!({"type": "join_conversation", "payload": handle.conversation_id}),
    )
    .await;
    sync(&mut client).await;

    chat.send_message(handle.conversation_id, alice, "hello over the wire")
        .await
        .unwrap();

    let event = next_event(&mut client).await;
    assert_eq!(event["type"], "new_message");
    assert_eq!(event["payload"]["content"], "hello over the wire");
    assert_eq!(event["payload"]["sender"]["firstName"], "Alice");
}

#[tokio::test]
async fn typing_and_presence_between_two_clients() {
    let (addr, state) = spawn_server().await;
    let mut first = connect(addr).await;
    let mut second = connect(addr).await;

    for client in [&mut first, &mut second] {
        emit(client, json!({"type": "join_conversation", "payload": "12"})).await;
        sync(client).await;
    }

    emit(
        &mut first,
        json!({"type": "typing", "payload": {"conversationId": 12, "userId": 1, "isTyping": true}}),
    )
    .await;
    let event = next_event(&mut second).await;
    assert_eq!(event["type"], "user_typing");
    assert_eq!(event["payload"]["isTyping"], true);

    // Garbage is dropped without closing the connection
    first
        .send(Message::Text("not an event".to_string()))
        .await
        .unwrap();
    sync(&mut first).await;

    emit(&mut first, json!({"type": "user_online", "payload": 1})).await;
    assert_eq!(next_event(&mut first).await["payload"]["status"], "online");
    assert_eq!(next_event(&mut second).await["payload"]["status"], "online");

    first.close(None).await.unwrap();
    let event = next_event(&mut second).await;
    assert_eq!(
        event,
        json!({"type": "user_status", "payload": {"userId": 1, "status": "offline"}})
    );
    assert_eq!(state.hub.connection_count().await, 1);
}
