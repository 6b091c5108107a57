use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

use parley_db::Database;
use parley_server::{app, config::Config};
use parley_types::api::{MessageResponse, RegisterResponse};
use parley_types::events::ServerEvent;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    http: reqwest::Client,
}

impl TestServer {
    async fn start() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let config = Config {
            jwt_secret: "gateway-test-secret".into(),
            ..Config::default()
        };
        let router = app::build(db, &config).unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            addr,
            http: reqwest::Client::new(),
        }
    }

    async fn register(&self, username: &str) -> RegisterResponse {
        let response = self
            .http
            .post(format!("http://{}/auth/register", self.addr))
            .json(&json!({ "username": username, "password": "long enough password" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
        response.json().await.unwrap()
    }

    async fn send(&self, token: &str, recipient: Uuid, text: &str) -> MessageResponse {
        let response = self
            .http
            .post(format!("http://{}/messages/{}", self.addr, recipient))
            .bearer_auth(token)
            .json(&json!({ "text": text }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
        response.json().await.unwrap()
    }

    async fn history(&self, token: &str, other: Uuid) -> Vec<MessageResponse> {
        self.http
            .get(format!("http://{}/messages/{}", self.addr, other))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    /// Connect and identify; returns once the server has registered `user_id` as online.
    async fn connect(&self, user: &RegisterResponse) -> Ws {
        let (mut ws, _) = connect_async(format!("ws://{}/gateway", self.addr))
            .await
            .unwrap();
        send_command(&mut ws, json!({ "type": "identify", "data": { "token": user.token } })).await;

        let ready = next_event(&mut ws).await;
        assert!(matches!(ready, ServerEvent::Ready { user_id, .. } if user_id == user.user_id));
        wait_for(&mut ws, |e| {
            matches!(e, ServerEvent::OnlineUsers { user_ids } if user_ids.contains(&user.user_id))
        })
        .await;
        ws
    }
}

async fn send_command(ws: &mut Ws, command: Value) {
    ws.send(Message::text(command.to_string())).await.unwrap();
}

async fn next_event(ws: &mut Ws) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let msg = ws.next().await.expect("socket closed").expect("socket error");
            if let Message::Text(text) = msg {
                return serde_json::from_str::<ServerEvent>(&text).unwrap();
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Skip events until one matches.
async fn wait_for(ws: &mut Ws, pred: impl Fn(&ServerEvent) -> bool) -> ServerEvent {
    loop {
        let event = next_event(ws).await;
        if pred(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn live_delivery_arrival_and_seen_round_trip() {
    let server = TestServer::start().await;
    let alice = server.register("alice").await;
    let bob = server.register("bob").await;

    let mut alice_ws = server.connect(&alice).await;
    let mut bob_ws = server.connect(&bob).await;

    let sent = server.send(&alice.token, bob.user_id, "hello").await;
    let conversation_id = sent.message.conversation_id;

    let delivered = wait_for(&mut bob_ws, |e| matches!(e, ServerEvent::NewMessage { .. })).await;
    let ServerEvent::NewMessage { message } = delivered else { unreachable!() };
    assert_eq!(message.message.id, sent.message.id);
    assert_eq!(message.sender.id, alice.user_id);

    send_command(
        &mut bob_ws,
        json!({
            "type": "messageArrived",
            "data": {
                "sender_id": alice.user_id,
                "message_id": sent.message.id,
                "receiver_id": bob.user_id,
                "conversation_id": conversation_id,
                "message": { "text": "hello" }
            }
        }),
    )
    .await;

    let ack = wait_for(&mut alice_ws, |e| matches!(e, ServerEvent::MessageSent { .. })).await;
    assert_eq!(
        ack,
        ServerEvent::MessageSent {
            message_id: sent.message.id,
            receiver_id: bob.user_id,
            message: json!({ "text": "hello" }),
        }
    );

    let history = server.history(&alice.token, bob.user_id).await;
    assert!(history[0].message.arrived);
    assert!(!history[0].message.seen);

    send_command(
        &mut bob_ws,
        json!({
            "type": "markMessagesAsSeen",
            "data": { "conversation_id": conversation_id, "user_id": bob.user_id }
        }),
    )
    .await;

    let seen = wait_for(&mut alice_ws, |e| matches!(e, ServerEvent::MessagesSeen { .. })).await;
    assert_eq!(seen, ServerEvent::MessagesSeen { conversation_id });

    let history = server.history(&bob.token, alice.user_id).await;
    assert!(history[0].message.seen);
    assert!(history[0].message.arrived);
}

#[tokio::test]
async fn reconnect_survives_stale_disconnect() {
    let server = TestServer::start().await;
    let alice = server.register("alice").await;
    let bob = server.register("bob").await;

    let mut alice_ws = server.connect(&alice).await;
    let mut bob_old = server.connect(&bob).await;
    let mut bob_new = server.connect(&bob).await;

    bob_old.close(None).await.unwrap();
    // Let the server process the old socket's disconnect.
    tokio::time::sleep(Duration::from_millis(200)).await;

    send_command(
        &mut alice_ws,
        json!({ "type": "userWriting", "data": { "recipient_id": bob.user_id } }),
    )
    .await;

    let typing = wait_for(&mut bob_new, |e| matches!(e, ServerEvent::Writing { .. })).await;
    assert_eq!(typing, ServerEvent::Writing { writing_user_id: alice.user_id });
}

#[tokio::test]
async fn identify_with_bad_token_is_rejected() {
    let server = TestServer::start().await;
    let (mut ws, _) = connect_async(format!("ws://{}/gateway", server.addr))
        .await
        .unwrap();

    send_command(&mut ws, json!({ "type": "identify", "data": { "token": "garbage" } })).await;

    // Server drops the socket without sending Ready.
    let next = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("server kept the socket open");
    match next {
        None | Some(Err(_)) | Some(Ok(Message::Close(_))) => {}
        Some(Ok(other)) => panic!("unexpected frame: {:?}", other),
    }
}
