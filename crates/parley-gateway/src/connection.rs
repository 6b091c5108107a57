use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::{info, warn};
use uuid::Uuid;

use parley_types::api::Claims;
use parley_types::events::{ClientCommand, ServerEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Reacts to commands arriving on an identified connection.
pub trait CommandHandler: Clone + Send + Sync + 'static {
    fn handle(&self, user_id: Uuid, command: ClientCommand) -> impl Future<Output = ()> + Send;
}

/// Handle a single WebSocket connection: `identify` handshake, then the event loop.
pub async fn handle_connection<H: CommandHandler>(
    socket: WebSocket,
    dispatcher: Dispatcher,
    handler: H,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    let (user_id, username) = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    // Open the queue before going online so this socket sees its own presence broadcast.
    let (conn_id, user_rx) = dispatcher.open_connection();
    info!("{} ({}) connected to gateway as {}", username, user_id, conn_id);

    let ready = ServerEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        dispatcher.close_connection(conn_id, None);
        return;
    }

    dispatcher.identify(user_id, conn_id);

    run_connection_loop(sender, receiver, user_rx, handler, user_id, &username).await;

    dispatcher.close_connection(conn_id, Some(user_id));
    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn run_connection_loop<H: CommandHandler>(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut user_rx: tokio::sync::mpsc::UnboundedReceiver<ServerEvent>,
    handler: H,
    user_id: Uuid,
    username: &str,
) {
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = user_rx.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let username_recv = username.to_string();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(ClientCommand::Identify { .. }) => {} // Already handled
                    Ok(cmd) => handler.handle(user_id, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(text) => sender.send(Message::Text(text.into())).await,
        Err(e) => {
            warn!("Failed to encode {} event: {}", event.name(), e);
            Ok(())
        }
    }
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(ClientCommand::Identify { token }) =
                    serde_json::from_str::<ClientCommand>(&text)
                {
                    return verify_token(&token, jwt_secret);
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

fn verify_token(token: &str, jwt_secret: &str) -> Option<(Uuid, String)> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;

    Some((token_data.claims.sub, token_data.claims.username))
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{EncodingKey, Header, encode};

    use super::*;

    fn token(secret: &str, exp_offset: i64) -> (Uuid, String) {
        let user_id = Uuid::new_v4();
        let exp = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
            + exp_offset) as usize;
        let claims = Claims {
            sub: user_id,
            username: "alice".into(),
            exp,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();
        (user_id, token)
    }

    #[test]
    fn accepts_token_signed_with_shared_secret() {
        let (user_id, token) = token("secret", 3600);
        assert_eq!(
            verify_token(&token, "secret"),
            Some((user_id, "alice".to_string()))
        );
    }

    #[test]
    fn rejects_wrong_secret_and_expired_tokens() {
        let (_, forged) = token("other", 3600);
        assert_eq!(verify_token(&forged, "secret"), None);

        let (_, expired) = token("secret", -3600);
        assert_eq!(verify_token(&expired, "secret"), None);
    }
}
