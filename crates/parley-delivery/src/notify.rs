use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A notification for a user with no live connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushNotification {
    pub user_id: Uuid,
    pub payload: serde_json::Value,
}

/// Best-effort offline delivery. Must not block and never reports failure to the caller.
pub trait PushNotifier: Send + Sync {
    fn notify(&self, notification: PushNotification);
}

/// Default notifier when no push service is configured.
pub struct LogNotifier;

impl PushNotifier for LogNotifier {
    fn notify(&self, notification: PushNotification) {
        info!("Offline notification for {}: {}", notification.user_id, notification.payload);
    }
}

/// POSTs `{user_id, payload}` as JSON to a push service.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl PushNotifier for WebhookNotifier {
    fn notify(&self, notification: PushNotification) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime for push notification to {}", notification.user_id);
            return;
        };

        let client = self.client.clone();
        let url = self.url.clone();
        runtime.spawn(async move {
            let result = client
                .post(&url)
                .json(&notification)
                .send()
                .await
                .and_then(|resp| resp.error_for_status());
            match result {
                Ok(_) => debug!("Push notification sent to {}", notification.user_id),
                Err(e) => warn!("Push notification to {} failed: {}", notification.user_id, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use axum::{Json, Router, extract::State, routing::post};
    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    use super::*;

    /// Starts a push endpoint on an ephemeral port; received bodies come out of the channel.
    async fn push_endpoint() -> (String, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = Router::new()
            .route(
                "/push",
                post(|State(tx): State<mpsc::UnboundedSender<Value>>, Json(body): Json<Value>| async move {
                    let _ = tx.send(body);
                }),
            )
            .with_state(tx);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/push", addr), rx)
    }

    #[tokio::test]
    async fn webhook_posts_user_and_payload() {
        let (url, mut received) = push_endpoint().await;
        let notifier = WebhookNotifier::new(url).unwrap();
        let user_id = Uuid::new_v4();

        notifier.notify(PushNotification {
            user_id,
            payload: json!({ "type": "newMessage", "text": "hello" }),
        });

        let body = tokio::time::timeout(Duration::from_secs(5), received.recv())
            .await
            .expect("no push received")
            .unwrap();
        assert_eq!(
            body,
            json!({
                "user_id": user_id,
                "payload": { "type": "newMessage", "text": "hello" },
            })
        );
    }

    #[tokio::test]
    async fn unreachable_webhook_is_not_an_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/push", listener.local_addr().unwrap());
        drop(listener);

        let notifier = WebhookNotifier::new(url).unwrap();
        notifier.notify(PushNotification {
            user_id: Uuid::new_v4(),
            payload: Value::Null,
        });
    }
}
