use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::auth::{AppState, AppStateInner};
use parley_db::Database;
use parley_delivery::DeliveryCoordinator;
use parley_delivery::notify::{LogNotifier, PushNotifier, WebhookNotifier};
use parley_gateway::connection;
use parley_gateway::{Dispatcher, InMemoryPresence, PresenceRegistry};

use crate::config::Config;

#[derive(Clone)]
struct GatewayState {
    dispatcher: Dispatcher,
    coordinator: DeliveryCoordinator,
    jwt_secret: String,
}

/// Wire the store, presence, dispatcher and coordinator into the full router.
pub fn build(db: Arc<Database>, config: &Config) -> anyhow::Result<Router> {
    let presence: Arc<dyn PresenceRegistry> = Arc::new(InMemoryPresence::new());
    let dispatcher = Dispatcher::new(presence.clone());

    let notifier: Arc<dyn PushNotifier> = match &config.push_webhook_url {
        Some(url) => {
            info!("Offline notifications go to {}", url);
            Arc::new(WebhookNotifier::new(url.clone())?)
        }
        None => Arc::new(LogNotifier),
    };

    let coordinator = DeliveryCoordinator::new(db.clone(), presence, Arc::new(dispatcher.clone()))
        .with_notifier(notifier);

    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        coordinator: coordinator.clone(),
    });

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(GatewayState {
            dispatcher,
            coordinator,
            jwt_secret: config.jwt_secret.clone(),
        });

    Ok(Router::new()
        .merge(parley_api::routes(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http()))
}

async fn ws_upgrade(
    State(state): State<GatewayState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher, state.coordinator, state.jwt_secret)
    })
}
