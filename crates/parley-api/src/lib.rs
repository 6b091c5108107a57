pub mod auth;
pub mod conversations;
pub mod error;
pub mod messages;
pub mod middleware;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};

use crate::auth::AppState;

/// REST routes. `/auth/*` is public, everything else requires a bearer token.
pub fn routes(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/conversations", get(conversations::get_conversations))
        .route("/conversations/{other_user_id}", post(conversations::save_conversation))
        .route("/messages/unseen", get(messages::get_unseen_messages))
        .route("/messages/{user_id}", get(messages::get_messages))
        .route("/messages/{user_id}", post(messages::send_message))
        .layer(from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}
