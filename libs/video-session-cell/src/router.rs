// libs/video-session-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::*;
use crate::services::WebhookDispatcher;

/// UI-facing session routes, nested under `/video` by the API.
pub fn video_session_routes(state: Arc<AppConfig>) -> Router {
    let public_routes = Router::new().route("/health", get(video_health_check));

    let protected_routes = Router::new()
        .route("/sessions/{session_id}", get(get_video_session))
        .route("/sessions/{session_id}/start", post(start_video_session))
        .route("/sessions/{session_id}/join", post(join_video_session))
        .route("/sessions/{session_id}/end", post(end_video_session))
        .route("/sessions/{session_id}/cancel", post(cancel_video_session))
        .route("/sessions/{session_id}/participants", get(list_session_participants))
        .route(
            "/sessions/{session_id}/messages",
            get(list_chat_messages).post(send_chat_message),
        )
        .route("/sessions/{session_id}/transcripts", get(list_session_transcripts))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

/// Provider callbacks, nested under `/webhooks/twilio`. Unauthenticated.
pub fn twilio_webhook_routes(dispatcher: Arc<WebhookDispatcher>) -> Router {
    Router::new()
        .route("/{event_type}", post(twilio_webhook))
        .with_state(dispatcher)
}
