use std::sync::Arc;

use axum::{routing::get, Router};
use tracing::warn;

use shared_config::AppConfig;
use video_session_cell::router::{twilio_webhook_routes, video_session_routes};
use video_session_cell::services::WebhookDispatcher;

pub fn create_router(state: Arc<AppConfig>) -> Router {
    let router = Router::new()
        .route("/", get(|| async { "Telehealth video API is running!" }))
        .nest("/video", video_session_routes(state.clone()));

    match WebhookDispatcher::from_config(&state) {
        Ok(dispatcher) => router.nest("/webhooks/twilio", twilio_webhook_routes(Arc::new(dispatcher))),
        Err(e) => {
            warn!("Twilio webhooks disabled: {}", e);
            router
        }
    }
}
