// libs/video-session-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{rejection::FormRejection, Extension, Path, State},
    http::StatusCode,
    Form, Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use tracing::{error, warn};

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_models::response::ApiResponse;

use crate::models::{
    AccessCredential, ChatMessage, JoinSessionRequest, ParticipantType, SendChatMessageRequest,
    SessionParticipant, SessionTranscript, TwilioStatusCallback, VideoSession, VideoSessionError,
    WebhookKind, WebhookOutcome,
};
use crate::services::{TwilioVideoClient, VideoSessionService, WebhookDispatcher};

type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

fn map_error(e: VideoSessionError) -> AppError {
    match e {
        VideoSessionError::SessionNotFound => AppError::NotFound(e.to_string()),
        VideoSessionError::NotConfigured => AppError::Unavailable(e.to_string()),
        VideoSessionError::ValidationError { message } => AppError::BadRequest(message),
        VideoSessionError::InvalidIdentity { .. } => AppError::BadRequest(e.to_string()),
        VideoSessionError::InvalidStatusTransition { .. }
        | VideoSessionError::SessionClosed { .. }
        | VideoSessionError::DuplicateRecord { .. } => AppError::Conflict(e.to_string()),
        VideoSessionError::CredentialIssuanceFailed { .. }
        | VideoSessionError::ProviderError { .. } => AppError::ExternalService(e.to_string()),
        VideoSessionError::SessionCreationFailed { .. }
        | VideoSessionError::PersistenceFailure { .. } => AppError::Database(e.to_string()),
    }
}

fn session_service(state: &AppConfig, auth: &Authorization<Bearer>) -> Result<VideoSessionService, AppError> {
    VideoSessionService::from_config(state, auth.token()).map_err(map_error)
}

/// Role from the request, else the one carried in the caller's token metadata.
fn resolve_participant_type(requested: Option<ParticipantType>, user: &User) -> Result<ParticipantType, AppError> {
    if let Some(user_type) = requested {
        return Ok(user_type);
    }

    user.user_type()
        .ok_or_else(|| AppError::BadRequest("user_type is required".to_string()))?
        .parse()
        .map_err(map_error)
}

// ==============================================================================
// SESSION LIFECYCLE HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn start_video_session(
    State(state): State<Arc<AppConfig>>,
    Path(session_id): Path<String>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> ApiResult<VideoSession> {
    let session = session_service(&state, &auth)?
        .start_session(&session_id)
        .await
        .map_err(map_error)?;

    Ok(Json(ApiResponse::success(session)))
}

/// Issues the caller's room credential; the user id always comes from the verified token.
#[axum::debug_handler]
pub async fn join_video_session(
    State(state): State<Arc<AppConfig>>,
    Path(session_id): Path<String>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    request: Option<Json<JoinSessionRequest>>,
) -> ApiResult<AccessCredential> {
    let requested = request.and_then(|Json(r)| r.user_type);
    let user_type = resolve_participant_type(requested, &user)?;

    let credential = session_service(&state, &auth)?
        .join_session(&session_id, &user.id, user_type)
        .await
        .map_err(map_error)?;

    Ok(Json(ApiResponse::success(credential)))
}

#[axum::debug_handler]
pub async fn end_video_session(
    State(state): State<Arc<AppConfig>>,
    Path(session_id): Path<String>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> ApiResult<VideoSession> {
    let session = session_service(&state, &auth)?
        .end_session(&session_id)
        .await
        .map_err(map_error)?;

    Ok(Json(ApiResponse::success(session)))
}

#[axum::debug_handler]
pub async fn cancel_video_session(
    State(state): State<Arc<AppConfig>>,
    Path(session_id): Path<String>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> ApiResult<VideoSession> {
    let session = session_service(&state, &auth)?
        .cancel_session(&session_id)
        .await
        .map_err(map_error)?;

    Ok(Json(ApiResponse::success(session)))
}

/// `data` is null when the session has never been started.
#[axum::debug_handler]
pub async fn get_video_session(
    State(state): State<Arc<AppConfig>>,
    Path(session_id): Path<String>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> ApiResult<Option<VideoSession>> {
    let session = session_service(&state, &auth)?
        .get_session(&session_id)
        .await
        .map_err(map_error)?;

    Ok(Json(ApiResponse::success(session)))
}

#[axum::debug_handler]
pub async fn list_session_participants(
    State(state): State<Arc<AppConfig>>,
    Path(session_id): Path<String>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> ApiResult<Vec<SessionParticipant>> {
    let participants = session_service(&state, &auth)?
        .list_participants(&session_id)
        .await
        .map_err(map_error)?;

    Ok(Json(ApiResponse::success(participants)))
}

// ==============================================================================
// CHAT & TRANSCRIPT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn send_chat_message(
    State(state): State<Arc<AppConfig>>,
    Path(session_id): Path<String>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<SendChatMessageRequest>,
) -> ApiResult<ChatMessage> {
    let sender_type = resolve_participant_type(request.sender_type, &user)?;

    let message = session_service(&state, &auth)?
        .send_chat_message(&session_id, &user.id, sender_type, &request.message)
        .await
        .map_err(map_error)?;

    Ok(Json(ApiResponse::success(message)))
}

#[axum::debug_handler]
pub async fn list_chat_messages(
    State(state): State<Arc<AppConfig>>,
    Path(session_id): Path<String>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> ApiResult<Vec<ChatMessage>> {
    let messages = session_service(&state, &auth)?
        .list_chat_messages(&session_id)
        .await
        .map_err(map_error)?;

    Ok(Json(ApiResponse::success(messages)))
}

#[axum::debug_handler]
pub async fn list_session_transcripts(
    State(state): State<Arc<AppConfig>>,
    Path(session_id): Path<String>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> ApiResult<Vec<SessionTranscript>> {
    let transcripts = session_service(&state, &auth)?
        .list_transcripts(&session_id)
        .await
        .map_err(map_error)?;

    Ok(Json(ApiResponse::success(transcripts)))
}

// ==============================================================================
// SYSTEM HANDLERS
// ==============================================================================

pub async fn video_health_check(State(state): State<Arc<AppConfig>>) -> ApiResult<Value> {
    if !state.is_video_configured() {
        return Ok(Json(ApiResponse::success(json!({
            "status": "not_configured",
            "video_configured": false,
            "message": "Video conferencing not configured"
        }))));
    }

    let twilio_client = TwilioVideoClient::new(&state).map_err(map_error)?;
    let twilio_healthy = twilio_client.health_check().await.unwrap_or(false);

    Ok(Json(ApiResponse::success(json!({
        "status": if twilio_healthy { "healthy" } else { "unhealthy" },
        "video_configured": true,
        "twilio_status": if twilio_healthy { "connected" } else { "error" },
        "message": if twilio_healthy {
            "Video conferencing system is operational"
        } else {
            "Video conferencing system has connectivity issues"
        }
    }))))
}

// ==============================================================================
// PROVIDER WEBHOOK
// ==============================================================================

/// Twilio status callback. Anything short of a persistence failure is acknowledged
/// with 200 so the provider does not retry it.
pub async fn twilio_webhook(
    State(dispatcher): State<Arc<WebhookDispatcher>>,
    Path(event_type): Path<String>,
    form: Result<Form<TwilioStatusCallback>, FormRejection>,
) -> (StatusCode, &'static str) {
    let Form(callback) = match form {
        Ok(form) => form,
        Err(rejection) => {
            warn!("Ignoring unparseable {} webhook: {}", event_type, rejection);
            return (StatusCode::OK, "Ignored");
        }
    };

    match dispatcher
        .dispatch(&WebhookKind::from_path(&event_type), &callback)
        .await
    {
        Ok(WebhookOutcome::Applied) => (StatusCode::OK, "OK"),
        Ok(WebhookOutcome::Ignored(_)) => (StatusCode::OK, "Ignored"),
        Err(e) => {
            error!("Twilio {} webhook failed: {}", event_type, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}
