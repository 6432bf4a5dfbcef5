// libs/video-session-cell/src/models.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_database::DatabaseError;

/// One practitioner and one client per room.
pub const MAX_PARTICIPANTS: i32 = 2;

/// Provider room name for an appointment's session.
pub fn room_name_for(session_id: &str) -> String {
    format!("session-{}", session_id)
}

// ==============================================================================
// VIDEO SESSION
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoSession {
    pub id: Uuid,
    /// Appointment this session belongs to.
    pub session_id: String,
    pub room_name: String,
    pub room_sid: Option<String>,
    pub status: VideoSessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub participant_count: i32,
    pub max_participants: i32,
    pub recording_sid: Option<String>,
    pub recording_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row written when a session is first activated for video.
#[derive(Debug, Clone, Serialize)]
pub struct NewVideoSession {
    pub session_id: String,
    pub room_name: String,
    pub status: VideoSessionStatus,
    pub participant_count: i32,
    pub max_participants: i32,
}

impl NewVideoSession {
    pub fn for_session(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            room_name: room_name_for(session_id),
            status: VideoSessionStatus::Scheduled,
            participant_count: 0,
            max_participants: MAX_PARTICIPANTS,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VideoSessionStatus {
    Scheduled,
    Active,
    Completed,
    Cancelled,
    Failed,
}

impl VideoSessionStatus {
    /// Maps the provider's room status vocabulary onto ours.
    pub fn from_provider(status: &str) -> Self {
        match status {
            "in-progress" => VideoSessionStatus::Active,
            "completed" => VideoSessionStatus::Completed,
            "failed" => VideoSessionStatus::Failed,
            _ => VideoSessionStatus::Scheduled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoSessionStatus::Scheduled => "scheduled",
            VideoSessionStatus::Active => "active",
            VideoSessionStatus::Completed => "completed",
            VideoSessionStatus::Cancelled => "cancelled",
            VideoSessionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VideoSessionStatus::Completed | VideoSessionStatus::Cancelled | VideoSessionStatus::Failed
        )
    }

    pub fn can_transition_to(&self, next: VideoSessionStatus) -> bool {
        use VideoSessionStatus::*;
        match (self, next) {
            (Scheduled, Active | Completed | Cancelled | Failed) => true,
            (Active, Completed | Cancelled | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for VideoSessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field changes produced by a status transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusPatch {
    pub status: VideoSessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl StatusPatch {
    pub fn apply_to(&self, session: &mut VideoSession, at: DateTime<Utc>) {
        session.status = self.status;
        if let Some(started_at) = self.started_at {
            session.started_at = Some(started_at);
        }
        if let Some(ended_at) = self.ended_at {
            session.ended_at = Some(ended_at);
        }
        session.updated_at = at;
    }
}

/// Plans moving `session` to `next`.
///
/// Returns `Ok(None)` when the session is already in `next` (duplicate deliveries are no-ops),
/// and `InvalidStatusTransition` for moves out of a terminal state or backwards.
/// Timestamps are only stamped when still unset.
pub fn plan_status_change(
    session: &VideoSession,
    next: VideoSessionStatus,
    at: DateTime<Utc>,
) -> Result<Option<StatusPatch>, VideoSessionError> {
    if session.status == next {
        return Ok(None);
    }

    if !session.status.can_transition_to(next) {
        return Err(VideoSessionError::InvalidStatusTransition {
            from: session.status,
            to: next,
        });
    }

    let started_at = match next {
        VideoSessionStatus::Active if session.started_at.is_none() => Some(at),
        _ => None,
    };
    let ended_at = match next {
        VideoSessionStatus::Completed if session.ended_at.is_none() => Some(at),
        _ => None,
    };

    Ok(Some(StatusPatch {
        status: next,
        started_at,
        ended_at,
    }))
}

// ==============================================================================
// PARTICIPANTS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantType {
    Practitioner,
    Client,
}

impl ParticipantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantType::Practitioner => "practitioner",
            ParticipantType::Client => "client",
        }
    }
}

impl fmt::Display for ParticipantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParticipantType {
    type Err = VideoSessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "practitioner" => Ok(ParticipantType::Practitioner),
            "client" => Ok(ParticipantType::Client),
            other => Err(VideoSessionError::ValidationError {
                message: format!("Unknown participant type: {}", other),
            }),
        }
    }
}

/// Provider-side participant label, `{user_type}-{user_id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantIdentity {
    pub user_type: ParticipantType,
    pub user_id: String,
}

impl ParticipantIdentity {
    pub fn new(user_type: ParticipantType, user_id: impl Into<String>) -> Self {
        Self {
            user_type,
            user_id: user_id.into(),
        }
    }
}

impl fmt::Display for ParticipantIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.user_type, self.user_id)
    }
}

impl FromStr for ParticipantIdentity {
    type Err = VideoSessionError;

    // User ids may themselves contain dashes, the type never does.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VideoSessionError::InvalidIdentity {
            identity: s.to_string(),
        };

        let (user_type, user_id) = s.split_once('-').ok_or_else(invalid)?;
        if user_id.is_empty() {
            return Err(invalid());
        }
        let user_type = user_type.parse().map_err(|_| invalid())?;

        Ok(Self::new(user_type, user_id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionParticipant {
    pub id: Uuid,
    pub video_session_id: Uuid,
    pub user_id: String,
    pub user_type: ParticipantType,
    pub identity: String,
    pub joined_at: Option<DateTime<Utc>>,
    pub left_at: Option<DateTime<Utc>>,
    pub connection_duration_seconds: Option<i64>,
    pub access_token_issued_at: Option<DateTime<Utc>>,
    pub access_token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SessionParticipant {
    pub fn is_connected(&self) -> bool {
        self.joined_at.is_some() && self.left_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewSessionParticipant {
    pub video_session_id: Uuid,
    pub user_id: String,
    pub user_type: ParticipantType,
    pub identity: String,
    pub access_token_issued_at: DateTime<Utc>,
    pub access_token_expires_at: DateTime<Utc>,
}

impl NewSessionParticipant {
    pub fn from_credential(
        video_session_id: Uuid,
        identity: &ParticipantIdentity,
        credential: &AccessCredential,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            video_session_id,
            user_id: identity.user_id.clone(),
            user_type: identity.user_type,
            identity: identity.to_string(),
            access_token_issued_at: issued_at,
            access_token_expires_at: credential.expires_at,
        }
    }
}

/// Short-lived credential a participant uses to connect to the provider room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessCredential {
    pub token: String,
    pub identity: String,
    pub room: String,
    pub expires_at: DateTime<Utc>,
}

// ==============================================================================
// CHAT & TRANSCRIPTS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: Uuid,
    pub video_session_id: Uuid,
    pub sender_id: String,
    pub sender_type: ParticipantType,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewChatMessage {
    pub video_session_id: Uuid,
    pub sender_id: String,
    pub sender_type: ParticipantType,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionTranscript {
    pub id: Uuid,
    pub video_session_id: Uuid,
    pub recording_sid: String,
    pub transcription_sid: Option<String>,
    pub transcript_text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewSessionTranscript {
    pub video_session_id: Uuid,
    pub recording_sid: String,
    pub transcription_sid: Option<String>,
    pub transcript_text: String,
}

// ==============================================================================
// TWILIO VIDEO API MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRoom {
    pub sid: String,
    pub unique_name: String,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderTranscription {
    pub sid: String,
    pub status: Option<String>,
    #[serde(alias = "transcript")]
    pub text: Option<String>,
}

// ==============================================================================
// WEBHOOK MODELS
// ==============================================================================

/// Trailing path segment of the webhook endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookKind {
    RoomStatus,
    Recording,
    Participant,
    Unknown(String),
}

impl WebhookKind {
    pub fn from_path(segment: &str) -> Self {
        match segment {
            "room-status" => WebhookKind::RoomStatus,
            "recording" => WebhookKind::Recording,
            "participant" => WebhookKind::Participant,
            other => WebhookKind::Unknown(other.to_string()),
        }
    }
}

/// Form body of a Twilio Video status callback. Only the fields we consume are listed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TwilioStatusCallback {
    pub room_name: Option<String>,
    pub room_sid: Option<String>,
    pub room_status: Option<String>,
    pub status_callback_event: Option<String>,
    pub participant_identity: Option<String>,
    pub participant_sid: Option<String>,
    pub recording_sid: Option<String>,
}

impl TwilioStatusCallback {
    pub fn require_room_name(&self) -> Result<&str, VideoSessionError> {
        self.room_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| VideoSessionError::ValidationError {
                message: "RoomName missing from callback".to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantEventKind {
    Connected,
    Disconnected,
    Other(String),
}

impl ParticipantEventKind {
    pub fn from_event(event: &str) -> Self {
        match event {
            "participant-connected" => ParticipantEventKind::Connected,
            "participant-disconnected" => ParticipantEventKind::Disconnected,
            other => ParticipantEventKind::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied,
    Ignored(String),
}

// ==============================================================================
// API REQUEST MODELS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct JoinSessionRequest {
    /// Falls back to the role carried by the caller's token.
    pub user_type: Option<ParticipantType>,
}

#[derive(Debug, Deserialize)]
pub struct SendChatMessageRequest {
    pub message: String,
    pub sender_type: Option<ParticipantType>,
}

// ==============================================================================
// ERROR HANDLING
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum VideoSessionError {
    #[error("Video session not found")]
    SessionNotFound,

    #[error("Failed to create video session: {message}")]
    SessionCreationFailed { message: String },

    #[error("Failed to issue access credential: {message}")]
    CredentialIssuanceFailed { message: String },

    #[error("Video provider error during {operation}: {message}")]
    ProviderError { operation: String, message: String },

    #[error("Persistence failure: {message}")]
    PersistenceFailure { message: String },

    #[error("Duplicate record: {message}")]
    DuplicateRecord { message: String },

    #[error("Cannot move video session from {from} to {to}")]
    InvalidStatusTransition {
        from: VideoSessionStatus,
        to: VideoSessionStatus,
    },

    #[error("Video session is closed ({status})")]
    SessionClosed { status: VideoSessionStatus },

    #[error("Malformed participant identity: {identity}")]
    InvalidIdentity { identity: String },

    #[error("Video conferencing not configured")]
    NotConfigured,

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

impl VideoSessionError {
    pub fn provider(operation: &str, message: impl Into<String>) -> Self {
        VideoSessionError::ProviderError {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Business-level failures a webhook acknowledges instead of asking the provider to retry.
    pub fn is_acknowledgeable(&self) -> bool {
        matches!(
            self,
            VideoSessionError::SessionNotFound
                | VideoSessionError::InvalidIdentity { .. }
                | VideoSessionError::InvalidStatusTransition { .. }
                | VideoSessionError::ValidationError { .. }
        )
    }
}

impl From<DatabaseError> for VideoSessionError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Conflict(message) => VideoSessionError::DuplicateRecord { message },
            other => VideoSessionError::PersistenceFailure {
                message: other.to_string(),
            },
        }
    }
}
