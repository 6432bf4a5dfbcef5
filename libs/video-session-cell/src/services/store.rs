// libs/video-session-cell/src/services/store.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{Prefer, SupabaseClient};

use crate::models::{
    plan_status_change, ChatMessage, NewChatMessage, NewSessionParticipant,
    NewSessionTranscript, NewVideoSession, ParticipantIdentity, SessionParticipant,
    SessionTranscript, StatusPatch, VideoSession, VideoSessionError, VideoSessionStatus,
};

/// Status writes that lose a compare-and-set race are re-read and re-planned this many times.
const MAX_STATUS_WRITE_ATTEMPTS: usize = 3;

/// How a writer addresses a session row. Webhooks only know the room name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKey<'a> {
    SessionId(&'a str),
    RoomName(&'a str),
}

impl SessionKey<'_> {
    pub fn column(&self) -> &'static str {
        match self {
            SessionKey::SessionId(_) => "session_id",
            SessionKey::RoomName(_) => "room_name",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            SessionKey::SessionId(v) | SessionKey::RoomName(v) => v,
        }
    }

    pub fn matches(&self, session: &VideoSession) -> bool {
        match self {
            SessionKey::SessionId(v) => session.session_id == *v,
            SessionKey::RoomName(v) => session.room_name == *v,
        }
    }
}

/// Persistence boundary for video sessions and their child records.
///
/// Implementations must make `insert_session_if_absent`, `connect_participant`, the participant
/// counter and `compare_and_set_status` atomic with respect to concurrent callers.
#[async_trait]
pub trait VideoSessionStore: Send + Sync {
    async fn find_session(&self, key: SessionKey<'_>) -> Result<Option<VideoSession>, VideoSessionError>;

    /// Inserts the row unless one already exists for the session id; returns the stored row either way.
    async fn insert_session_if_absent(&self, session: &NewVideoSession) -> Result<VideoSession, VideoSessionError>;

    async fn set_room_sid(&self, key: SessionKey<'_>, room_sid: &str) -> Result<(), VideoSessionError>;

    /// Applies `patch` only if the row still has status `expected`. Returns whether a row was written.
    async fn compare_and_set_status(
        &self,
        key: SessionKey<'_>,
        expected: VideoSessionStatus,
        patch: &StatusPatch,
    ) -> Result<bool, VideoSessionError>;

    async fn set_recording(
        &self,
        key: SessionKey<'_>,
        recording_sid: &str,
        recording_url: &str,
    ) -> Result<bool, VideoSessionError>;

    /// Atomically subtracts one, clamped to zero. Returns the new count.
    async fn decrement_participant_count(&self, video_session_id: Uuid) -> Result<i32, VideoSessionError>;

    /// Plain insert; a second row for the same (session, user) is `DuplicateRecord`.
    async fn insert_participant(
        &self,
        participant: &NewSessionParticipant,
    ) -> Result<SessionParticipant, VideoSessionError>;

    async fn find_participant(
        &self,
        video_session_id: Uuid,
        user_id: &str,
    ) -> Result<Option<SessionParticipant>, VideoSessionError>;

    /// Records the token just issued to a returning participant on their existing row.
    async fn refresh_participant_credential(
        &self,
        participant: &NewSessionParticipant,
    ) -> Result<(), VideoSessionError>;

    /// Upserts on (video_session_id, user_id) with `joined_at = at` and `left_at` cleared, and
    /// adds one to the session's count (clamped to `max_participants`) in the same atomic step.
    ///
    /// Only a row that was not connected is written. Returns the new count, or `None` when the
    /// participant was already connected and nothing changed.
    async fn connect_participant(
        &self,
        video_session_id: Uuid,
        identity: &ParticipantIdentity,
        at: DateTime<Utc>,
    ) -> Result<Option<i32>, VideoSessionError>;

    /// Closes the currently connected row, if any.
    async fn mark_participant_left(
        &self,
        video_session_id: Uuid,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<SessionParticipant>, VideoSessionError>;

    async fn list_participants(&self, video_session_id: Uuid) -> Result<Vec<SessionParticipant>, VideoSessionError>;

    async fn insert_chat_message(&self, message: &NewChatMessage) -> Result<ChatMessage, VideoSessionError>;

    async fn list_chat_messages(&self, video_session_id: Uuid) -> Result<Vec<ChatMessage>, VideoSessionError>;

    async fn insert_transcript(
        &self,
        transcript: &NewSessionTranscript,
    ) -> Result<SessionTranscript, VideoSessionError>;

    async fn list_transcripts(&self, video_session_id: Uuid) -> Result<Vec<SessionTranscript>, VideoSessionError>;
}

/// Moves the session addressed by `key` to `next` using compare-and-set on its status.
///
/// A transition into the current status returns the row untouched, so duplicate
/// deliveries never overwrite `started_at`/`ended_at`.
pub async fn transition_status(
    store: &dyn VideoSessionStore,
    key: SessionKey<'_>,
    next: VideoSessionStatus,
    at: DateTime<Utc>,
) -> Result<VideoSession, VideoSessionError> {
    for attempt in 1..=MAX_STATUS_WRITE_ATTEMPTS {
        let mut session = store
            .find_session(key)
            .await?
            .ok_or(VideoSessionError::SessionNotFound)?;

        let Some(patch) = plan_status_change(&session, next, at)? else {
            debug!("Session {} already {}", session.session_id, next);
            return Ok(session);
        };

        if store.compare_and_set_status(key, session.status, &patch).await? {
            patch.apply_to(&mut session, at);
            return Ok(session);
        }

        debug!(
            "Status of session {} changed concurrently (attempt {}), re-reading",
            session.session_id, attempt
        );
    }

    warn!("Giving up on status change to {} for {:?}", next, key);
    Err(VideoSessionError::PersistenceFailure {
        message: format!("Concurrent status updates prevented transition to {}", next),
    })
}

// ==============================================================================
// SUPABASE IMPLEMENTATION
// ==============================================================================

const SESSIONS: &str = "/rest/v1/video_sessions";
const PARTICIPANTS: &str = "/rest/v1/video_session_participants";
const CHAT_MESSAGES: &str = "/rest/v1/video_chat_messages";
const TRANSCRIPTS: &str = "/rest/v1/video_session_transcripts";

/// PostgREST-backed store. Requests carry the caller's token so row-level security scopes them
/// to the caller's tenant; webhook writers use the service-role key instead.
pub struct SupabaseVideoSessionStore {
    supabase: Arc<SupabaseClient>,
    auth_token: String,
}

impl SupabaseVideoSessionStore {
    pub fn new(supabase: Arc<SupabaseClient>, auth_token: impl Into<String>) -> Self {
        Self {
            supabase,
            auth_token: auth_token.into(),
        }
    }

    pub fn for_user(config: &AppConfig, auth_token: &str) -> Self {
        Self::new(Arc::new(SupabaseClient::new(config)), auth_token)
    }

    pub fn for_service(config: &AppConfig) -> Self {
        Self::new(Arc::new(SupabaseClient::new(config)), config.service_key())
    }

    fn token(&self) -> Option<&str> {
        Some(&self.auth_token)
    }

    fn session_filter(key: SessionKey<'_>) -> String {
        format!("{}?{}=eq.{}", SESSIONS, key.column(), urlencoding::encode(key.value()))
    }

    fn participant_filter(video_session_id: Uuid, user_id: &str) -> String {
        format!(
            "{}?video_session_id=eq.{}&user_id=eq.{}",
            PARTICIPANTS,
            video_session_id,
            urlencoding::encode(user_id)
        )
    }

    async fn patch_sessions(
        &self,
        path: &str,
        body: Value,
    ) -> Result<Vec<VideoSession>, VideoSessionError> {
        Ok(self
            .supabase
            .request_with_prefer(Method::PATCH, path, self.token(), Some(body), Some(Prefer::Representation))
            .await?)
    }

    async fn insert_one<T, B>(&self, table: &str, body: &B) -> Result<T, VideoSessionError>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize,
    {
        let body = serde_json::to_value(body).map_err(|e| VideoSessionError::PersistenceFailure {
            message: format!("Failed to encode row for {}: {}", table, e),
        })?;

        let rows: Vec<T> = self
            .supabase
            .request_with_prefer(Method::POST, table, self.token(), Some(body), Some(Prefer::Representation))
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| VideoSessionError::PersistenceFailure {
                message: format!("Insert into {} returned no row", table),
            })
    }

}

#[async_trait]
impl VideoSessionStore for SupabaseVideoSessionStore {
    async fn find_session(&self, key: SessionKey<'_>) -> Result<Option<VideoSession>, VideoSessionError> {
        let path = format!("{}&limit=1", Self::session_filter(key));
        let rows: Vec<VideoSession> = self
            .supabase
            .request(Method::GET, &path, self.token(), None)
            .await?;

        Ok(rows.into_iter().next())
    }

    async fn insert_session_if_absent(&self, session: &NewVideoSession) -> Result<VideoSession, VideoSessionError> {
        let path = format!("{}?on_conflict=session_id", SESSIONS);
        let body = json!({
            "session_id": session.session_id,
            "room_name": session.room_name,
            "status": session.status,
            "participant_count": session.participant_count,
            "max_participants": session.max_participants,
        });

        let inserted: Vec<VideoSession> = self
            .supabase
            .request_with_prefer(Method::POST, &path, self.token(), Some(body), Some(Prefer::IgnoreDuplicates))
            .await?;

        if let Some(row) = inserted.into_iter().next() {
            return Ok(row);
        }

        // Another writer won the insert; read theirs.
        self.find_session(SessionKey::SessionId(&session.session_id))
            .await?
            .ok_or_else(|| VideoSessionError::PersistenceFailure {
                message: format!("Session {} neither inserted nor found", session.session_id),
            })
    }

    async fn set_room_sid(&self, key: SessionKey<'_>, room_sid: &str) -> Result<(), VideoSessionError> {
        self.patch_sessions(
            &Self::session_filter(key),
            json!({ "room_sid": room_sid, "updated_at": Utc::now() }),
        )
        .await?;
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        key: SessionKey<'_>,
        expected: VideoSessionStatus,
        patch: &StatusPatch,
    ) -> Result<bool, VideoSessionError> {
        let path = format!("{}&status=eq.{}", Self::session_filter(key), expected);

        let mut body = json!({ "status": patch.status, "updated_at": Utc::now() });
        if let Some(started_at) = patch.started_at {
            body["started_at"] = json!(started_at);
        }
        if let Some(ended_at) = patch.ended_at {
            body["ended_at"] = json!(ended_at);
        }

        let rows = self.patch_sessions(&path, body).await?;
        Ok(!rows.is_empty())
    }

    async fn set_recording(
        &self,
        key: SessionKey<'_>,
        recording_sid: &str,
        recording_url: &str,
    ) -> Result<bool, VideoSessionError> {
        let rows = self
            .patch_sessions(
                &Self::session_filter(key),
                json!({
                    "recording_sid": recording_sid,
                    "recording_url": recording_url,
                    "updated_at": Utc::now(),
                }),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn decrement_participant_count(&self, video_session_id: Uuid) -> Result<i32, VideoSessionError> {
        Ok(self
            .supabase
            .rpc(
                "decrement_participant_count",
                self.token(),
                json!({ "p_video_session_id": video_session_id }),
            )
            .await?)
    }

    async fn insert_participant(
        &self,
        participant: &NewSessionParticipant,
    ) -> Result<SessionParticipant, VideoSessionError> {
        self.insert_one(PARTICIPANTS, participant).await
    }

    async fn find_participant(
        &self,
        video_session_id: Uuid,
        user_id: &str,
    ) -> Result<Option<SessionParticipant>, VideoSessionError> {
        let path = format!("{}&limit=1", Self::participant_filter(video_session_id, user_id));
        let rows: Vec<SessionParticipant> = self
            .supabase
            .request(Method::GET, &path, self.token(), None)
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn refresh_participant_credential(
        &self,
        participant: &NewSessionParticipant,
    ) -> Result<(), VideoSessionError> {
        let path = Self::participant_filter(participant.video_session_id, &participant.user_id);
        let _: Value = self
            .supabase
            .request(
                Method::PATCH,
                &path,
                self.token(),
                Some(json!({
                    "access_token_issued_at": participant.access_token_issued_at,
                    "access_token_expires_at": participant.access_token_expires_at,
                })),
            )
            .await?;
        Ok(())
    }

    async fn connect_participant(
        &self,
        video_session_id: Uuid,
        identity: &ParticipantIdentity,
        at: DateTime<Utc>,
    ) -> Result<Option<i32>, VideoSessionError> {
        Ok(self
            .supabase
            .rpc(
                "connect_participant",
                self.token(),
                json!({
                    "p_video_session_id": video_session_id,
                    "p_user_id": identity.user_id,
                    "p_user_type": identity.user_type,
                    "p_identity": identity.to_string(),
                    "p_joined_at": at,
                }),
            )
            .await?)
    }

    async fn mark_participant_left(
        &self,
        video_session_id: Uuid,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<SessionParticipant>, VideoSessionError> {
        let Some(current) = self.find_participant(video_session_id, user_id).await? else {
            return Ok(None);
        };
        if !current.is_connected() {
            return Ok(None);
        }

        let duration = current
            .joined_at
            .map(|joined_at| (at - joined_at).num_seconds().max(0));

        let path = format!("{}&left_at=is.null", Self::participant_filter(video_session_id, user_id));
        let rows: Vec<SessionParticipant> = self
            .supabase
            .request_with_prefer(
                Method::PATCH,
                &path,
                self.token(),
                Some(json!({ "left_at": at, "connection_duration_seconds": duration })),
                Some(Prefer::Representation),
            )
            .await?;

        Ok(rows.into_iter().next())
    }

    async fn list_participants(&self, video_session_id: Uuid) -> Result<Vec<SessionParticipant>, VideoSessionError> {
        let path = format!(
            "{}?video_session_id=eq.{}&order=created_at.asc",
            PARTICIPANTS, video_session_id
        );
        Ok(self.supabase.request(Method::GET, &path, self.token(), None).await?)
    }

    async fn insert_chat_message(&self, message: &NewChatMessage) -> Result<ChatMessage, VideoSessionError> {
        self.insert_one(CHAT_MESSAGES, message).await
    }

    async fn list_chat_messages(&self, video_session_id: Uuid) -> Result<Vec<ChatMessage>, VideoSessionError> {
        let path = format!(
            "{}?video_session_id=eq.{}&order=created_at.asc",
            CHAT_MESSAGES, video_session_id
        );
        Ok(self.supabase.request(Method::GET, &path, self.token(), None).await?)
    }

    async fn insert_transcript(
        &self,
        transcript: &NewSessionTranscript,
    ) -> Result<SessionTranscript, VideoSessionError> {
        self.insert_one(TRANSCRIPTS, transcript).await
    }

    async fn list_transcripts(&self, video_session_id: Uuid) -> Result<Vec<SessionTranscript>, VideoSessionError> {
        let path = format!(
            "{}?video_session_id=eq.{}&order=created_at.asc",
            TRANSCRIPTS, video_session_id
        );
        Ok(self.supabase.request(Method::GET, &path, self.token(), None).await?)
    }
}
