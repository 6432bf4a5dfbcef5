// libs/video-session-cell/src/services/session.rs
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use shared_config::AppConfig;

use crate::models::{
    AccessCredential, ChatMessage, NewChatMessage, NewSessionParticipant, NewVideoSession,
    ParticipantIdentity, ParticipantType, SessionParticipant, SessionTranscript, VideoSession,
    VideoSessionError, VideoSessionStatus,
};
use crate::services::credentials::{CredentialIssuer, TwilioAccessTokenIssuer};
use crate::services::store::{
    transition_status, SessionKey, SupabaseVideoSessionStore, VideoSessionStore,
};
use crate::services::twilio::{TwilioVideoClient, VideoProvider};

/// Session lifecycle as seen by the practitioner and client apps.
pub struct VideoSessionService {
    store: Arc<dyn VideoSessionStore>,
    provider: Arc<dyn VideoProvider>,
    issuer: Arc<dyn CredentialIssuer>,
}

impl VideoSessionService {
    pub fn new(
        store: Arc<dyn VideoSessionStore>,
        provider: Arc<dyn VideoProvider>,
        issuer: Arc<dyn CredentialIssuer>,
    ) -> Self {
        Self {
            store,
            provider,
            issuer,
        }
    }

    /// Wires the Supabase store (scoped to the caller's token) with the Twilio clients.
    pub fn from_config(config: &AppConfig, auth_token: &str) -> Result<Self, VideoSessionError> {
        Ok(Self::new(
            Arc::new(SupabaseVideoSessionStore::for_user(config, auth_token)),
            Arc::new(TwilioVideoClient::new(config)?),
            Arc::new(TwilioAccessTokenIssuer::new(config)?),
        ))
    }

    async fn require_session(&self, session_id: &str) -> Result<VideoSession, VideoSessionError> {
        self.store
            .find_session(SessionKey::SessionId(session_id))
            .await?
            .ok_or(VideoSessionError::SessionNotFound)
    }

    /// Creates the session row if needed and makes sure a provider room exists.
    #[instrument(skip(self))]
    pub async fn start_session(&self, session_id: &str) -> Result<VideoSession, VideoSessionError> {
        let mut session = self
            .store
            .insert_session_if_absent(&NewVideoSession::for_session(session_id))
            .await?;

        if session.room_sid.is_some() {
            debug!("Session {} already has room {:?}", session_id, session.room_sid);
            return Ok(session);
        }

        match self.provider.create_room(&session.room_name).await {
            Ok(room) => {
                self.store
                    .set_room_sid(SessionKey::SessionId(session_id), &room.sid)
                    .await?;
                session.room_sid = Some(room.sid);
            }
            Err(e) => {
                // Twilio rejects duplicate unique names; the room stays usable.
                warn!("Room creation failed, might already exist: {}", e);
            }
        }

        info!("Video session {} started in room {}", session_id, session.room_name);
        Ok(session)
    }

    /// Issues a credential for the caller, creating the session on first use.
    #[instrument(skip(self))]
    pub async fn join_session(
        &self,
        session_id: &str,
        user_id: &str,
        user_type: ParticipantType,
    ) -> Result<AccessCredential, VideoSessionError> {
        let session = match self.store.find_session(SessionKey::SessionId(session_id)).await {
            Ok(Some(session)) => session,
            Ok(None) => self.start_session(session_id).await.map_err(|e| {
                error!("Failed to create session {} on join: {}", session_id, e);
                VideoSessionError::SessionCreationFailed {
                    message: e.to_string(),
                }
            })?,
            Err(e) => {
                return Err(VideoSessionError::SessionCreationFailed {
                    message: e.to_string(),
                })
            }
        };

        if session.status.is_terminal() {
            return Err(VideoSessionError::SessionClosed {
                status: session.status,
            });
        }

        let issued_at = Utc::now();
        let credential = self
            .issuer
            .issue(session_id, user_id, user_type)
            .await
            .map_err(|e| match e {
                VideoSessionError::CredentialIssuanceFailed { .. } => e,
                other => VideoSessionError::CredentialIssuanceFailed {
                    message: other.to_string(),
                },
            })?;

        let identity = ParticipantIdentity::new(user_type, user_id);
        let participant =
            NewSessionParticipant::from_credential(session.id, &identity, &credential, issued_at);

        match self.store.insert_participant(&participant).await {
            Ok(_) => {}
            Err(VideoSessionError::DuplicateRecord { message }) => {
                info!("Participant {} re-joined session {}: {}", identity, session_id, message);
                self.store.refresh_participant_credential(&participant).await?;
            }
            Err(e) => return Err(e),
        }

        info!("Issued credential for {} in {}", identity, credential.room);
        Ok(credential)
    }

    /// Completes the session. Closing the provider room is best-effort.
    #[instrument(skip(self))]
    pub async fn end_session(&self, session_id: &str) -> Result<VideoSession, VideoSessionError> {
        self.close_session(session_id, VideoSessionStatus::Completed).await
    }

    #[instrument(skip(self))]
    pub async fn cancel_session(&self, session_id: &str) -> Result<VideoSession, VideoSessionError> {
        self.close_session(session_id, VideoSessionStatus::Cancelled).await
    }

    async fn close_session(
        &self,
        session_id: &str,
        status: VideoSessionStatus,
    ) -> Result<VideoSession, VideoSessionError> {
        let session = self.require_session(session_id).await?;

        if let Some(room_sid) = session.room_sid.as_deref() {
            if let Err(e) = self.provider.complete_room(room_sid).await {
                warn!("Failed to complete room {}: {}", room_sid, e);
            }
        }

        let session = transition_status(
            self.store.as_ref(),
            SessionKey::SessionId(session_id),
            status,
            Utc::now(),
        )
        .await?;

        info!("Video session {} is now {}", session_id, session.status);
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<VideoSession>, VideoSessionError> {
        self.store.find_session(SessionKey::SessionId(session_id)).await
    }

    pub async fn list_participants(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionParticipant>, VideoSessionError> {
        let session = self.require_session(session_id).await?;
        self.store.list_participants(session.id).await
    }

    #[instrument(skip(self, message))]
    pub async fn send_chat_message(
        &self,
        session_id: &str,
        sender_id: &str,
        sender_type: ParticipantType,
        message: &str,
    ) -> Result<ChatMessage, VideoSessionError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(VideoSessionError::ValidationError {
                message: "Message cannot be empty".to_string(),
            });
        }

        let session = self.require_session(session_id).await?;
        self.store
            .insert_chat_message(&NewChatMessage {
                video_session_id: session.id,
                sender_id: sender_id.to_string(),
                sender_type,
                message: message.to_string(),
            })
            .await
    }

    pub async fn list_chat_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, VideoSessionError> {
        let session = self.require_session(session_id).await?;
        self.store.list_chat_messages(session.id).await
    }

    pub async fn list_transcripts(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionTranscript>, VideoSessionError> {
        let session = self.require_session(session_id).await?;
        self.store.list_transcripts(session.id).await
    }
}
