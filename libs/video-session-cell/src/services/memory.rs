// libs/video-session-cell/src/services/memory.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    ChatMessage, NewChatMessage, NewSessionParticipant, NewSessionTranscript, NewVideoSession,
    ParticipantIdentity, SessionParticipant, SessionTranscript, StatusPatch, VideoSession,
    VideoSessionError, VideoSessionStatus,
};
use crate::services::store::{SessionKey, VideoSessionStore};

#[derive(Default)]
struct Tables {
    sessions: Vec<VideoSession>,
    participants: Vec<SessionParticipant>,
    chat_messages: Vec<ChatMessage>,
    transcripts: Vec<SessionTranscript>,
}

impl Tables {
    fn session_mut(&mut self, key: SessionKey<'_>) -> Option<&mut VideoSession> {
        self.sessions.iter_mut().find(|s| key.matches(s))
    }

    fn session_by_id_mut(&mut self, id: Uuid) -> Result<&mut VideoSession, VideoSessionError> {
        self.sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(VideoSessionError::SessionNotFound)
    }

    fn participant_mut(&mut self, video_session_id: Uuid, user_id: &str) -> Option<&mut SessionParticipant> {
        self.participants
            .iter_mut()
            .find(|p| p.video_session_id == video_session_id && p.user_id == user_id)
    }
}

/// Process-local store with the same atomicity guarantees as the Supabase schema:
/// every operation runs under a single write lock.
#[derive(Default)]
pub struct InMemoryVideoSessionStore {
    tables: RwLock<Tables>,
}

impl InMemoryVideoSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn session_count(&self) -> usize {
        self.tables.read().await.sessions.len()
    }
}

#[async_trait]
impl VideoSessionStore for InMemoryVideoSessionStore {
    async fn find_session(&self, key: SessionKey<'_>) -> Result<Option<VideoSession>, VideoSessionError> {
        let tables = self.tables.read().await;
        Ok(tables.sessions.iter().find(|s| key.matches(s)).cloned())
    }

    async fn insert_session_if_absent(&self, session: &NewVideoSession) -> Result<VideoSession, VideoSessionError> {
        let mut tables = self.tables.write().await;

        if let Some(existing) = tables
            .sessions
            .iter()
            .find(|s| s.session_id == session.session_id)
        {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let row = VideoSession {
            id: Uuid::new_v4(),
            session_id: session.session_id.clone(),
            room_name: session.room_name.clone(),
            room_sid: None,
            status: session.status,
            started_at: None,
            ended_at: None,
            participant_count: session.participant_count,
            max_participants: session.max_participants,
            recording_sid: None,
            recording_url: None,
            created_at: now,
            updated_at: now,
        };
        tables.sessions.push(row.clone());
        Ok(row)
    }

    async fn set_room_sid(&self, key: SessionKey<'_>, room_sid: &str) -> Result<(), VideoSessionError> {
        let mut tables = self.tables.write().await;
        if let Some(session) = tables.session_mut(key) {
            session.room_sid = Some(room_sid.to_string());
            session.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        key: SessionKey<'_>,
        expected: VideoSessionStatus,
        patch: &StatusPatch,
    ) -> Result<bool, VideoSessionError> {
        let mut tables = self.tables.write().await;
        match tables.session_mut(key) {
            Some(session) if session.status == expected => {
                patch.apply_to(session, Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_recording(
        &self,
        key: SessionKey<'_>,
        recording_sid: &str,
        recording_url: &str,
    ) -> Result<bool, VideoSessionError> {
        let mut tables = self.tables.write().await;
        match tables.session_mut(key) {
            Some(session) => {
                session.recording_sid = Some(recording_sid.to_string());
                session.recording_url = Some(recording_url.to_string());
                session.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn decrement_participant_count(&self, video_session_id: Uuid) -> Result<i32, VideoSessionError> {
        let mut tables = self.tables.write().await;
        let session = tables.session_by_id_mut(video_session_id)?;
        session.participant_count = (session.participant_count - 1).max(0);
        Ok(session.participant_count)
    }

    async fn insert_participant(
        &self,
        participant: &NewSessionParticipant,
    ) -> Result<SessionParticipant, VideoSessionError> {
        let mut tables = self.tables.write().await;

        if tables
            .participant_mut(participant.video_session_id, &participant.user_id)
            .is_some()
        {
            return Err(VideoSessionError::DuplicateRecord {
                message: format!(
                    "participant {} already recorded for session {}",
                    participant.user_id, participant.video_session_id
                ),
            });
        }

        let row = SessionParticipant {
            id: Uuid::new_v4(),
            video_session_id: participant.video_session_id,
            user_id: participant.user_id.clone(),
            user_type: participant.user_type,
            identity: participant.identity.clone(),
            joined_at: None,
            left_at: None,
            connection_duration_seconds: None,
            access_token_issued_at: Some(participant.access_token_issued_at),
            access_token_expires_at: Some(participant.access_token_expires_at),
            created_at: Utc::now(),
        };
        tables.participants.push(row.clone());
        Ok(row)
    }

    async fn find_participant(
        &self,
        video_session_id: Uuid,
        user_id: &str,
    ) -> Result<Option<SessionParticipant>, VideoSessionError> {
        let tables = self.tables.read().await;
        Ok(tables
            .participants
            .iter()
            .find(|p| p.video_session_id == video_session_id && p.user_id == user_id)
            .cloned())
    }

    async fn refresh_participant_credential(
        &self,
        participant: &NewSessionParticipant,
    ) -> Result<(), VideoSessionError> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.participant_mut(participant.video_session_id, &participant.user_id) {
            existing.access_token_issued_at = Some(participant.access_token_issued_at);
            existing.access_token_expires_at = Some(participant.access_token_expires_at);
        }
        Ok(())
    }

    async fn connect_participant(
        &self,
        video_session_id: Uuid,
        identity: &ParticipantIdentity,
        at: DateTime<Utc>,
    ) -> Result<Option<i32>, VideoSessionError> {
        let mut tables = self.tables.write().await;
        tables.session_by_id_mut(video_session_id)?;

        let position = tables
            .participants
            .iter()
            .position(|p| p.video_session_id == video_session_id && p.user_id == identity.user_id);

        match position {
            Some(i) if tables.participants[i].is_connected() => return Ok(None),
            Some(i) => {
                let existing = &mut tables.participants[i];
                existing.user_type = identity.user_type;
                existing.identity = identity.to_string();
                existing.joined_at = Some(at);
                existing.left_at = None;
                existing.connection_duration_seconds = None;
            }
            None => tables.participants.push(SessionParticipant {
                id: Uuid::new_v4(),
                video_session_id,
                user_id: identity.user_id.clone(),
                user_type: identity.user_type,
                identity: identity.to_string(),
                joined_at: Some(at),
                left_at: None,
                connection_duration_seconds: None,
                access_token_issued_at: None,
                access_token_expires_at: None,
                created_at: Utc::now(),
            }),
        }

        let session = tables.session_by_id_mut(video_session_id)?;
        session.participant_count = (session.participant_count + 1).min(session.max_participants);
        Ok(Some(session.participant_count))
    }

    async fn mark_participant_left(
        &self,
        video_session_id: Uuid,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<SessionParticipant>, VideoSessionError> {
        let mut tables = self.tables.write().await;

        match tables.participant_mut(video_session_id, user_id) {
            Some(participant) if participant.is_connected() => {
                participant.left_at = Some(at);
                participant.connection_duration_seconds = participant
                    .joined_at
                    .map(|joined_at| (at - joined_at).num_seconds().max(0));
                Ok(Some(participant.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn list_participants(&self, video_session_id: Uuid) -> Result<Vec<SessionParticipant>, VideoSessionError> {
        let tables = self.tables.read().await;
        Ok(tables
            .participants
            .iter()
            .filter(|p| p.video_session_id == video_session_id)
            .cloned()
            .collect())
    }

    async fn insert_chat_message(&self, message: &NewChatMessage) -> Result<ChatMessage, VideoSessionError> {
        let mut tables = self.tables.write().await;
        let row = ChatMessage {
            id: Uuid::new_v4(),
            video_session_id: message.video_session_id,
            sender_id: message.sender_id.clone(),
            sender_type: message.sender_type,
            message: message.message.clone(),
            created_at: Utc::now(),
        };
        tables.chat_messages.push(row.clone());
        Ok(row)
    }

    async fn list_chat_messages(&self, video_session_id: Uuid) -> Result<Vec<ChatMessage>, VideoSessionError> {
        let tables = self.tables.read().await;
        Ok(tables
            .chat_messages
            .iter()
            .filter(|m| m.video_session_id == video_session_id)
            .cloned()
            .collect())
    }

    async fn insert_transcript(
        &self,
        transcript: &NewSessionTranscript,
    ) -> Result<SessionTranscript, VideoSessionError> {
        let mut tables = self.tables.write().await;
        let row = SessionTranscript {
            id: Uuid::new_v4(),
            video_session_id: transcript.video_session_id,
            recording_sid: transcript.recording_sid.clone(),
            transcription_sid: transcript.transcription_sid.clone(),
            transcript_text: transcript.transcript_text.clone(),
            created_at: Utc::now(),
        };
        tables.transcripts.push(row.clone());
        Ok(row)
    }

    async fn list_transcripts(&self, video_session_id: Uuid) -> Result<Vec<SessionTranscript>, VideoSessionError> {
        let tables = self.tables.read().await;
        Ok(tables
            .transcripts
            .iter()
            .filter(|t| t.video_session_id == video_session_id)
            .cloned()
            .collect())
    }
}
