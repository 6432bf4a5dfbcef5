#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::task::yield_now;
use uuid::Uuid;

use video_session_cell::models::{
    room_name_for, AccessCredential, ChatMessage, NewChatMessage, NewSessionParticipant,
    NewSessionTranscript, NewVideoSession, ParticipantIdentity, ParticipantType, ProviderRoom,
    ProviderTranscription, SessionParticipant, SessionTranscript, StatusPatch, VideoSession,
    VideoSessionError, VideoSessionStatus,
};
use video_session_cell::services::{
    CredentialIssuer, InMemoryVideoSessionStore, SessionKey, VideoProvider, VideoSessionService,
    VideoSessionStore, WebhookDispatcher,
};

/// Scripted video provider that records the calls made to it.
#[derive(Default)]
pub struct FakeProvider {
    pub fail_create: bool,
    pub fail_transcription: bool,
    pub transcription_text: Option<String>,
    pub created_rooms: Mutex<Vec<String>>,
    pub completed_rooms: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn with_transcription(text: &str) -> Self {
        Self {
            transcription_text: Some(text.to_string()),
            ..Default::default()
        }
    }

    pub fn created_rooms(&self) -> Vec<String> {
        self.created_rooms.lock().unwrap().clone()
    }

    pub fn completed_rooms(&self) -> Vec<String> {
        self.completed_rooms.lock().unwrap().clone()
    }
}

#[async_trait]
impl VideoProvider for FakeProvider {
    async fn create_room(&self, room_name: &str) -> Result<ProviderRoom, VideoSessionError> {
        self.created_rooms.lock().unwrap().push(room_name.to_string());
        if self.fail_create {
            return Err(VideoSessionError::provider("create_room", "HTTP 400: Room exists"));
        }
        Ok(ProviderRoom {
            sid: format!("RM-{}", room_name),
            unique_name: room_name.to_string(),
            status: Some("in-progress".to_string()),
        })
    }

    async fn complete_room(&self, room_sid: &str) -> Result<(), VideoSessionError> {
        self.completed_rooms.lock().unwrap().push(room_sid.to_string());
        Ok(())
    }

    async fn fetch_transcription(
        &self,
        recording_sid: &str,
    ) -> Result<Option<ProviderTranscription>, VideoSessionError> {
        if self.fail_transcription {
            return Err(VideoSessionError::provider("fetch_transcription", "HTTP 503"));
        }
        Ok(self.transcription_text.as_ref().map(|text| ProviderTranscription {
            sid: format!("TR-{}", recording_sid),
            status: Some("completed".to_string()),
            text: Some(text.clone()),
        }))
    }

    fn recording_media_url(&self, recording_sid: &str) -> String {
        format!("https://video.example.com/v1/Recordings/{}/Media", recording_sid)
    }
}

/// Issues opaque tokens, or fails every call when `fail` is set.
#[derive(Default)]
pub struct FakeIssuer {
    pub fail: bool,
    pub issued: AtomicUsize,
}

impl FakeIssuer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl CredentialIssuer for FakeIssuer {
    async fn issue(
        &self,
        session_id: &str,
        user_id: &str,
        user_type: ParticipantType,
    ) -> Result<AccessCredential, VideoSessionError> {
        if self.fail {
            return Err(VideoSessionError::CredentialIssuanceFailed {
                message: "signing key unavailable".to_string(),
            });
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(AccessCredential {
            token: format!("token-{}", n),
            identity: ParticipantIdentity::new(user_type, user_id).to_string(),
            room: room_name_for(session_id),
            expires_at: Utc::now() + Duration::hours(1) + Duration::seconds(n as i64),
        })
    }
}

pub struct Harness {
    pub store: Arc<InMemoryVideoSessionStore>,
    pub provider: Arc<FakeProvider>,
    pub issuer: Arc<FakeIssuer>,
    backend: Arc<dyn VideoSessionStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(FakeProvider::default(), FakeIssuer::default())
    }

    pub fn with(provider: FakeProvider, issuer: FakeIssuer) -> Self {
        let store = Arc::new(InMemoryVideoSessionStore::new());
        Self {
            backend: store.clone(),
            store,
            provider: Arc::new(provider),
            issuer: Arc::new(issuer),
        }
    }

    /// Services built from this harness suspend on every store call, so concurrent
    /// requests interleave the way they do against a remote database.
    pub fn interleaved() -> Self {
        let mut harness = Self::new();
        harness.backend = Arc::new(YieldingStore::new(harness.store.clone()));
        harness
    }

    pub fn service(&self) -> VideoSessionService {
        VideoSessionService::new(self.backend.clone(), self.provider.clone(), self.issuer.clone())
    }

    pub fn dispatcher(&self) -> WebhookDispatcher {
        WebhookDispatcher::new(self.backend.clone(), self.provider.clone())
    }

    pub async fn session(&self, session_id: &str) -> VideoSession {
        self.store
            .find_session(SessionKey::SessionId(session_id))
            .await
            .unwrap()
            .expect("session row should exist")
    }
}

/// Delegates to an in-memory store after yielding to the scheduler once per call.
pub struct YieldingStore {
    inner: Arc<InMemoryVideoSessionStore>,
}

impl YieldingStore {
    pub fn new(inner: Arc<InMemoryVideoSessionStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl VideoSessionStore for YieldingStore {
    async fn find_session(&self, key: SessionKey<'_>) -> Result<Option<VideoSession>, VideoSessionError> {
        yield_now().await;
        self.inner.find_session(key).await
    }
    async fn insert_session_if_absent(&self, session: &NewVideoSession) -> Result<VideoSession, VideoSessionError> {
        yield_now().await;
        self.inner.insert_session_if_absent(session).await
    }
    async fn set_room_sid(&self, key: SessionKey<'_>, room_sid: &str) -> Result<(), VideoSessionError> {
        yield_now().await;
        self.inner.set_room_sid(key, room_sid).await
    }
    async fn compare_and_set_status(
        &self,
        key: SessionKey<'_>,
        expected: VideoSessionStatus,
        patch: &StatusPatch,
    ) -> Result<bool, VideoSessionError> {
        yield_now().await;
        self.inner.compare_and_set_status(key, expected, patch).await
    }
    async fn set_recording(&self, key: SessionKey<'_>, sid: &str, url: &str) -> Result<bool, VideoSessionError> {
        yield_now().await;
        self.inner.set_recording(key, sid, url).await
    }
    async fn decrement_participant_count(&self, id: Uuid) -> Result<i32, VideoSessionError> {
        yield_now().await;
        self.inner.decrement_participant_count(id).await
    }
    async fn insert_participant(
        &self,
        participant: &NewSessionParticipant,
    ) -> Result<SessionParticipant, VideoSessionError> {
        yield_now().await;
        self.inner.insert_participant(participant).await
    }
    async fn find_participant(&self, id: Uuid, user_id: &str) -> Result<Option<SessionParticipant>, VideoSessionError> {
        yield_now().await;
        self.inner.find_participant(id, user_id).await
    }
    async fn refresh_participant_credential(
        &self,
        participant: &NewSessionParticipant,
    ) -> Result<(), VideoSessionError> {
        yield_now().await;
        self.inner.refresh_participant_credential(participant).await
    }
    async fn connect_participant(
        &self,
        id: Uuid,
        identity: &ParticipantIdentity,
        at: DateTime<Utc>,
    ) -> Result<Option<i32>, VideoSessionError> {
        yield_now().await;
        self.inner.connect_participant(id, identity, at).await
    }
    async fn mark_participant_left(
        &self,
        id: Uuid,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<SessionParticipant>, VideoSessionError> {
        yield_now().await;
        self.inner.mark_participant_left(id, user_id, at).await
    }
    async fn list_participants(&self, id: Uuid) -> Result<Vec<SessionParticipant>, VideoSessionError> {
        yield_now().await;
        self.inner.list_participants(id).await
    }
    async fn insert_chat_message(&self, message: &NewChatMessage) -> Result<ChatMessage, VideoSessionError> {
        yield_now().await;
        self.inner.insert_chat_message(message).await
    }
    async fn list_chat_messages(&self, id: Uuid) -> Result<Vec<ChatMessage>, VideoSessionError> {
        yield_now().await;
        self.inner.list_chat_messages(id).await
    }
    async fn insert_transcript(
        &self,
        transcript: &NewSessionTranscript,
    ) -> Result<SessionTranscript, VideoSessionError> {
        yield_now().await;
        self.inner.insert_transcript(transcript).await
    }
    async fn list_transcripts(&self, id: Uuid) -> Result<Vec<SessionTranscript>, VideoSessionError> {
        yield_now().await;
        self.inner.list_transcripts(id).await
    }
}

/// Store whose every operation fails as if the database were unreachable.
pub struct UnavailableStore;

fn unavailable<T>() -> Result<T, VideoSessionError> {
    Err(VideoSessionError::PersistenceFailure {
        message: "connection refused".to_string(),
    })
}

#[async_trait]
impl VideoSessionStore for UnavailableStore {
    async fn find_session(&self, _: SessionKey<'_>) -> Result<Option<VideoSession>, VideoSessionError> {
        unavailable()
    }
    async fn insert_session_if_absent(&self, _: &NewVideoSession) -> Result<VideoSession, VideoSessionError> {
        unavailable()
    }
    async fn set_room_sid(&self, _: SessionKey<'_>, _: &str) -> Result<(), VideoSessionError> {
        unavailable()
    }
    async fn compare_and_set_status(
        &self,
        _: SessionKey<'_>,
        _: VideoSessionStatus,
        _: &StatusPatch,
    ) -> Result<bool, VideoSessionError> {
        unavailable()
    }
    async fn set_recording(&self, _: SessionKey<'_>, _: &str, _: &str) -> Result<bool, VideoSessionError> {
        unavailable()
    }
    async fn decrement_participant_count(&self, _: Uuid) -> Result<i32, VideoSessionError> {
        unavailable()
    }
    async fn insert_participant(&self, _: &NewSessionParticipant) -> Result<SessionParticipant, VideoSessionError> {
        unavailable()
    }
    async fn find_participant(&self, _: Uuid, _: &str) -> Result<Option<SessionParticipant>, VideoSessionError> {
        unavailable()
    }
    async fn refresh_participant_credential(&self, _: &NewSessionParticipant) -> Result<(), VideoSessionError> {
        unavailable()
    }
    async fn connect_participant(
        &self,
        _: Uuid,
        _: &ParticipantIdentity,
        _: DateTime<Utc>,
    ) -> Result<Option<i32>, VideoSessionError> {
        unavailable()
    }
    async fn mark_participant_left(
        &self,
        _: Uuid,
        _: &str,
        _: DateTime<Utc>,
    ) -> Result<Option<SessionParticipant>, VideoSessionError> {
        unavailable()
    }
    async fn list_participants(&self, _: Uuid) -> Result<Vec<SessionParticipant>, VideoSessionError> {
        unavailable()
    }
    async fn insert_chat_message(&self, _: &NewChatMessage) -> Result<ChatMessage, VideoSessionError> {
        unavailable()
    }
    async fn list_chat_messages(&self, _: Uuid) -> Result<Vec<ChatMessage>, VideoSessionError> {
        unavailable()
    }
    async fn insert_transcript(&self, _: &NewSessionTranscript) -> Result<SessionTranscript, VideoSessionError> {
        unavailable()
    }
    async fn list_transcripts(&self, _: Uuid) -> Result<Vec<SessionTranscript>, VideoSessionError> {
        unavailable()
    }
}
