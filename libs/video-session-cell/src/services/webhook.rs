// libs/video-session-cell/src/services/webhook.rs
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use shared_config::AppConfig;

use crate::models::{
    NewSessionTranscript, ParticipantEventKind, ParticipantIdentity, TwilioStatusCallback,
    VideoSession, VideoSessionError, VideoSessionStatus, WebhookKind, WebhookOutcome,
};
use crate::services::store::{
    transition_status, SessionKey, SupabaseVideoSessionStore, VideoSessionStore,
};
use crate::services::twilio::{TwilioVideoClient, VideoProvider};

/// Applies Twilio status callbacks to the session records.
pub struct WebhookDispatcher {
    store: Arc<dyn VideoSessionStore>,
    provider: Arc<dyn VideoProvider>,
}

impl WebhookDispatcher {
    pub fn new(store: Arc<dyn VideoSessionStore>, provider: Arc<dyn VideoProvider>) -> Self {
        Self { store, provider }
    }

    /// Callbacks carry no user session, so writes go through the service-role key.
    pub fn from_config(config: &AppConfig) -> Result<Self, VideoSessionError> {
        Ok(Self::new(
            Arc::new(SupabaseVideoSessionStore::for_service(config)),
            Arc::new(TwilioVideoClient::new(config)?),
        ))
    }

    /// Routes one callback. Business-level rejections come back as `Ignored`;
    /// only failures worth a provider retry are returned as errors.
    #[instrument(skip(self, callback), fields(room = ?callback.room_name, event = ?callback.status_callback_event))]
    pub async fn dispatch(
        &self,
        kind: &WebhookKind,
        callback: &TwilioStatusCallback,
    ) -> Result<WebhookOutcome, VideoSessionError> {
        let result = match Self::effective_kind(kind, callback) {
            WebhookKind::RoomStatus => self.handle_room_status(callback).await,
            WebhookKind::Recording => self.handle_recording(callback).await,
            WebhookKind::Participant => self.handle_participant(callback).await,
            WebhookKind::Unknown(other) => {
                info!("Ignoring unknown webhook type: {}", other);
                return Ok(WebhookOutcome::Ignored(format!("unknown event type {}", other)));
            }
        };

        match result {
            Err(e) if e.is_acknowledgeable() => {
                warn!("Acknowledging rejected webhook: {}", e);
                Ok(WebhookOutcome::Ignored(e.to_string()))
            }
            Err(e) => {
                error!("Webhook processing failed: {}", e);
                Err(e)
            }
            ok => ok,
        }
    }

    // The room status callback URL receives every room event, so participant and
    // recording events delivered there are routed by their event name.
    fn effective_kind(kind: &WebhookKind, callback: &TwilioStatusCallback) -> WebhookKind {
        if *kind != WebhookKind::RoomStatus {
            return kind.clone();
        }

        match callback.status_callback_event.as_deref() {
            Some(event) if event.starts_with("participant-") => WebhookKind::Participant,
            Some(event) if event.starts_with("recording-") => WebhookKind::Recording,
            _ => WebhookKind::RoomStatus,
        }
    }

    async fn find_by_room(&self, room_name: &str) -> Result<VideoSession, VideoSessionError> {
        self.store
            .find_session(SessionKey::RoomName(room_name))
            .await?
            .ok_or_else(|| {
                debug!("No session for room {}", room_name);
                VideoSessionError::SessionNotFound
            })
    }

    async fn handle_room_status(
        &self,
        callback: &TwilioStatusCallback,
    ) -> Result<WebhookOutcome, VideoSessionError> {
        let room_name = callback.require_room_name()?;
        let room_status = callback
            .room_status
            .as_deref()
            .ok_or_else(|| VideoSessionError::ValidationError {
                message: "RoomStatus missing from callback".to_string(),
            })?;

        let session = self.find_by_room(room_name).await?;

        if let Some(room_sid) = callback.room_sid.as_deref() {
            if session.room_sid.as_deref() != Some(room_sid) {
                self.store
                    .set_room_sid(SessionKey::RoomName(room_name), room_sid)
                    .await?;
            }
        }

        let next = VideoSessionStatus::from_provider(room_status);
        let updated = transition_status(
            self.store.as_ref(),
            SessionKey::RoomName(room_name),
            next,
            Utc::now(),
        )
        .await?;

        info!("Room {} reported {}, session now {}", room_name, room_status, updated.status);
        Ok(WebhookOutcome::Applied)
    }

    async fn handle_recording(
        &self,
        callback: &TwilioStatusCallback,
    ) -> Result<WebhookOutcome, VideoSessionError> {
        let room_name = callback.require_room_name()?;
        let recording_sid = callback
            .recording_sid
            .as_deref()
            .filter(|sid| !sid.is_empty())
            .ok_or_else(|| VideoSessionError::ValidationError {
                message: "RecordingSid missing from callback".to_string(),
            })?;

        let session = self.find_by_room(room_name).await?;
        let media_url = self.provider.recording_media_url(recording_sid);

        if !self
            .store
            .set_recording(SessionKey::RoomName(room_name), recording_sid, &media_url)
            .await?
        {
            return Err(VideoSessionError::SessionNotFound);
        }
        info!("Stored recording {} for room {}", recording_sid, room_name);

        self.store_transcript(&session, recording_sid).await;
        Ok(WebhookOutcome::Applied)
    }

    async fn store_transcript(&self, session: &VideoSession, recording_sid: &str) {
        let transcription = match self.provider.fetch_transcription(recording_sid).await {
            Ok(Some(t)) => t,
            Ok(None) => return,
            Err(e) => {
                warn!("Failed to fetch transcription for {}: {}", recording_sid, e);
                return;
            }
        };

        let Some(text) = transcription.text.filter(|t| !t.trim().is_empty()) else {
            debug!("Transcription {} has no text yet", transcription.sid);
            return;
        };

        let transcript = NewSessionTranscript {
            video_session_id: session.id,
            recording_sid: recording_sid.to_string(),
            transcription_sid: Some(transcription.sid),
            transcript_text: text,
        };

        if let Err(e) = self.store.insert_transcript(&transcript).await {
            warn!("Failed to store transcript for {}: {}", recording_sid, e);
        }
    }

    async fn handle_participant(
        &self,
        callback: &TwilioStatusCallback,
    ) -> Result<WebhookOutcome, VideoSessionError> {
        let room_name = callback.require_room_name()?;
        let raw_identity = callback.participant_identity.as_deref().unwrap_or_default();
        let identity: ParticipantIdentity = raw_identity.parse()?;

        let event = ParticipantEventKind::from_event(
            callback.status_callback_event.as_deref().unwrap_or_default(),
        );
        if let ParticipantEventKind::Other(other) = &event {
            debug!("Ignoring participant event {}", other);
            return Ok(WebhookOutcome::Ignored(format!("participant event {}", other)));
        }

        let session = self.find_by_room(room_name).await?;
        let now = Utc::now();

        match event {
            ParticipantEventKind::Connected => {
                let Some(count) = self
                    .store
                    .connect_participant(session.id, &identity, now)
                    .await?
                else {
                    return Ok(WebhookOutcome::Ignored(format!("{} already connected", identity)));
                };
                info!("{} connected to {} ({} present)", identity, room_name, count);

                if session.status == VideoSessionStatus::Scheduled {
                    transition_status(
                        self.store.as_ref(),
                        SessionKey::RoomName(room_name),
                        VideoSessionStatus::Active,
                        now,
                    )
                    .await?;
                }
            }
            ParticipantEventKind::Disconnected => {
                let Some(left) = self
                    .store
                    .mark_participant_left(session.id, &identity.user_id, now)
                    .await?
                else {
                    return Ok(WebhookOutcome::Ignored(format!("{} was not connected", identity)));
                };

                let count = self.store.decrement_participant_count(session.id).await?;
                info!(
                    "{} left {} after {:?}s ({} present)",
                    identity, room_name, left.connection_duration_seconds, count
                );
            }
            ParticipantEventKind::Other(_) => {}
        }

        Ok(WebhookOutcome::Applied)
    }
}
