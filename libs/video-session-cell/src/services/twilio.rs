// libs/video-session-cell/src/services/twilio.rs
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use shared_config::AppConfig;

use crate::models::{ProviderRoom, ProviderTranscription, VideoSessionError};

/// Room operations the session lifecycle needs from the video provider.
#[async_trait]
pub trait VideoProvider: Send + Sync {
    async fn create_room(&self, room_name: &str) -> Result<ProviderRoom, VideoSessionError>;

    async fn complete_room(&self, room_sid: &str) -> Result<(), VideoSessionError>;

    /// `Ok(None)` when the provider has no transcription for the recording.
    async fn fetch_transcription(
        &self,
        recording_sid: &str,
    ) -> Result<Option<ProviderTranscription>, VideoSessionError>;

    fn recording_media_url(&self, recording_sid: &str) -> String;
}

/// Twilio Video REST client.
/// Based on: https://www.twilio.com/docs/video/api/rooms-resource
#[cfg_attr(test, derive(Debug))]
pub struct TwilioVideoClient {
    client: Client,
    api_key_sid: String,
    api_key_secret: String,
    base_url: String,
    status_callback_url: Option<String>,
}

impl TwilioVideoClient {
    pub fn new(config: &AppConfig) -> Result<Self, VideoSessionError> {
        if !config.is_video_configured() {
            return Err(VideoSessionError::NotConfigured);
        }

        Ok(Self {
            client: Client::new(),
            api_key_sid: config.twilio_api_key_sid.clone(),
            api_key_secret: config.twilio_api_key_secret.clone(),
            base_url: config.twilio_video_base_url.trim_end_matches('/').to_string(),
            status_callback_url: config
                .twilio_status_callback_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string()),
        })
    }

    fn room_form(&self, room_name: &str) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("UniqueName", room_name.to_string()),
            ("Type", "group".to_string()),
            ("RecordParticipantsOnConnect", "true".to_string()),
            ("MaxParticipants", crate::models::MAX_PARTICIPANTS.to_string()),
        ];

        if let Some(callback) = &self.status_callback_url {
            form.push(("StatusCallback", format!("{}/room-status", callback)));
            form.push(("StatusCallbackMethod", "POST".to_string()));
        }

        form
    }

    async fn parse_response<T: DeserializeOwned>(
        operation: &str,
        response: reqwest::Response,
    ) -> Result<T, VideoSessionError> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| VideoSessionError::provider(operation, e.to_string()))?;

        debug!("Twilio {} response: {} - {}", operation, status, text);

        if !status.is_success() {
            error!("Twilio {} failed: {} - {}", operation, status, text);
            return Err(VideoSessionError::provider(
                operation,
                format!("HTTP {}: {}", status, text),
            ));
        }

        serde_json::from_str(&text).map_err(|e| {
            VideoSessionError::provider(operation, format!("Failed to parse response: {}", e))
        })
    }

    /// Lists a single room to verify credentials and connectivity.
    pub async fn health_check(&self) -> Result<bool, VideoSessionError> {
        debug!("Performing Twilio Video API health check");

        let url = format!("{}/Rooms?PageSize=1", self.base_url);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.api_key_sid, Some(&self.api_key_secret))
            .send()
            .await
            .map_err(|e| VideoSessionError::provider("health_check", e.to_string()))?;

        let is_healthy = response.status().is_success();
        if is_healthy {
            info!("Twilio Video API health check passed");
        } else {
            warn!("Twilio Video API health check failed: {}", response.status());
        }

        Ok(is_healthy)
    }
}

#[async_trait]
impl VideoProvider for TwilioVideoClient {
    /// POST /Rooms
    async fn create_room(&self, room_name: &str) -> Result<ProviderRoom, VideoSessionError> {
        info!("Creating Twilio room: {}", room_name);

        let url = format!("{}/Rooms", self.base_url);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.api_key_sid, Some(&self.api_key_secret))
            .form(&self.room_form(room_name))
            .send()
            .await
            .map_err(|e| VideoSessionError::provider("create_room", e.to_string()))?;

        let room: ProviderRoom = Self::parse_response("create_room", response).await?;

        info!("Created Twilio room {} ({})", room.unique_name, room.sid);
        Ok(room)
    }

    /// POST /Rooms/{sid} with Status=completed
    async fn complete_room(&self, room_sid: &str) -> Result<(), VideoSessionError> {
        info!("Completing Twilio room: {}", room_sid);

        let url = format!("{}/Rooms/{}", self.base_url, room_sid);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.api_key_sid, Some(&self.api_key_secret))
            .form(&[("Status", "completed")])
            .send()
            .await
            .map_err(|e| VideoSessionError::provider("complete_room", e.to_string()))?;

        let _: ProviderRoom = Self::parse_response("complete_room", response).await?;
        Ok(())
    }

    /// GET /Recordings/{sid}/Transcription
    async fn fetch_transcription(
        &self,
        recording_sid: &str,
    ) -> Result<Option<ProviderTranscription>, VideoSessionError> {
        debug!("Fetching transcription for recording: {}", recording_sid);

        let url = format!("{}/Recordings/{}/Transcription", self.base_url, recording_sid);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.api_key_sid, Some(&self.api_key_secret))
            .send()
            .await
            .map_err(|e| VideoSessionError::provider("fetch_transcription", e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("No transcription available for recording {}", recording_sid);
            return Ok(None);
        }

        Self::parse_response("fetch_transcription", response)
            .await
            .map(Some)
    }

    fn recording_media_url(&self, recording_sid: &str) -> String {
        format!("{}/Recordings/{}/Media", self.base_url, recording_sid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use shared_utils::test_utils::TestConfig;

    #[test]
    fn test_client_creation() {
        let config = TestConfig::default().to_app_config();
        assert!(TwilioVideoClient::new(&config).is_ok());
    }

    #[test]
    fn test_client_creation_fails_without_config() {
        let mut config = TestConfig::default().to_app_config();
        config.twilio_api_key_secret = String::new();

        assert_matches!(
            TwilioVideoClient::new(&config),
            Err(VideoSessionError::NotConfigured)
        );
    }

    #[test]
    fn test_recording_media_url() {
        let config = TestConfig::default()
            .with_twilio_url("https://video.example.com/v1/")
            .to_app_config();
        let client = TwilioVideoClient::new(&config).unwrap();

        assert_eq!(
            client.recording_media_url("RT123"),
            "https://video.example.com/v1/Recordings/RT123/Media"
        );
    }

    #[test]
    fn test_room_form_includes_callback_only_when_configured() {
        let mut config = TestConfig::default().to_app_config();
        let without = TwilioVideoClient::new(&config).unwrap().room_form("session-a");
        assert!(without.iter().all(|(k, _)| *k != "StatusCallback"));
        assert!(without.contains(&("MaxParticipants", "2".to_string())));

        config.twilio_status_callback_url = Some("https://api.example.com/webhooks/twilio/".to_string());
        let with = TwilioVideoClient::new(&config).unwrap().room_form("session-a");
        assert!(with.contains(&(
            "StatusCallback",
            "https://api.example.com/webhooks/twilio/room-status".to_string()
        )));
    }
}
