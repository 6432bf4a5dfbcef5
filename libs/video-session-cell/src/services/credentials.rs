// libs/video-session-cell/src/services/credentials.rs
use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{
    room_name_for, AccessCredential, ParticipantIdentity, ParticipantType, VideoSessionError,
};

/// Mints the credential a participant presents to the video provider.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue(
        &self,
        session_id: &str,
        user_id: &str,
        user_type: ParticipantType,
    ) -> Result<AccessCredential, VideoSessionError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VideoGrant {
    pub room: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessTokenGrants {
    pub identity: String,
    pub video: VideoGrant,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub jti: String,
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub grants: AccessTokenGrants,
}

/// Signs Twilio Video access tokens locally with the API key secret.
pub struct TwilioAccessTokenIssuer {
    account_sid: String,
    api_key_sid: String,
    api_key_secret: String,
    ttl: Duration,
}

impl TwilioAccessTokenIssuer {
    pub fn new(config: &AppConfig) -> Result<Self, VideoSessionError> {
        if !config.is_video_configured() {
            return Err(VideoSessionError::NotConfigured);
        }
        if !config.has_valid_token_ttl() {
            warn!("Video token TTL of {}s is not usable", config.video_token_ttl_secs);
            return Err(VideoSessionError::NotConfigured);
        }

        Ok(Self {
            account_sid: config.twilio_account_sid.clone(),
            api_key_sid: config.twilio_api_key_sid.clone(),
            api_key_secret: config.twilio_api_key_secret.clone(),
            ttl: Duration::seconds(config.video_token_ttl_secs),
        })
    }
}

#[async_trait]
impl CredentialIssuer for TwilioAccessTokenIssuer {
    async fn issue(
        &self,
        session_id: &str,
        user_id: &str,
        user_type: ParticipantType,
    ) -> Result<AccessCredential, VideoSessionError> {
        let identity = ParticipantIdentity::new(user_type, user_id).to_string();
        let room = room_name_for(session_id);
        let now = Utc::now();
        let expires_at = now + self.ttl;

        let claims = AccessTokenClaims {
            jti: format!("{}-{}", self.api_key_sid, Uuid::new_v4().simple()),
            iss: self.api_key_sid.clone(),
            sub: self.account_sid.clone(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: expires_at.timestamp(),
            grants: AccessTokenGrants {
                identity: identity.clone(),
                video: VideoGrant { room: room.clone() },
            },
        };

        let mut header = Header::new(Algorithm::HS256);
        header.cty = Some("twilio-fpa;v=1".to_string());

        let token = encode(
            &header,
            &claims,
            &EncodingKey::from_secret(self.api_key_secret.as_bytes()),
        )
        .map_err(|e| VideoSessionError::CredentialIssuanceFailed {
            message: e.to_string(),
        })?;

        debug!("Issued video token for {} in room {}", identity, room);

        Ok(AccessCredential {
            token,
            identity,
            room,
            expires_at,
        })
    }
}
