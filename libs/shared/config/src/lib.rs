use std::env;
use tracing::warn;

pub const DEFAULT_TWILIO_VIDEO_BASE_URL: &str = "https://video.twilio.com/v1";
pub const DEFAULT_VIDEO_TOKEN_TTL_SECS: i64 = 3600;
/// Twilio rejects access tokens that live longer than 24 hours.
pub const MAX_VIDEO_TOKEN_TTL_SECS: i64 = 86_400;
pub const DEFAULT_SERVER_PORT: u16 = 3000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub supabase_service_role_key: String,
    pub twilio_account_sid: String,
    pub twilio_api_key_sid: String,
    pub twilio_api_key_secret: String,
    pub twilio_video_base_url: String,
    pub twilio_status_callback_url: Option<String>,
    pub video_token_ttl_secs: i64,
    pub server_port: u16,
}

fn video_token_ttl(raw: Option<String>) -> i64 {
    let Some(raw) = raw else {
        return DEFAULT_VIDEO_TOKEN_TTL_SECS;
    };

    match raw.trim().parse::<i64>() {
        Ok(secs) if (1..=MAX_VIDEO_TOKEN_TTL_SECS).contains(&secs) => secs,
        _ => {
            warn!(
                "VIDEO_TOKEN_TTL_SECS={} outside 1..={}, using default {}",
                raw, MAX_VIDEO_TOKEN_TTL_SECS, DEFAULT_VIDEO_TOKEN_TTL_SECS
            );
            DEFAULT_VIDEO_TOKEN_TTL_SECS
        }
    }
}

fn required(name: &str) -> String {
    env::var(name).unwrap_or_else(|_| {
        warn!("{} not set, using empty value", name);
        String::new()
    })
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: required("SUPABASE_URL"),
            supabase_anon_key: required("SUPABASE_ANON_PUBLIC_KEY"),
            supabase_jwt_secret: required("SUPABASE_JWT_SECRET"),
            supabase_service_role_key: required("SUPABASE_SERVICE_ROLE_KEY"),
            twilio_account_sid: required("TWILIO_ACCOUNT_SID"),
            twilio_api_key_sid: required("TWILIO_API_KEY_SID"),
            twilio_api_key_secret: required("TWILIO_API_KEY_SECRET"),
            twilio_video_base_url: env::var("TWILIO_VIDEO_BASE_URL").unwrap_or_else(|_| {
                warn!("TWILIO_VIDEO_BASE_URL not set, using default");
                DEFAULT_TWILIO_VIDEO_BASE_URL.to_string()
            }),
            twilio_status_callback_url: env::var("TWILIO_STATUS_CALLBACK_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            video_token_ttl_secs: video_token_ttl(env::var("VIDEO_TOKEN_TTL_SECS").ok()),
            server_port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_SERVER_PORT),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    pub fn is_video_configured(&self) -> bool {
        !self.twilio_account_sid.is_empty()
            && !self.twilio_api_key_sid.is_empty()
            && !self.twilio_api_key_secret.is_empty()
            && !self.twilio_video_base_url.is_empty()
    }

    pub fn has_valid_token_ttl(&self) -> bool {
        (1..=MAX_VIDEO_TOKEN_TTL_SECS).contains(&self.video_token_ttl_secs)
    }

    /// Key used for writes that arrive without a user session (provider webhooks).
    /// Falls back to the anon key so local setups without a service role still work.
    pub fn service_key(&self) -> &str {
        if self.supabase_service_role_key.is_empty() {
            &self.supabase_anon_key
        } else {
            &self.supabase_service_role_key
        }
    }
}
