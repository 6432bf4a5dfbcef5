// libs/video-session-cell/src/lib.rs
//! # Video Session Cell
//!
//! Telehealth video sessions between a practitioner and a client, backed by
//! Twilio Video rooms and Supabase persistence.
//!
//! ## Architecture
//!
//! ```text
//! +------------------------------------------------------+
//! |                 Video Session Cell                   |
//! +------------------------------------------------------+
//! |  handlers.rs     |  HTTP endpoint handlers           |
//! |  router.rs       |  UI and webhook route definitions |
//! |  models.rs       |  Records, DTOs and errors         |
//! |  services/       |  Business logic layer             |
//! |    session.rs    |  Session lifecycle                |
//! |    webhook.rs    |  Twilio status callback handling  |
//! |    credentials.rs|  Room access tokens               |
//! |    twilio.rs     |  Twilio Video REST client         |
//! |    store.rs      |  Persistence trait + Supabase     |
//! |    memory.rs     |  In-process store                 |
//! +------------------------------------------------------+
//! ```
//!
//! ## API Endpoints
//!
//! ### Sessions (`/video`, bearer token required)
//! - `POST /video/sessions/{id}/start` - Create the session and its room
//! - `POST /video/sessions/{id}/join` - Get a room credential
//! - `POST /video/sessions/{id}/end` - Complete the session
//! - `POST /video/sessions/{id}/cancel` - Cancel the session
//! - `GET /video/sessions/{id}` - Session details
//! - `GET /video/sessions/{id}/participants` - Participant history
//! - `GET|POST /video/sessions/{id}/messages` - In-call chat
//! - `GET /video/sessions/{id}/transcripts` - Recording transcripts
//! - `GET /video/health` - Health check (public)
//!
//! ### Provider callbacks
//! - `POST /webhooks/twilio/{room-status|recording|participant}`
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use shared_config::AppConfig;
//! use video_session_cell::router::video_session_routes;
//!
//! let config = Arc::new(AppConfig::from_env());
//! let video_routes = video_session_routes(config);
//! ```

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{
    AccessCredential, ParticipantIdentity, ParticipantType, SessionParticipant, VideoSession,
    VideoSessionError, VideoSessionStatus, WebhookKind, WebhookOutcome,
};

pub use services::{
    CredentialIssuer, InMemoryVideoSessionStore, SupabaseVideoSessionStore, TwilioAccessTokenIssuer,
    TwilioVideoClient, VideoProvider, VideoSessionService, VideoSessionStore, WebhookDispatcher,
};

pub use router::{twilio_webhook_routes, video_session_routes};
