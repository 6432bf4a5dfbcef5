// libs/video-session-cell/src/services/mod.rs

pub mod credentials;
pub mod memory;
pub mod session;
pub mod store;
pub mod twilio;
pub mod webhook;

pub use credentials::{CredentialIssuer, TwilioAccessTokenIssuer};
pub use memory::InMemoryVideoSessionStore;
pub use session::VideoSessionService;
pub use store::{transition_status, SessionKey, SupabaseVideoSessionStore, VideoSessionStore};
pub use twilio::{TwilioVideoClient, VideoProvider};
pub use webhook::WebhookDispatcher;
