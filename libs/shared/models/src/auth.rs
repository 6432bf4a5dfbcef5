use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Claims carried by access tokens issued by the Supabase auth service.
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    /// Practice role stored by the portal in the user metadata (`user_type`), falling back to the token role.
    pub fn user_type(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("user_type"))
            .and_then(|v| v.as_str())
            .or(self.role.as_deref())
    }
}
