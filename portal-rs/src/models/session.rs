use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User record as returned by the auth service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub user: AuthUser,
}

/// Result of an account sign-up. Projects that require email confirmation
/// return the user without a session.
#[derive(Debug, Clone)]
pub struct SignUpResult {
    pub user: AuthUser,
    pub session: Option<Session>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionCheckRequest {
    pub fragment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    pub fragment: Option<String>,
    pub password: String,
    #[serde(rename = "confirmPassword")]
    pub confirm_password: String,
}
