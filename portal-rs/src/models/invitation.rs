use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub id: Uuid,
    pub token: String,
    pub email: String,
    pub company_name: String,
    pub expires_at: DateTime<Utc>,
    pub status: InvitationStatus,
    #[serde(default)]
    pub welcome_message: Option<String>,
    #[serde(default)]
    pub organization_id: Option<Uuid>,
    #[serde(default)]
    pub accepted_at: Option<DateTime<Utc>>,
}

impl Invitation {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// What the signup page shows once an invitation has been validated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationSummary {
    pub email: String,
    pub company_name: String,
    pub expires_at: DateTime<Utc>,
    pub welcome_message: Option<String>,
}

impl From<&Invitation> for InvitationSummary {
    fn from(inv: &Invitation) -> Self {
        Self {
            email: inv.email.clone(),
            company_name: inv.company_name.clone(),
            expires_at: inv.expires_at,
            welcome_message: inv.welcome_message.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SignupQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub token: Option<String>,
    pub password: String,
    #[serde(rename = "confirmPassword")]
    pub confirm_password: String,
    #[serde(rename = "fullName")]
    pub full_name: Option<String>,
}
