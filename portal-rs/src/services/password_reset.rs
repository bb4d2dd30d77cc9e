use std::time::Duration;

use serde::Serialize;

use crate::backend::Backend;
use crate::middleware::auth::verify_locally;
use crate::services::validation::{validate_new_password, PasswordError, RESET_MIN_PASSWORD_LEN};

const INVALID_LINK: &str = "Invalid or expired reset link. Please request a new one.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSource {
    /// Recovery token carried in the reset link's URL fragment.
    RecoveryLink,
    /// Bearer token of the caller, verified without a round trip.
    Context,
    /// Bearer token confirmed by the auth service.
    Backend,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionValidity {
    /// Not checked yet. `determine_session` always settles on one of the
    /// other two, so only callers holding an unchecked value see this.
    #[default]
    Unknown,
    Valid {
        source: SessionSource,
        access_token: String,
    },
    Invalid {
        reason: String,
    },
}

impl SessionValidity {
    fn invalid(reason: impl Into<String>) -> Self {
        SessionValidity::Invalid {
            reason: reason.into(),
        }
    }
}

/// What the reset link put after `#`.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RecoveryFragment {
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub error_description: Option<String>,
}

impl RecoveryFragment {
    pub fn parse(fragment: &str) -> Self {
        let raw = fragment.trim().trim_start_matches('#');
        let mut out = Self::default();
        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            match key.as_ref() {
                "access_token" if !value.is_empty() => out.access_token = Some(value.into_owned()),
                "type" => out.token_type = Some(value.into_owned()),
                "error_description" => out.error_description = Some(value.into_owned()),
                _ => {}
            }
        }
        out
    }

    pub fn recovery_token(&self) -> Option<&str> {
        match self.token_type.as_deref() {
            Some("recovery") => self.access_token.as_deref(),
            _ => None,
        }
    }
}

/// Decides whether a password may be reset, trying the reset link's
/// fragment, then the caller's session, then the auth service.
pub async fn determine_session(
    backend: &dyn Backend,
    jwt_secret: Option<&str>,
    fragment: Option<&str>,
    bearer: Option<&str>,
) -> SessionValidity {
    let fragment = fragment.map(RecoveryFragment::parse).unwrap_or_default();

    if let Some(token) = fragment.recovery_token() {
        return SessionValidity::Valid {
            source: SessionSource::RecoveryLink,
            access_token: token.to_string(),
        };
    }

    let Some(bearer) = bearer else {
        return SessionValidity::invalid(
            fragment
                .error_description
                .unwrap_or_else(|| INVALID_LINK.to_string()),
        );
    };

    if verify_locally(bearer, jwt_secret).is_some() {
        return SessionValidity::Valid {
            source: SessionSource::Context,
            access_token: bearer.to_string(),
        };
    }

    match backend.get_user(bearer).await {
        Ok(_) => SessionValidity::Valid {
            source: SessionSource::Backend,
            access_token: bearer.to_string(),
        },
        Err(e) => {
            tracing::info!("reset session rejected by auth service: {e}");
            SessionValidity::invalid(INVALID_LINK)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResetError {
    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error("Session is still being verified")]
    Pending,

    #[error("{0}")]
    InvalidSession(String),

    #[error("{0}")]
    Update(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetSuccess {
    pub redirect_to: String,
    pub redirect_after_ms: u64,
}

/// Applies a new password for a session already judged valid.
/// No retry: a failed update is reported and the user resubmits.
pub async fn reset_password(
    backend: &dyn Backend,
    validity: &SessionValidity,
    password: &str,
    confirm: &str,
    redirect_to: &str,
    redirect_after: Duration,
) -> Result<ResetSuccess, ResetError> {
    validate_new_password(password, confirm, RESET_MIN_PASSWORD_LEN)?;

    let access_token = match validity {
        SessionValidity::Valid { access_token, .. } => access_token,
        SessionValidity::Invalid { reason } => return Err(ResetError::InvalidSession(reason.clone())),
        SessionValidity::Unknown => return Err(ResetError::Pending),
    };

    backend
        .update_password(access_token, password)
        .await
        .map_err(|e| ResetError::Update(e.user_message()))?;

    tracing::info!("password updated");
    Ok(ResetSuccess {
        redirect_to: redirect_to.to_string(),
        redirect_after_ms: redirect_after.as_millis() as u64,
    })
}
