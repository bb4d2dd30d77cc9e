use axum::{extract::State, http::HeaderMap, Json};
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::middleware::auth::extract_bearer;
use crate::models::{PasswordResetRequest, SessionCheckRequest};
use crate::services::password_reset::{self, ResetError, SessionValidity};
use crate::services::validation::{validate_new_password, RESET_MIN_PASSWORD_LEN};
use crate::AppState;

impl From<ResetError> for AppError {
    fn from(e: ResetError) -> Self {
        let msg = e.to_string();
        match e {
            ResetError::Password(_) => AppError::BadRequest(msg),
            ResetError::Pending => AppError::Conflict(msg),
            ResetError::InvalidSession(_) => AppError::Unauthorized(msg),
            ResetError::Update(_) => AppError::Upstream(msg),
        }
    }
}

fn validity_json(validity: &SessionValidity) -> Value {
    match validity {
        SessionValidity::Unknown => json!({ "state": "unknown" }),
        SessionValidity::Valid { source, .. } => json!({ "state": "valid", "source": source }),
        SessionValidity::Invalid { reason } => json!({ "state": "invalid", "reason": reason }),
    }
}

async fn session_for(state: &AppState, headers: &HeaderMap, fragment: Option<&str>) -> SessionValidity {
    let bearer = extract_bearer(headers);
    password_reset::determine_session(
        state.backend.as_ref(),
        state.config.backend.jwt_secret.as_deref(),
        fragment,
        bearer.as_deref(),
    )
    .await
}

pub async fn check_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SessionCheckRequest>,
) -> Json<Value> {
    let validity = session_for(&state, &headers, body.fragment.as_deref()).await;
    Json(validity_json(&validity))
}

pub async fn reset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PasswordResetRequest>,
) -> AppResult<Json<Value>> {
    // Reject bad input before the session lookup can reach the backend.
    validate_new_password(&body.password, &body.confirm_password, RESET_MIN_PASSWORD_LEN)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let validity = session_for(&state, &headers, body.fragment.as_deref()).await;
    let done = password_reset::reset_password(
        state.backend.as_ref(),
        &validity,
        &body.password,
        &body.confirm_password,
        &state.config.redirects.after_reset,
        state.config.reset_redirect_delay(),
    )
    .await?;

    Ok(Json(json!({
        "status": "success",
        "redirectTo": done.redirect_to,
        "redirectAfterMs": done.redirect_after_ms,
    })))
}
