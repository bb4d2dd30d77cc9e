use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::models::{SignupQuery, SignupRequest};
use crate::services::signup::{
    self, membership_policy, InvitationError, InvitationView, SignupError, SignupSubmission,
};
use crate::AppState;

/// Failed submission. The body carries the page state next to the message
/// so the client knows whether to keep the form, show the invalid
/// invitation page, or point at support.
pub struct SignupFailure(SignupError);

impl From<SignupError> for SignupFailure {
    fn from(e: SignupError) -> Self {
        Self(e)
    }
}

impl IntoResponse for SignupFailure {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = match &err {
            SignupError::Invitation(InvitationError::Fetch(_)) => StatusCode::BAD_GATEWAY,
            SignupError::Invitation(_) | SignupError::Password(_) => StatusCode::BAD_REQUEST,
            SignupError::AccountCreation(_)
            | SignupError::OrganizationCreation(_)
            | SignupError::InvitationUpdate(_)
            | SignupError::OrganizationTag(_) => StatusCode::BAD_GATEWAY,
            SignupError::NoSession | SignupError::SetupIncomplete { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = err.to_string();
        if status.is_server_error() {
            tracing::error!("signup failed: {message}");
        }

        let body = json!({ "error": message, "state": err.page_state() });
        (status, Json(body)).into_response()
    }
}

pub async fn get_invitation(
    State(state): State<AppState>,
    Query(query): Query<SignupQuery>,
) -> Json<InvitationView> {
    let result = signup::load_invitation(
        state.backend.as_ref(),
        query.token.as_deref(),
        chrono::Utc::now(),
    )
    .await;
    Json(InvitationView::from(result))
}

pub async fn submit(
    State(state): State<AppState>,
    Json(body): Json<SignupRequest>,
) -> Result<Json<Value>, SignupFailure> {
    let provisioning = &state.config.provisioning;
    let policy = membership_policy(
        provisioning.membership_attempts,
        provisioning.membership_step_ms,
    );

    let done = signup::complete_signup(
        state.backend.as_ref(),
        policy,
        tokio::time::sleep,
        SignupSubmission {
            token: body.token.as_deref(),
            password: &body.password,
            confirm_password: &body.confirm_password,
            full_name: body.full_name.as_deref(),
        },
        &state.config.redirects.after_signup,
        chrono::Utc::now(),
    )
    .await?;

    Ok(Json(json!({
        "status": "complete",
        "userId": done.user_id,
        "organizationId": done.organization_id,
        "redirectTo": done.redirect_to,
    })))
}
