use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::backend::Backend;
use crate::models::{Invitation, InvitationSummary};
use crate::services::poll::{poll_until, PollOutcome, RetryPolicy};
use crate::services::validation::{validate_new_password, PasswordError, SIGNUP_MIN_PASSWORD_LEN};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvitationError {
    #[error("Invalid invitation link - no token provided")]
    MissingToken,

    #[error("Failed to validate invitation. Please try again later.")]
    Fetch(String),

    #[error("Invalid or expired invitation")]
    NotFound,

    #[error("This invitation has expired")]
    Expired,
}

/// Loads the pending invitation for `token` and checks it is still usable.
pub async fn load_invitation(
    backend: &dyn Backend,
    token: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Invitation, InvitationError> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(InvitationError::MissingToken)?;

    let invitation = backend
        .find_pending_invitation(token)
        .await
        .map_err(|e| {
            tracing::warn!("invitation lookup failed: {e}");
            InvitationError::Fetch(e.to_string())
        })?
        .ok_or(InvitationError::NotFound)?;

    if invitation.is_expired_at(now) {
        return Err(InvitationError::Expired);
    }
    Ok(invitation)
}

/// Signup page state after loading.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InvitationView {
    Ready { invitation: InvitationSummary },
    Invalid { message: String },
}

impl From<Result<Invitation, InvitationError>> for InvitationView {
    fn from(result: Result<Invitation, InvitationError>) -> Self {
        match result {
            Ok(inv) => InvitationView::Ready {
                invitation: InvitationSummary::from(&inv),
            },
            Err(e) => InvitationView::Invalid {
                message: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignupError {
    #[error(transparent)]
    Invitation(#[from] InvitationError),

    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error("Failed to create account: {0}")]
    AccountCreation(String),

    #[error("Account created but no session was returned. Please confirm your email and sign in.")]
    NoSession,

    #[error("Failed to create organization: {0}")]
    OrganizationCreation(String),

    #[error("Failed to accept invitation: {0}")]
    InvitationUpdate(String),

    #[error("Failed to finalize organization: {0}")]
    OrganizationTag(String),

    /// Account and organization exist but membership never showed up.
    /// Nothing is rolled back; support finishes the setup by hand.
    #[error("Your account was created but setup is incomplete. Please contact support.")]
    SetupIncomplete {
        user_id: Uuid,
        organization_id: Uuid,
    },
}

/// Where the signup page ends up after a failed submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignupPageState {
    /// Form stays usable; the user can correct and resubmit.
    Ready,
    /// Invitation is unusable; terminal.
    Invalid,
    /// Backend work was partially done; terminal, needs support.
    Incomplete,
}

impl SignupError {
    pub fn page_state(&self) -> SignupPageState {
        if self.stays_ready() {
            SignupPageState::Ready
        } else if matches!(self, SignupError::Invitation(_)) {
            SignupPageState::Invalid
        } else {
            SignupPageState::Incomplete
        }
    }

    /// Whether the form stays usable so the user can correct and resubmit.
    pub fn stays_ready(&self) -> bool {
        matches!(
            self,
            SignupError::Password(_)
                | SignupError::AccountCreation(_)
                | SignupError::OrganizationCreation(_)
                | SignupError::InvitationUpdate(_)
                | SignupError::OrganizationTag(_)
        )
    }
}

pub struct SignupSubmission<'a> {
    pub token: Option<&'a str>,
    pub password: &'a str,
    pub confirm_password: &'a str,
    pub full_name: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupComplete {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub redirect_to: String,
}

pub fn membership_policy(attempts: u32, step_ms: u64) -> RetryPolicy {
    RetryPolicy::linear(attempts, Duration::from_millis(step_ms))
}

/// Creates the account and organization for an invitation.
///
/// Steps run strictly in order and the first failure aborts the rest:
/// sign-up, organization RPC, invitation acceptance, organization tag,
/// then membership polling. Earlier steps are never undone.
pub async fn complete_signup<S, SF>(
    backend: &dyn Backend,
    policy: RetryPolicy,
    sleep: S,
    submission: SignupSubmission<'_>,
    redirect_to: &str,
    now: DateTime<Utc>,
) -> Result<SignupComplete, SignupError>
where
    S: FnMut(Duration) -> SF,
    SF: Future<Output = ()>,
{
    let token = submission
        .token
        .filter(|t| !t.trim().is_empty())
        .ok_or(InvitationError::MissingToken)?;
    validate_new_password(
        submission.password,
        submission.confirm_password,
        SIGNUP_MIN_PASSWORD_LEN,
    )?;

    let invitation = load_invitation(backend, Some(token), now).await?;

    let metadata = json!({
        "full_name": submission.full_name,
        "company_name": invitation.company_name,
        "invitation_token": invitation.token,
    });
    let account = backend
        .sign_up(&invitation.email, submission.password, metadata)
        .await
        .map_err(|e| SignupError::AccountCreation(e.user_message()))?;
    let session = account.session.ok_or(SignupError::NoSession)?;
    let user_id = session.user.id;
    let access_token = session.access_token.as_str();
    tracing::info!(%user_id, "signup: account created");

    let organization = backend
        .create_organization_with_owner(access_token, &invitation.company_name)
        .await
        .map_err(|e| SignupError::OrganizationCreation(e.user_message()))?;
    let organization_id = organization.id;
    tracing::info!(%organization_id, "signup: organization created");

    backend
        .accept_invitation(access_token, invitation.id, organization_id, now)
        .await
        .map_err(|e| SignupError::InvitationUpdate(e.user_message()))?;

    backend
        .mark_organization_admin_created(access_token, organization_id)
        .await
        .map_err(|e| SignupError::OrganizationTag(e.user_message()))?;

    let outcome = poll_until(policy, sleep, |_| {
        backend.find_membership(access_token, organization_id, user_id)
    })
    .await;

    match outcome {
        PollOutcome::Found { attempts, .. } => {
            tracing::info!(%organization_id, attempts, "signup: membership confirmed");
            Ok(SignupComplete {
                user_id,
                organization_id,
                redirect_to: redirect_to.to_string(),
            })
        }
        PollOutcome::Exhausted { attempts } => {
            tracing::error!(
                %user_id,
                %organization_id,
                attempts,
                "signup: membership not visible, setup incomplete"
            );
            Err(SignupError::SetupIncomplete {
                user_id,
                organization_id,
            })
        }
    }
}
