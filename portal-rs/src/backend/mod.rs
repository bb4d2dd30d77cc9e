//! Remote collaborators: auth, tables, procedures and upload services of
//! the hosted backend. Everything the portal persists goes through here.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{
    AuthUser, Distributor, DuplicateResolution, Invitation, Organization, OrganizationMember,
    ServiceOutcome, SignUpResult, Upload,
};

pub mod supabase;

#[cfg(test)]
pub mod memory;

pub use supabase::SupabaseClient;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// Error reported by the backend itself, with its own message.
    #[error("{0}")]
    Api(String),

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Message suitable for showing to the user. Backend messages pass
    /// through unchanged; transport and decode failures get a generic text.
    pub fn user_message(&self) -> String {
        match self {
            BackendError::Api(msg) if !msg.trim().is_empty() => msg.clone(),
            _ => "Something went wrong. Please try again.".to_string(),
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Resolves the user owning `access_token`.
    async fn get_user(&self, access_token: &str) -> BackendResult<AuthUser>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Value,
    ) -> BackendResult<SignUpResult>;

    async fn update_password(&self, access_token: &str, password: &str) -> BackendResult<()>;

    /// Pending invitation carrying `token`, if any.
    async fn find_pending_invitation(&self, token: &str) -> BackendResult<Option<Invitation>>;

    async fn create_organization_with_owner(
        &self,
        access_token: &str,
        name: &str,
    ) -> BackendResult<Organization>;

    async fn accept_invitation(
        &self,
        access_token: &str,
        invitation_id: Uuid,
        organization_id: Uuid,
        accepted_at: DateTime<Utc>,
    ) -> BackendResult<()>;

    async fn mark_organization_admin_created(
        &self,
        access_token: &str,
        organization_id: Uuid,
    ) -> BackendResult<()>;

    async fn find_membership(
        &self,
        access_token: &str,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> BackendResult<Option<OrganizationMember>>;

    /// Uploads of the organization, newest first.
    async fn list_uploads(
        &self,
        access_token: &str,
        organization_id: Uuid,
    ) -> BackendResult<Vec<Upload>>;

    async fn distributors_by_ids(
        &self,
        access_token: &str,
        ids: &[Uuid],
    ) -> BackendResult<Vec<Distributor>>;

    /// Sales rows of the organization with no date classification at all.
    async fn count_rows_missing_dates(
        &self,
        access_token: &str,
        organization_id: Uuid,
    ) -> BackendResult<u64>;

    async fn reprocess_upload(
        &self,
        access_token: &str,
        upload_id: Uuid,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> BackendResult<ServiceOutcome>;

    async fn delete_upload(
        &self,
        access_token: &str,
        upload_id: Uuid,
        organization_id: Uuid,
    ) -> BackendResult<ServiceOutcome>;

    async fn assign_upload_dates(
        &self,
        access_token: &str,
        upload_id: Uuid,
        organization_id: Uuid,
        report_date: NaiveDate,
    ) -> BackendResult<ServiceOutcome>;

    async fn resolve_duplicate_products(
        &self,
        access_token: &str,
        upload_id: Uuid,
        organization_id: Uuid,
        resolutions: &[DuplicateResolution],
    ) -> BackendResult<ServiceOutcome>;
}
