//! In-memory backend used by tests. Records every call so tests can assert
//! which remote operations a flow reached.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::{Backend, BackendError, BackendResult};
use crate::models::{
    AuthUser, Distributor, DuplicateResolution, Invitation, InvitationStatus, Organization,
    OrganizationMember, ServiceOutcome, Session, SignUpResult, Upload,
};

#[derive(Default)]
pub struct MemoryState {
    /// Access token → user.
    pub users: HashMap<String, AuthUser>,
    pub passwords: HashMap<Uuid, String>,
    pub invitations: Vec<Invitation>,
    pub organizations: Vec<Organization>,
    pub memberships: Vec<OrganizationMember>,
    /// Membership rows become visible once this many probes were made.
    /// `None` means the provisioning trigger never completes.
    pub membership_visible_after: Option<u32>,
    pub membership_probes: u32,
    pub uploads: Vec<Upload>,
    pub distributors: Vec<Distributor>,
    pub rows_missing_dates: u64,
    pub sign_up_without_session: bool,
    /// Operation name → error it fails with.
    pub failures: HashMap<&'static str, BackendError>,
    /// Operation name → outcome returned by upload services.
    pub outcomes: HashMap<&'static str, ServiceOutcome>,
    pub calls: Vec<&'static str>,
}

#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> R {
        let mut state = self.state.lock().expect("memory backend poisoned");
        f(&mut state)
    }

    pub fn add_user(&self, token: &str) -> AuthUser {
        let user = AuthUser {
            id: Uuid::new_v4(),
            email: Some(format!("{}@example.com", token)),
        };
        self.with(|s| s.users.insert(token.to_string(), user.clone()));
        user
    }

    pub fn fail(&self, op: &'static str, message: &str) {
        self.with(|s| s.failures.insert(op, BackendError::Api(message.to_string())));
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.with(|s| s.calls.clone())
    }

    pub fn called(&self, op: &str) -> bool {
        self.with(|s| s.calls.iter().any(|c| *c == op))
    }

    fn enter(&self, op: &'static str) -> BackendResult<()> {
        self.with(|s| {
            s.calls.push(op);
            match s.failures.get(op) {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        })
    }

    fn user_for(&self, access_token: &str) -> BackendResult<AuthUser> {
        self.with(|s| s.users.get(access_token).cloned())
            .ok_or_else(|| BackendError::Api("Invalid JWT".into()))
    }

    fn outcome(&self, op: &'static str) -> ServiceOutcome {
        self.with(|s| s.outcomes.get(op).cloned())
            .unwrap_or_else(ServiceOutcome::ok)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get_user(&self, access_token: &str) -> BackendResult<AuthUser> {
        self.enter("get_user")?;
        self.user_for(access_token)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        _metadata: Value,
    ) -> BackendResult<SignUpResult> {
        self.enter("sign_up")?;
        let user = AuthUser {
            id: Uuid::new_v4(),
            email: Some(email.to_string()),
        };
        let token = format!("session-{}", user.id);
        self.with(|s| {
            s.users.insert(token.clone(), user.clone());
            s.passwords.insert(user.id, password.to_string());
            let session = (!s.sign_up_without_session).then(|| Session {
                access_token: token,
                user: user.clone(),
            });
            Ok(SignUpResult { user, session })
        })
    }

    async fn update_password(&self, access_token: &str, password: &str) -> BackendResult<()> {
        self.enter("update_password")?;
        let user = self.user_for(access_token)?;
        self.with(|s| s.passwords.insert(user.id, password.to_string()));
        Ok(())
    }

    async fn find_pending_invitation(&self, token: &str) -> BackendResult<Option<Invitation>> {
        self.enter("find_pending_invitation")?;
        Ok(self.with(|s| {
            s.invitations
                .iter()
                .find(|i| i.token == token && i.status == InvitationStatus::Pending)
                .cloned()
        }))
    }

    async fn create_organization_with_owner(
        &self,
        access_token: &str,
        name: &str,
    ) -> BackendResult<Organization> {
        self.enter("create_organization_with_owner")?;
        let owner = self.user_for(access_token)?;
        let org = Organization {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_by_platform_admin: false,
        };
        self.with(|s| {
            s.organizations.push(org.clone());
            s.memberships.push(OrganizationMember {
                organization_id: org.id,
                user_id: owner.id,
                role: "owner".into(),
            });
        });
        Ok(org)
    }

    async fn accept_invitation(
        &self,
        _access_token: &str,
        invitation_id: Uuid,
        organization_id: Uuid,
        accepted_at: DateTime<Utc>,
    ) -> BackendResult<()> {
        self.enter("accept_invitation")?;
        self.with(|s| {
            if let Some(inv) = s.invitations.iter_mut().find(|i| i.id == invitation_id) {
                inv.status = InvitationStatus::Accepted;
                inv.organization_id = Some(organization_id);
                inv.accepted_at = Some(accepted_at);
            }
        });
        Ok(())
    }

    async fn mark_organization_admin_created(
        &self,
        _access_token: &str,
        organization_id: Uuid,
    ) -> BackendResult<()> {
        self.enter("mark_organization_admin_created")?;
        self.with(|s| {
            if let Some(org) = s.organizations.iter_mut().find(|o| o.id == organization_id) {
                org.created_by_platform_admin = true;
            }
        });
        Ok(())
    }

    async fn find_membership(
        &self,
        _access_token: &str,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> BackendResult<Option<OrganizationMember>> {
        self.enter("find_membership")?;
        Ok(self.with(|s| {
            s.membership_probes += 1;
            match s.membership_visible_after {
                Some(n) if s.membership_probes >= n => s
                    .memberships
                    .iter()
                    .find(|m| m.organization_id == organization_id && m.user_id == user_id)
                    .cloned(),
                _ => None,
            }
        }))
    }

    async fn list_uploads(
        &self,
        _access_token: &str,
        organization_id: Uuid,
    ) -> BackendResult<Vec<Upload>> {
        self.enter("list_uploads")?;
        Ok(self.with(|s| {
            let mut uploads: Vec<Upload> = s
                .uploads
                .iter()
                .filter(|u| u.organization_id == organization_id)
                .cloned()
                .collect();
            uploads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            uploads
        }))
    }

    async fn distributors_by_ids(
        &self,
        _access_token: &str,
        ids: &[Uuid],
    ) -> BackendResult<Vec<Distributor>> {
        self.enter("distributors_by_ids")?;
        Ok(self.with(|s| {
            s.distributors
                .iter()
                .filter(|d| ids.contains(&d.id))
                .cloned()
                .collect()
        }))
    }

    async fn count_rows_missing_dates(
        &self,
        _access_token: &str,
        _organization_id: Uuid,
    ) -> BackendResult<u64> {
        self.enter("count_rows_missing_dates")?;
        Ok(self.with(|s| s.rows_missing_dates))
    }

    async fn reprocess_upload(
        &self,
        _access_token: &str,
        upload_id: Uuid,
        _organization_id: Uuid,
        _user_id: Uuid,
    ) -> BackendResult<ServiceOutcome> {
        self.enter("reprocess_upload")?;
        let outcome = self.outcome("reprocess_upload");
        if outcome.success {
            self.with(|s| {
                if let Some(u) = s.uploads.iter_mut().find(|u| u.id == upload_id) {
                    u.reprocessed_count += 1;
                }
            });
        }
        Ok(outcome)
    }

    async fn delete_upload(
        &self,
        _access_token: &str,
        upload_id: Uuid,
        _organization_id: Uuid,
    ) -> BackendResult<ServiceOutcome> {
        self.enter("delete_upload")?;
        let outcome = self.outcome("delete_upload");
        if outcome.success {
            self.with(|s| s.uploads.retain(|u| u.id != upload_id));
        }
        Ok(outcome)
    }

    async fn assign_upload_dates(
        &self,
        _access_token: &str,
        _upload_id: Uuid,
        _organization_id: Uuid,
        _report_date: NaiveDate,
    ) -> BackendResult<ServiceOutcome> {
        self.enter("assign_upload_dates")?;
        Ok(self.outcome("assign_upload_dates"))
    }

    async fn resolve_duplicate_products(
        &self,
        _access_token: &str,
        _upload_id: Uuid,
        _organization_id: Uuid,
        _resolutions: &[DuplicateResolution],
    ) -> BackendResult<ServiceOutcome> {
        self.enter("resolve_duplicate_products")?;
        Ok(self.outcome("resolve_duplicate_products"))
    }
}
