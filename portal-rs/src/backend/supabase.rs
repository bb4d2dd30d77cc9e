use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{header, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{Backend, BackendError, BackendResult};
use crate::config::BackendConfig;
use crate::models::{
    AuthUser, Distributor, DuplicateResolution, Invitation, Organization, OrganizationMember,
    ServiceOutcome, Session, SignUpResult, Upload,
};

/// Thin client over the hosted backend's auth and REST endpoints.
#[derive(Clone)]
pub struct SupabaseClient {
    base_url: String,
    anon_key: String,
    client: reqwest::Client,
}

impl SupabaseClient {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            base_url: config.url.clone(),
            anon_key: config.anon_key.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn request(&self, method: Method, path: &str, access_token: Option<&str>) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let bearer = access_token.unwrap_or(&self.anon_key);
        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }

    async fn send(&self, req: RequestBuilder) -> BackendResult<Value> {
        let resp = req
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let body: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| BackendError::Decode(e.to_string()))?
        };

        if !status.is_success() {
            return Err(BackendError::Api(
                error_message(&body).unwrap_or_else(|| format!("Request failed ({})", status)),
            ));
        }
        Ok(body)
    }

    async fn fetch<T: DeserializeOwned>(&self, req: RequestBuilder) -> BackendResult<T> {
        let body = self.send(req).await?;
        serde_json::from_value(body).map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn rpc(&self, access_token: &str, function: &str, args: Value) -> BackendResult<Value> {
        let req = self
            .request(Method::POST, &format!("/rest/v1/rpc/{}", function), Some(access_token))
            .json(&args);
        self.send(req).await
    }

    async fn service_rpc(
        &self,
        access_token: &str,
        function: &str,
        args: Value,
    ) -> BackendResult<ServiceOutcome> {
        let body = self.rpc(access_token, function, args).await?;
        serde_json::from_value(single_row(body))
            .map_err(|e| BackendError::Decode(format!("{}: {}", function, e)))
    }
}

/// Auth and REST endpoints report errors under different keys.
fn error_message(body: &Value) -> Option<String> {
    ["message", "msg", "error_description", "error"]
        .iter()
        .find_map(|key| body[*key].as_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// RPCs returning a single composite come back as an object or as a
/// one-element array depending on the function signature.
fn single_row(body: Value) -> Value {
    match body {
        Value::Array(mut rows) if rows.len() == 1 => rows.remove(0),
        other => other,
    }
}

/// Parses the total from a `Content-Range` header such as `0-24/573` or `*/0`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/').and_then(|(_, total)| total.parse().ok())
}

#[async_trait]
impl Backend for SupabaseClient {
    async fn get_user(&self, access_token: &str) -> BackendResult<AuthUser> {
        let req = self.request(Method::GET, "/auth/v1/user", Some(access_token));
        self.fetch(req).await
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Value,
    ) -> BackendResult<SignUpResult> {
        let req = self
            .request(Method::POST, "/auth/v1/signup", None)
            .json(&json!({ "email": email, "password": password, "data": metadata }));
        let body = self.send(req).await?;

        // With email confirmation enabled the user object comes back bare.
        if let Some(access_token) = body["access_token"].as_str() {
            let user: AuthUser = serde_json::from_value(body["user"].clone())
                .map_err(|e| BackendError::Decode(e.to_string()))?;
            Ok(SignUpResult {
                user: user.clone(),
                session: Some(Session {
                    access_token: access_token.to_string(),
                    user,
                }),
            })
        } else {
            let user_value = if body["user"].is_object() {
                body["user"].clone()
            } else {
                body
            };
            let user: AuthUser = serde_json::from_value(user_value)
                .map_err(|e| BackendError::Decode(e.to_string()))?;
            Ok(SignUpResult {
                user,
                session: None,
            })
        }
    }

    async fn update_password(&self, access_token: &str, password: &str) -> BackendResult<()> {
        let req = self
            .request(Method::PUT, "/auth/v1/user", Some(access_token))
            .json(&json!({ "password": password }));
        self.send(req).await?;
        Ok(())
    }

    async fn find_pending_invitation(&self, token: &str) -> BackendResult<Option<Invitation>> {
        let req = self
            .request(Method::GET, "/rest/v1/invitations", None)
            .query(&[
                ("select", "*".to_string()),
                ("token", format!("eq.{}", token)),
                ("status", "eq.pending".to_string()),
                ("limit", "1".to_string()),
            ]);
        let rows: Vec<Invitation> = self.fetch(req).await?;
        Ok(rows.into_iter().next())
    }

    async fn create_organization_with_owner(
        &self,
        access_token: &str,
        name: &str,
    ) -> BackendResult<Organization> {
        let body = self
            .rpc(
                access_token,
                "create_organization_with_owner",
                json!({ "org_name": name }),
            )
            .await?;
        serde_json::from_value(single_row(body)).map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn accept_invitation(
        &self,
        access_token: &str,
        invitation_id: Uuid,
        organization_id: Uuid,
        accepted_at: DateTime<Utc>,
    ) -> BackendResult<()> {
        let req = self
            .request(Method::PATCH, "/rest/v1/invitations", Some(access_token))
            .query(&[("id", format!("eq.{}", invitation_id))])
            .header("Prefer", "return=minimal")
            .json(&json!({
                "status": "accepted",
                "accepted_at": accepted_at,
                "organization_id": organization_id,
            }));
        self.send(req).await?;
        Ok(())
    }

    async fn mark_organization_admin_created(
        &self,
        access_token: &str,
        organization_id: Uuid,
    ) -> BackendResult<()> {
        let req = self
            .request(Method::PATCH, "/rest/v1/organizations", Some(access_token))
            .query(&[("id", format!("eq.{}", organization_id))])
            .header("Prefer", "return=minimal")
            .json(&json!({ "created_by_platform_admin": true }));
        self.send(req).await?;
        Ok(())
    }

    async fn find_membership(
        &self,
        access_token: &str,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> BackendResult<Option<OrganizationMember>> {
        let req = self
            .request(Method::GET, "/rest/v1/organization_members", Some(access_token))
            .query(&[
                ("select", "organization_id,user_id,role".to_string()),
                ("organization_id", format!("eq.{}", organization_id)),
                ("user_id", format!("eq.{}", user_id)),
                ("limit", "1".to_string()),
            ]);
        let rows: Vec<OrganizationMember> = self.fetch(req).await?;
        Ok(rows.into_iter().next())
    }

    async fn list_uploads(
        &self,
        access_token: &str,
        organization_id: Uuid,
    ) -> BackendResult<Vec<Upload>> {
        let req = self
            .request(Method::GET, "/rest/v1/uploads", Some(access_token))
            .query(&[
                ("select", "*".to_string()),
                ("organization_id", format!("eq.{}", organization_id)),
                ("order", "created_at.desc".to_string()),
            ]);
        self.fetch(req).await
    }

    async fn distributors_by_ids(
        &self,
        access_token: &str,
        ids: &[Uuid],
    ) -> BackendResult<Vec<Distributor>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let list = ids
            .iter()
            .map(Uuid::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let req = self
            .request(Method::GET, "/rest/v1/distributors", Some(access_token))
            .query(&[
                ("select", "id,name,state".to_string()),
                ("id", format!("in.({})", list)),
            ]);
        self.fetch(req).await
    }

    async fn count_rows_missing_dates(
        &self,
        access_token: &str,
        organization_id: Uuid,
    ) -> BackendResult<u64> {
        let resp = self
            .request(Method::HEAD, "/rest/v1/sales_data", Some(access_token))
            .query(&[
                ("select", "id".to_string()),
                ("organization_id", format!("eq.{}", organization_id)),
                ("report_date", "is.null".to_string()),
                ("year", "is.null".to_string()),
                ("month", "is.null".to_string()),
            ])
            .header("Prefer", "count=exact")
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(BackendError::Api(format!(
                "Count request failed ({})",
                status
            )));
        }

        resp.headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| BackendError::Decode("missing Content-Range total".into()))
    }

    async fn reprocess_upload(
        &self,
        access_token: &str,
        upload_id: Uuid,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> BackendResult<ServiceOutcome> {
        self.service_rpc(
            access_token,
            "reprocess_upload",
            json!({
                "p_upload_id": upload_id,
                "p_organization_id": organization_id,
                "p_user_id": user_id,
            }),
        )
        .await
    }

    async fn delete_upload(
        &self,
        access_token: &str,
        upload_id: Uuid,
        organization_id: Uuid,
    ) -> BackendResult<ServiceOutcome> {
        self.service_rpc(
            access_token,
            "delete_upload",
            json!({
                "p_upload_id": upload_id,
                "p_organization_id": organization_id,
            }),
        )
        .await
    }

    async fn assign_upload_dates(
        &self,
        access_token: &str,
        upload_id: Uuid,
        organization_id: Uuid,
        report_date: NaiveDate,
    ) -> BackendResult<ServiceOutcome> {
        self.service_rpc(
            access_token,
            "assign_upload_dates",
            json!({
                "p_upload_id": upload_id,
                "p_organization_id": organization_id,
                "p_report_date": report_date,
            }),
        )
        .await
    }

    async fn resolve_duplicate_products(
        &self,
        access_token: &str,
        upload_id: Uuid,
        organization_id: Uuid,
        resolutions: &[DuplicateResolution],
    ) -> BackendResult<ServiceOutcome> {
        self.service_rpc(
            access_token,
            "resolve_duplicate_products",
            json!({
                "p_upload_id": upload_id,
                "p_organization_id": organization_id,
                "p_resolutions": resolutions,
            }),
        )
        .await
    }
}
