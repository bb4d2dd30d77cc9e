use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::backend::{Backend, BackendError};
use crate::error::{AppError, AppResult};
use crate::models::{
    AiRepair, ConfidenceLevel, Distributor, DuplicateDetection, DuplicateResolution,
    ParsingWarnings, ServiceOutcome, Upload, UploadMetadata, UploadStatus,
};
use crate::services::busy::{BusyRegistry, BusyRows};

pub const ADD_DATES_LABEL: &str = "Add Dates";
pub const REVIEW_PRODUCTS_LABEL: &str = "Review Products";

/// The single remediation offered for an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UploadAction {
    None,
    ReviewDuplicates {
        prompt: String,
        control: &'static str,
    },
    AddDates {
        missing: Option<u64>,
        prompt: String,
        control: &'static str,
    },
    Manage {
        can_reprocess: bool,
        can_delete: bool,
    },
}

impl UploadAction {
    pub fn for_upload(upload: &Upload, meta: &UploadMetadata) -> Self {
        match upload.status {
            UploadStatus::Processing | UploadStatus::Unknown => UploadAction::None,
            UploadStatus::NeedsProductReview => UploadAction::ReviewDuplicates {
                prompt: duplicates_prompt(meta.duplicate_detection.as_ref()),
                control: REVIEW_PRODUCTS_LABEL,
            },
            UploadStatus::NeedsReview if meta.has_missing_dates() => UploadAction::AddDates {
                missing: meta.missing_dates.count,
                prompt: missing_dates_prompt(meta.missing_dates.count),
                control: ADD_DATES_LABEL,
            },
            _ => UploadAction::Manage {
                can_reprocess: upload.is_reprocessable,
                can_delete: true,
            },
        }
    }
}

fn missing_dates_prompt(count: Option<u64>) -> String {
    match count {
        Some(1) => "1 record is missing dates. Add dates to include it in analytics.".into(),
        Some(n) => format!("{n} records are missing dates. Add dates to include them in analytics."),
        None => "Some records are missing dates. Add dates to include them in analytics.".into(),
    }
}

fn duplicates_prompt(summary: Option<&DuplicateDetection>) -> String {
    match summary.and_then(|d| d.pending_review.or(d.duplicates_found)) {
        Some(1) => "1 possible duplicate product needs review.".into(),
        Some(n) => format!("{n} possible duplicate products need review."),
        None => "Possible duplicate products need review.".into(),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDiagnostics {
    pub confidence_score: Option<f64>,
    pub confidence_level: Option<ConfidenceLevel>,
    pub parsing_method: Option<String>,
    pub missing_dates: bool,
    pub records_missing_dates: Option<u64>,
    pub duplicate_detection: Option<DuplicateDetection>,
    pub parsing_warnings: Option<ParsingWarnings>,
    pub ai_repair: AiRepair,
}

impl From<&UploadMetadata> for UploadDiagnostics {
    fn from(meta: &UploadMetadata) -> Self {
        Self {
            confidence_score: meta.confidence_score,
            confidence_level: meta.confidence_level(),
            parsing_method: meta.parsing_method.clone(),
            missing_dates: meta.has_missing_dates(),
            records_missing_dates: meta.missing_dates.count,
            duplicate_detection: meta.duplicate_detection.clone(),
            parsing_warnings: meta
                .parsing_warnings
                .clone()
                .filter(|w| !w.is_empty()),
            ai_repair: meta
                .parsing_warnings
                .as_ref()
                .map(|w| w.ai_repair)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributorLabel {
    pub name: String,
    pub state: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRow {
    pub id: Uuid,
    pub filename: String,
    pub file_size: Option<i64>,
    pub status: UploadStatus,
    pub row_count: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub reprocessed_count: i32,
    pub distributor: Option<DistributorLabel>,
    pub diagnostics: UploadDiagnostics,
    pub action: UploadAction,
    pub reprocessing: bool,
    pub deleting: bool,
}

impl UploadRow {
    fn build(upload: Upload, distributors: &HashMap<Uuid, Distributor>, busy: &BusyRows) -> Self {
        let meta = UploadMetadata::from_value(&upload.metadata);
        let distributor = upload
            .distributor_id
            .and_then(|id| distributors.get(&id))
            .map(|d| DistributorLabel {
                name: d.name.clone(),
                state: d.state.clone(),
            });

        Self {
            action: UploadAction::for_upload(&upload, &meta),
            diagnostics: UploadDiagnostics::from(&meta),
            reprocessing: busy.is_reprocessing(upload.id),
            deleting: busy.is_deleting(upload.id),
            distributor,
            id: upload.id,
            filename: upload.filename,
            file_size: upload.file_size,
            status: upload.status,
            row_count: upload.row_count,
            error_message: upload.error_message,
            created_at: upload.created_at,
            processed_at: upload.processed_at,
            reprocessed_count: upload.reprocessed_count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub uploads: Vec<UploadRow>,
    pub rows_missing_dates: Option<u64>,
    pub missing_dates_warning: Option<String>,
}

/// Builds the dashboard for an organization. Only the upload list is
/// required; distributor names and the undated-row count are best effort.
pub async fn load_dashboard(
    backend: &dyn Backend,
    access_token: &str,
    organization_id: Uuid,
    busy: &BusyRows,
) -> Result<DashboardView, BackendError> {
    let mut uploads = backend.list_uploads(access_token, organization_id).await?;
    uploads.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let distributor_ids: Vec<Uuid> = uploads
        .iter()
        .filter_map(|u| u.distributor_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let distributors: HashMap<Uuid, Distributor> = if distributor_ids.is_empty() {
        HashMap::new()
    } else {
        match backend.distributors_by_ids(access_token, &distributor_ids).await {
            Ok(list) => list.into_iter().map(|d| (d.id, d)).collect(),
            Err(e) => {
                tracing::warn!(%organization_id, "distributor lookup failed: {e}");
                HashMap::new()
            }
        }
    };

    let rows_missing_dates = match backend
        .count_rows_missing_dates(access_token, organization_id)
        .await
    {
        Ok(count) => Some(count),
        Err(e) => {
            tracing::warn!(%organization_id, "missing-date count failed: {e}");
            None
        }
    };

    let missing_dates_warning = rows_missing_dates.filter(|n| *n > 0).map(|n| {
        format!("{n} sales records have no date and are excluded from analytics.")
    });

    Ok(DashboardView {
        uploads: uploads
            .into_iter()
            .map(|u| UploadRow::build(u, &distributors, busy))
            .collect(),
        rows_missing_dates,
        missing_dates_warning,
    })
}

fn check_outcome(outcome: ServiceOutcome, fallback: &str) -> AppResult<()> {
    if outcome.success {
        Ok(())
    } else {
        let msg = outcome
            .error
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| fallback.to_string());
        Err(AppError::Upstream(msg))
    }
}

fn upstream(e: BackendError) -> AppError {
    AppError::Upstream(e.user_message())
}

pub struct ActionContext<'a> {
    pub backend: &'a dyn Backend,
    pub busy: &'a BusyRegistry,
    pub access_token: &'a str,
    pub user_id: Uuid,
    pub organization_id: Uuid,
}

impl ActionContext<'_> {
    async fn refreshed(&self) -> AppResult<DashboardView> {
        let busy = self.busy.snapshot(self.organization_id);
        load_dashboard(self.backend, self.access_token, self.organization_id, &busy)
            .await
            .map_err(AppError::from)
    }

    pub async fn reprocess(&self, upload_id: Uuid) -> AppResult<DashboardView> {
        let guard = self
            .busy
            .begin_reprocess(self.organization_id, upload_id)
            .ok_or_else(|| AppError::Conflict("Upload is already being reprocessed".into()))?;

        let result = self
            .backend
            .reprocess_upload(self.access_token, upload_id, self.organization_id, self.user_id)
            .await
            .map_err(upstream)
            .and_then(|outcome| check_outcome(outcome, "Failed to reprocess upload"));
        drop(guard);

        if let Err(e) = &result {
            tracing::error!(%upload_id, "reprocess failed: {e}");
        }
        result?;
        tracing::info!(%upload_id, "upload reprocess started");
        self.refreshed().await
    }

    pub async fn delete(&self, upload_id: Uuid) -> AppResult<DashboardView> {
        let guard = self
            .busy
            .begin_delete(self.organization_id, upload_id)
            .ok_or_else(|| AppError::Conflict("Upload is already being deleted".into()))?;

        let result = self
            .backend
            .delete_upload(self.access_token, upload_id, self.organization_id)
            .await
            .map_err(upstream)
            .and_then(|outcome| check_outcome(outcome, "Failed to delete upload"));
        drop(guard);

        if let Err(e) = &result {
            tracing::error!(%upload_id, "delete failed: {e}");
        }
        result?;
        tracing::info!(%upload_id, "upload deleted");
        self.refreshed().await
    }

    pub async fn assign_dates(
        &self,
        upload_id: Uuid,
        report_date: NaiveDate,
    ) -> AppResult<DashboardView> {
        let outcome = self
            .backend
            .assign_upload_dates(self.access_token, upload_id, self.organization_id, report_date)
            .await
            .map_err(upstream)?;
        check_outcome(outcome, "Failed to assign dates")?;
        tracing::info!(%upload_id, %report_date, "dates assigned");
        self.refreshed().await
    }

    pub async fn resolve_duplicates(
        &self,
        upload_id: Uuid,
        resolutions: &[DuplicateResolution],
    ) -> AppResult<DashboardView> {
        if resolutions.is_empty() {
            return Err(AppError::BadRequest("No product decisions submitted".into()));
        }
        let outcome = self
            .backend
            .resolve_duplicate_products(self.access_token, upload_id, self.organization_id, resolutions)
            .await
            .map_err(upstream)?;
        check_outcome(outcome, "Failed to resolve duplicate products")?;
        tracing::info!(%upload_id, decisions = resolutions.len(), "duplicates resolved");
        self.refreshed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::models::DuplicateDecision;
    use chrono::Duration;
    use serde_json::{json, Value};

    fn upload(org: Uuid, status: UploadStatus, age_mins: i64, metadata: Value) -> Upload {
        Upload {
            id: Uuid::new_v4(),
            organization_id: org,
            filename: format!("sales-{age_mins}.csv"),
            file_size: Some(2048),
            status,
            row_count: Some(120),
            error_message: None,
            created_at: Utc::now() - Duration::minutes(age_mins),
            processed_at: None,
            distributor_id: None,
            is_reprocessable: true,
            reprocessed_count: 0,
            metadata,
        }
    }

    fn ctx<'a>(
        backend: &'a MemoryBackend,
        busy: &'a BusyRegistry,
        org: Uuid,
    ) -> ActionContext<'a> {
        ActionContext {
            backend,
            busy,
            access_token: "token",
            user_id: Uuid::new_v4(),
            organization_id: org,
        }
    }

    #[test]
    fn missing_dates_prompt_carries_the_count() {
        let org = Uuid::new_v4();
        let u = upload(
            org,
            UploadStatus::NeedsReview,
            1,
            json!({"_missing_dates": true, "_records_missing_dates": 7}),
        );
        let meta = UploadMetadata::from_value(&u.metadata);

        match UploadAction::for_upload(&u, &meta) {
            UploadAction::AddDates {
                missing,
                prompt,
                control,
            } => {
                assert_eq!(missing, Some(7));
                assert!(prompt.contains('7'));
                assert_eq!(control, "Add Dates");
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn status_to_action_mapping() {
        let org = Uuid::new_v4();
        let action = |status, meta: Value, reprocessable| {
            let mut u = upload(org, status, 1, meta);
            u.is_reprocessable = reprocessable;
            UploadAction::for_upload(&u, &UploadMetadata::from_value(&u.metadata))
        };

        assert_eq!(action(UploadStatus::Processing, Value::Null, true), UploadAction::None);
        assert_eq!(action(UploadStatus::Unknown, Value::Null, true), UploadAction::None);
        assert!(matches!(
            action(
                UploadStatus::NeedsProductReview,
                json!({"_missing_dates": true, "duplicate_detection": {"pending_review": 3}}),
                true
            ),
            UploadAction::ReviewDuplicates { ref prompt, control: "Review Products" } if prompt.starts_with("3 ")
        ));
        // needs_review without undated rows falls through to the generic actions
        assert_eq!(
            action(UploadStatus::NeedsReview, json!({}), false),
            UploadAction::Manage {
                can_reprocess: false,
                can_delete: true
            }
        );
        assert_eq!(
            action(UploadStatus::Failed, Value::Null, true),
            UploadAction::Manage {
                can_reprocess: true,
                can_delete: true
            }
        );
        assert!(matches!(
            action(UploadStatus::Completed, Value::Null, false),
            UploadAction::Manage { can_reprocess: false, .. }
        ));
    }

    #[tokio::test]
    async fn dashboard_orders_annotates_and_counts() {
        let backend = MemoryBackend::new();
        let org = Uuid::new_v4();
        let dist = Distributor {
            id: Uuid::new_v4(),
            name: "Southern Glazer's".into(),
            state: Some("TX".into()),
        };
        let mut newest = upload(org, UploadStatus::Completed, 1, json!({"confidence_score": 0.93}));
        newest.distributor_id = Some(dist.id);
        let older = upload(org, UploadStatus::Failed, 60, json!("not an object"));
        let elsewhere = upload(Uuid::new_v4(), UploadStatus::Completed, 5, Value::Null);
        backend.with(|s| {
            s.uploads = vec![older.clone(), newest.clone(), elsewhere];
            s.distributors = vec![dist];
            s.rows_missing_dates = 42;
        });

        let view = load_dashboard(&backend, "token", org, &BusyRows::default())
            .await
            .unwrap();

        assert_eq!(
            view.uploads.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![newest.id, older.id]
        );
        assert_eq!(view.uploads[0].distributor.as_ref().unwrap().name, "Southern Glazer's");
        assert_eq!(
            view.uploads[0].diagnostics.confidence_level,
            Some(ConfidenceLevel::High)
        );
        assert!(view.uploads[1].distributor.is_none());
        assert_eq!(view.rows_missing_dates, Some(42));
        assert!(view.missing_dates_warning.unwrap().contains("42"));
    }

    #[tokio::test]
    async fn side_lookups_degrade_instead_of_failing() {
        let backend = MemoryBackend::new();
        let org = Uuid::new_v4();
        let mut u = upload(org, UploadStatus::Completed, 1, Value::Null);
        u.distributor_id = Some(Uuid::new_v4());
        backend.with(|s| s.uploads = vec![u]);
        backend.fail("distributors_by_ids", "timeout");
        backend.fail("count_rows_missing_dates", "timeout");

        let view = load_dashboard(&backend, "token", org, &BusyRows::default())
            .await
            .unwrap();

        assert_eq!(view.uploads.len(), 1);
        assert!(view.uploads[0].distributor.is_none());
        assert_eq!(view.rows_missing_dates, None);
        assert_eq!(view.missing_dates_warning, None);
    }

    #[tokio::test]
    async fn upload_list_failure_is_an_error() {
        let backend = MemoryBackend::new();
        backend.fail("list_uploads", "permission denied for table uploads");
        let err = load_dashboard(&backend, "token", Uuid::new_v4(), &BusyRows::default())
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "permission denied for table uploads");
    }

    #[tokio::test]
    async fn no_distributor_lookup_without_references() {
        let backend = MemoryBackend::new();
        let org = Uuid::new_v4();
        backend.with(|s| s.uploads = vec![upload(org, UploadStatus::Completed, 1, Value::Null)]);

        load_dashboard(&backend, "token", org, &BusyRows::default())
            .await
            .unwrap();

        assert!(!backend.called("distributors_by_ids"));
    }

    #[tokio::test]
    async fn busy_flags_follow_the_acted_row() {
        let backend = MemoryBackend::new();
        let registry = BusyRegistry::new();
        let org = Uuid::new_v4();
        let a = upload(org, UploadStatus::Failed, 1, Value::Null);
        let b = upload(org, UploadStatus::Failed, 2, Value::Null);
        backend.with(|s| s.uploads = vec![a.clone(), b.clone()]);

        let _guard = registry.begin_reprocess(org, a.id).unwrap();
        let view = load_dashboard(&backend, "token", org, &registry.snapshot(org))
            .await
            .unwrap();

        let row = |id| view.uploads.iter().find(|r| r.id == id).unwrap();
        assert!(row(a.id).reprocessing);
        assert!(!row(b.id).reprocessing);
        assert!(!row(a.id).deleting);
    }

    #[tokio::test]
    async fn reprocess_refetches_and_clears_busy_mark() {
        let backend = MemoryBackend::new();
        let registry = BusyRegistry::new();
        let org = Uuid::new_v4();
        let u = upload(org, UploadStatus::Failed, 1, Value::Null);
        backend.with(|s| s.uploads = vec![u.clone()]);

        let view = ctx(&backend, &registry, org).reprocess(u.id).await.unwrap();

        assert_eq!(view.uploads[0].reprocessed_count, 1);
        assert!(!view.uploads[0].reprocessing);
        assert_eq!(registry.snapshot(org), BusyRows::default());
        assert_eq!(
            backend.calls(),
            vec!["reprocess_upload", "list_uploads", "count_rows_missing_dates"]
        );
    }

    #[tokio::test]
    async fn reprocess_of_a_busy_row_is_a_conflict() {
        let backend = MemoryBackend::new();
        let registry = BusyRegistry::new();
        let org = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let _held = registry.begin_reprocess(org, a).unwrap();

        let err = ctx(&backend, &registry, org).reprocess(a).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(!backend.called("reprocess_upload"));

        ctx(&backend, &registry, org).reprocess(b).await.unwrap();
        assert!(backend.called("reprocess_upload"));
    }

    #[tokio::test]
    async fn failed_services_surface_their_error_without_refetch() {
        let backend = MemoryBackend::new();
        let registry = BusyRegistry::new();
        let org = Uuid::new_v4();
        let u = upload(org, UploadStatus::Completed, 1, Value::Null);
        backend.with(|s| {
            s.uploads = vec![u.clone()];
            s.outcomes
                .insert("delete_upload", ServiceOutcome::failed("Upload is locked"));
            s.outcomes.insert("reprocess_upload", ServiceOutcome::default());
        });

        let err = ctx(&backend, &registry, org).delete(u.id).await.unwrap_err();
        assert!(matches!(err, AppError::Upstream(ref m) if m == "Upload is locked"));

        let err = ctx(&backend, &registry, org).reprocess(u.id).await.unwrap_err();
        assert!(matches!(err, AppError::Upstream(ref m) if m == "Failed to reprocess upload"));

        assert!(!backend.called("list_uploads"));
        assert_eq!(registry.snapshot(org), BusyRows::default());
        assert_eq!(backend.with(|s| s.uploads.len()), 1);
    }

    #[tokio::test]
    async fn delete_removes_row_after_refetch() {
        let backend = MemoryBackend::new();
        let registry = BusyRegistry::new();
        let org = Uuid::new_v4();
        let keep = upload(org, UploadStatus::Completed, 1, Value::Null);
        let gone = upload(org, UploadStatus::Failed, 2, Value::Null);
        backend.with(|s| s.uploads = vec![keep.clone(), gone.clone()]);

        let view = ctx(&backend, &registry, org).delete(gone.id).await.unwrap();

        assert_eq!(view.uploads.len(), 1);
        assert_eq!(view.uploads[0].id, keep.id);
    }

    #[tokio::test]
    async fn remediation_delegations() {
        let backend = MemoryBackend::new();
        let registry = BusyRegistry::new();
        let org = Uuid::new_v4();
        let id = Uuid::new_v4();
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        ctx(&backend, &registry, org).assign_dates(id, date).await.unwrap();
        assert!(backend.called("assign_upload_dates"));

        let err = ctx(&backend, &registry, org)
            .resolve_duplicates(id, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(!backend.called("resolve_duplicate_products"));

        let decisions = [DuplicateResolution {
            product_name: "Cab 750".into(),
            canonical_name: Some("Cabernet 750ml".into()),
            decision: DuplicateDecision::Merge,
        }];
        ctx(&backend, &registry, org)
            .resolve_duplicates(id, &decisions)
            .await
            .unwrap();
        assert!(backend.called("resolve_duplicate_products"));
    }
}
