use axum::{
    extract::{Path, State},
    Extension, Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::auth::AuthSession;
use crate::models::{AssignDatesRequest, ResolveDuplicatesRequest};
use crate::services::dashboard::{self, ActionContext, DashboardView};
use crate::AppState;

fn context<'a>(
    state: &'a AppState,
    session: &'a AuthSession,
    organization_id: Uuid,
) -> ActionContext<'a> {
    ActionContext {
        backend: state.backend.as_ref(),
        busy: &state.busy,
        access_token: &session.access_token,
        user_id: session.user_id,
        organization_id,
    }
}

pub async fn list_uploads(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Path(org_id): Path<Uuid>,
) -> AppResult<Json<DashboardView>> {
    let busy = state.busy.snapshot(org_id);
    let view = dashboard::load_dashboard(
        state.backend.as_ref(),
        &session.access_token,
        org_id,
        &busy,
    )
    .await?;
    Ok(Json(view))
}

pub async fn reprocess(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Path((org_id, upload_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<DashboardView>> {
    let view = context(&state, &session, org_id).reprocess(upload_id).await?;
    Ok(Json(view))
}

pub async fn delete_upload(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Path((org_id, upload_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<DashboardView>> {
    let view = context(&state, &session, org_id).delete(upload_id).await?;
    Ok(Json(view))
}

pub async fn assign_dates(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Path((org_id, upload_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<AssignDatesRequest>,
) -> AppResult<Json<DashboardView>> {
    let view = context(&state, &session, org_id)
        .assign_dates(upload_id, body.report_date)
        .await?;
    Ok(Json(view))
}

pub async fn resolve_duplicates(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Path((org_id, upload_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<ResolveDuplicatesRequest>,
) -> AppResult<Json<DashboardView>> {
    let view = context(&state, &session, org_id)
        .resolve_duplicates(upload_id, &body.resolutions)
        .await?;
    Ok(Json(view))
}
