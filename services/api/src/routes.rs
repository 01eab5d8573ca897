use axum::extract::Path;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use performance_engine::domain::{ActivityRecord, EmployeeId, EvaluationId};
use performance_engine::scoring::{ScoreReport, ScoringScope};
use performance_engine::store::ActivityEvent;
use performance_engine::{SweepReport, TenantId};
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::infra::AppState;

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .route("/api/v1/evaluations/score", post(score_endpoint))
        .route("/api/v1/evaluations/sections", post(sections_endpoint))
        .route("/api/v1/employees/:id/history", get(employee_history_endpoint))
        .route("/api/v1/activity/events", post(enqueue_event_endpoint))
        .route("/api/v1/activity/process", post(process_events_endpoint))
        .layer(Extension(state))
}

fn tenant_from(headers: &HeaderMap) -> Result<TenantId, ApiError> {
    headers
        .get("x-tenant-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| TenantId(value.to_string()))
        .ok_or(ApiError::MissingTenant)
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScoreRequest {
    #[serde(rename = "evaluationId")]
    evaluation_id: Option<String>,
    #[serde(rename = "employeeId")]
    employee_id: Option<String>,
    #[serde(rename = "departmentId")]
    department_id: Option<String>,
    #[serde(rename = "filterRange")]
    filter_range: String,
    #[serde(default, rename = "startDateE")]
    start_date: Option<String>,
    #[serde(default, rename = "endDateE")]
    end_date: Option<String>,
}

impl ScoreRequest {
    fn scope(&self) -> Result<ScoringScope, ApiError> {
        let evaluation = self
            .evaluation_id
            .as_ref()
            .ok_or(ApiError::MissingParameter("evaluationId"))?;
        let evaluation = EvaluationId(evaluation.clone());

        if let Some(department) = &self.department_id {
            return Ok(ScoringScope::Department {
                evaluation,
                department: performance_engine::domain::DepartmentId(department.clone()),
            });
        }
        if let Some(employee) = &self.employee_id {
            return Ok(ScoringScope::Employee {
                evaluation,
                employee: EmployeeId(employee.clone()),
            });
        }
        Ok(ScoringScope::Evaluation { evaluation })
    }
}

pub(crate) async fn score_endpoint(
    headers: HeaderMap,
    Extension(state): Extension<AppState>,
    Json(payload): Json<ScoreRequest>,
) -> Result<Json<ScoreReport>, ApiError> {
    let tenant = tenant_from(&headers)?;
    let scope = payload.scope()?;

    let engine = state.engine.clone();
    let report = tokio::task::spawn_blocking(move || {
        engine.scoring.score(
            &tenant,
            &scope,
            &payload.filter_range,
            payload.start_date.as_deref(),
            payload.end_date.as_deref(),
            Utc::now(),
        )
    })
    .await
    .map_err(|err| ApiError::Server(axum::Error::new(err)))??;

    report
        .map(Json)
        .ok_or(ApiError::NotFound("evaluation, employee, or department"))
}

#[derive(Debug, Deserialize)]
pub(crate) struct SectionsRequest {
    #[serde(rename = "evaluationId")]
    evaluation_id: String,
}

pub(crate) async fn sections_endpoint(
    headers: HeaderMap,
    Extension(state): Extension<AppState>,
    Json(payload): Json<SectionsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = tenant_from(&headers)?;
    let overview = state
        .engine
        .scoring
        .sections_overview(&tenant, &EvaluationId(payload.evaluation_id))?
        .ok_or(ApiError::NotFound("evaluation"))?;
    Ok(Json(overview))
}

pub(crate) async fn employee_history_endpoint(
    headers: HeaderMap,
    Path(employee_id): Path<String>,
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = tenant_from(&headers)?;
    let snapshots = state
        .engine
        .history
        .for_employee(&tenant, &EmployeeId(employee_id))?;
    Ok(Json(snapshots))
}

pub(crate) async fn enqueue_event_endpoint(
    headers: HeaderMap,
    Extension(state): Extension<AppState>,
    Json(payload): Json<ActivityRecord>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = tenant_from(&headers)?;
    state.engine.queue.push(ActivityEvent { tenant, payload })?;
    let pending = state.engine.queue.len()?;
    Ok(Json(json!({ "queued": true, "pending": pending })))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ProcessRequest {
    #[serde(default)]
    replay: bool,
}

pub(crate) async fn process_events_endpoint(
    headers: HeaderMap,
    Extension(state): Extension<AppState>,
    payload: Option<Json<ProcessRequest>>,
) -> Result<Json<SweepReport>, ApiError> {
    // Tenancy travels inside each queued event; the header is still required
    // so the adapter surface stays uniform.
    tenant_from(&headers)?;
    let replay = payload.map(|Json(request)| request.replay).unwrap_or(false);

    let engine = state.engine.clone();
    let report = tokio::task::spawn_blocking(move || {
        let processor = if replay {
            &engine.replay_processor
        } else {
            &engine.processor
        };
        processor.sweep(Utc::now())
    })
    .await
    .map_err(|err| ApiError::Server(axum::Error::new(err)))??;

    Ok(Json(report))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
