//! HTTP/JSON interface of the attendance daemon.
//!
//! Every `/api/*` route except `POST /api/login` requires
//! `Authorization: Bearer <token>`.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Path, Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rollcall_core::{FaceTemplate, MatchError};
use rollcall_store::{EmployeeUpdate, NewEmployee};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::Auth;
use crate::config::Config;
use crate::worker::{ScanOutcome, StoreHandle, WorkerError};

/// Shared state for all handlers.
pub struct AppState {
    pub store: StoreHandle,
    pub auth: Auth,
    pub config: Config,
}

/// Error surfaced to HTTP callers as `{ "ok": false, "error": ... }`.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<WorkerError> for ApiError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::Match(MatchError::InvalidInput(msg)) => ApiError::BadRequest(msg),
            WorkerError::Template(e) => ApiError::BadRequest(e.to_string()),
            WorkerError::Invalid(msg) => ApiError::BadRequest(msg),
            WorkerError::NotFound(id) => ApiError::NotFound(format!("employee {id} not found")),
            other => {
                tracing::error!(error = %other, "request failed");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "ok": false, "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// `Json` whose rejections answer in the API's own error shape.
struct ApiJson<T>(T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
        Ok(Self(value))
    }
}

fn template_from(value: &Value) -> ApiResult<FaceTemplate> {
    FaceTemplate::from_json(value).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// Build the router.
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/api/logout", post(logout))
        .route("/api/status", get(status))
        .route("/api/employees", get(list_employees).post(create_employee))
        .route(
            "/api/employees/{id}",
            get(get_employee).put(update_employee).delete(delete_employee),
        )
        .route(
            "/api/employees/{id}/template",
            put(set_template).delete(clear_template),
        )
        .route("/api/employees/{id}/attendance", get(employee_attendance))
        .route("/api/scan", post(scan))
        .route("/api/attendance", get(attendance_on))
        .route("/api/reports/daily", get(daily_report))
        .route("/api/reports/summary", get(summary_report))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/health", get(health))
        .route("/api/login", post(login))
        .merge(protected)
        .with_state(state)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

async fn require_token(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> ApiResult<Response> {
    let token = bearer_token(req.headers()).ok_or(ApiError::Unauthorized)?;
    if state.auth.validate(token).is_none() {
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(req).await)
}

fn parse_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid employee id: {raw}")))
}

// ---------------------------
// Session
// ---------------------------

async fn health() -> Json<Value> {
    Json(json!({ "ok": true, "version": env!("CARGO_PKG_VERSION") }))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

async fn login(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> ApiResult<Json<Value>> {
    let (token, expires_at) = state
        .auth
        .login(&req.username, &req.password)
        .ok_or(ApiError::Unauthorized)?;
    Ok(Json(json!({ "ok": true, "token": token, "expires_at": expires_at })))
}

async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Json<Value> {
    let revoked = bearer_token(&headers)
        .map(|t| state.auth.revoke(t))
        .unwrap_or(false);
    Json(json!({ "ok": revoked }))
}

async fn status(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let counts = state.store.status().await?;
    let config = &state.config;
    Ok(Json(json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
        "employees": counts.employees,
        "enrolled": counts.enrolled,
        "match_threshold": config.match_threshold,
        "template_dim": config.template_dim,
        "late_cutoff": config.late_cutoff.format("%H:%M").to_string(),
        "local_time": config.local_now(),
    })))
}

// ---------------------------
// Employees
// ---------------------------

#[derive(Debug, Deserialize)]
struct CreateEmployeeRequest {
    #[serde(flatten)]
    employee: NewEmployee,
    #[serde(default)]
    template: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct TemplateRequest {
    template: Value,
}

async fn list_employees(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let employees = state.store.list_employees().await?;
    Ok(Json(json!({ "ok": true, "employees": employees })))
}

async fn create_employee(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<CreateEmployeeRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let template = req.template.as_ref().map(template_from).transpose()?;
    let employee = state.store.create_employee(req.employee, template).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "ok": true, "employee": employee })),
    ))
}

async fn get_employee(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let employee = state.store.get_employee(parse_id(&id)?).await?;
    Ok(Json(json!({ "ok": true, "employee": employee })))
}

async fn update_employee(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(update): ApiJson<EmployeeUpdate>,
) -> ApiResult<Json<Value>> {
    let employee = state.store.update_employee(parse_id(&id)?, update).await?;
    Ok(Json(json!({ "ok": true, "employee": employee })))
}

async fn delete_employee(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.store.delete_employee(parse_id(&id)?).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn set_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<TemplateRequest>,
) -> ApiResult<Json<Value>> {
    let id = parse_id(&id)?;
    let employee = state
        .store
        .set_template(id, template_from(&req.template)?)
        .await?;
    Ok(Json(json!({ "ok": true, "employee": employee })))
}

async fn clear_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let employee = state.store.clear_template(parse_id(&id)?).await?;
    Ok(Json(json!({ "ok": true, "employee": employee })))
}

#[derive(Debug, Deserialize)]
struct RangeQuery {
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

impl RangeQuery {
    /// Defaults to the 30 days ending today.
    fn resolve(&self, today: NaiveDate) -> ApiResult<(NaiveDate, NaiveDate)> {
        let to = self.to.unwrap_or(today);
        let from = self.from.unwrap_or(to - Duration::days(29));
        if from > to {
            return Err(ApiError::BadRequest(format!("empty range: {from} > {to}")));
        }
        Ok((from, to))
    }
}

async fn employee_attendance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(range): Query<RangeQuery>,
) -> ApiResult<Json<Value>> {
    let id = parse_id(&id)?;
    let (from, to) = range.resolve(state.config.local_now().date())?;
    let days = state.store.history(id, from, to).await?;
    Ok(Json(json!({ "ok": true, "from": from, "to": to, "attendance": days })))
}

// ---------------------------
// Scan
// ---------------------------

#[derive(Debug, Deserialize)]
struct ScanRequest {
    descriptor: Value,
    /// Local wall-clock time of the capture; defaults to now.
    #[serde(default)]
    at: Option<NaiveDateTime>,
}

async fn scan(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<ScanRequest>,
) -> ApiResult<Json<Value>> {
    let probe = template_from(&req.descriptor)?;
    let at = req.at.unwrap_or_else(|| state.config.local_now());
    let outcome = state.store.scan(probe, at).await?;
    Ok(Json(scan_reply(&outcome)))
}

/// Caller-facing discriminated result of a scan.
fn scan_reply(outcome: &ScanOutcome) -> Value {
    match outcome {
        ScanOutcome::Rejected(reason) => json!({ "ok": false, "reason": reason }),
        ScanOutcome::Matched {
            employee,
            distance,
            confidence,
            attendance,
        } => match attendance.event() {
            Some(event) => json!({
                "ok": true,
                "employee": employee,
                "event": event,
                "confidence": confidence,
                "distance": distance,
                "status": attendance.day().status,
                "attendance": attendance.day(),
            }),
            None => json!({
                "ok": false,
                "reason": "already_complete",
                "employee": employee,
                "attendance": attendance.day(),
            }),
        },
    }
}

// ---------------------------
// Attendance and reports
// ---------------------------

#[derive(Debug, Deserialize)]
struct DateQuery {
    date: Option<NaiveDate>,
}

async fn attendance_on(
    State(state): State<Arc<AppState>>,
    Query(q): Query<DateQuery>,
) -> ApiResult<Json<Value>> {
    let date = q.date.unwrap_or_else(|| state.config.local_now().date());
    let days = state.store.attendance_on(date).await?;
    Ok(Json(json!({ "ok": true, "date": date, "attendance": days })))
}

async fn daily_report(
    State(state): State<Arc<AppState>>,
    Query(q): Query<DateQuery>,
) -> ApiResult<Json<Value>> {
    let date = q.date.unwrap_or_else(|| state.config.local_now().date());
    let report = state.store.daily_report(date).await?;
    Ok(Json(json!({ "ok": true, "report": report })))
}

async fn summary_report(
    State(state): State<Arc<AppState>>,
    Query(range): Query<RangeQuery>,
) -> ApiResult<Json<Value>> {
    let (from, to) = range.resolve(state.config.local_now().date())?;
    let summary = state.store.summary(from, to).await?;
    Ok(Json(json!({ "ok": true, "from": from, "to": to, "summary": summary })))
}
