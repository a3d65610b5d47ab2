mod acl;
pub mod auth;
mod config;

use std::sync::Arc;

use crate::ingest;
use crate::notify;
use crate::report::{FriendlyNameMap, Report, ReportFormat};
use crate::server::auth::AuthCtx;
use crate::storage::models::Device;
use crate::storage::{BlockOutcome, RegisterOutcome};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::response::Response as AxumResponse;
use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    http::{Method, StatusCode, header},
    routing::{get, post},
};
use chrono::{NaiveDate, NaiveTime, Utc};
pub use config::{AppConfig, SyncConfig};
use kidgate_shared::api;
use kidgate_shared::auth::Role;
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Span, info_span};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: crate::storage::Store,
    friendly: Arc<FriendlyNameMap>,
}

impl AppState {
    pub fn new(config: AppConfig, store: crate::storage::Store) -> Self {
        let friendly = Arc::new(FriendlyNameMap::new(config.friendly_names.clone()));
        Self {
            config,
            store,
            friendly,
        }
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

pub fn router(state: AppState) -> Router {
    let private = Router::new()
        .route("/api/v1/devices", post(api_register_device))
        .route("/api/v1/sync/usage", post(api_sync_usage))
        .route("/api/v1/devices/{device_id}/usage", get(api_usage_summary))
        .route("/api/v1/devices/{device_id}/report", get(api_usage_report))
        .route(
            "/api/v1/devices/{device_id}/rules",
            get(api_get_rule).post(api_set_rule),
        )
        .route(
            "/api/v1/devices/{device_id}/blocked-apps",
            get(api_poll_blocked).post(api_block_app),
        )
        .route(
            "/api/v1/devices/{device_id}/blocked-apps/unblock",
            post(api_unblock_app),
        )
        .with_state(state.clone())
        .layer(middleware::from_fn(acl::enforce_acl))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ))
        .layer(middleware::from_fn(set_auth_span_fields));

    // Trace with request context (method, path, request_id)
    let trace = TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
        let request_id = req
            .extensions()
            .get::<ReqId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
            parent_id = tracing::field::Empty,
            role = tracing::field::Empty,
            device_id = tracing::field::Empty
        )
    });

    let app = Router::new()
        .route("/healthz", get(health))
        .merge(private)
        .with_state(state.clone())
        .layer(trace)
        .layer(middleware::from_fn(add_security_headers))
        .layer(middleware::from_fn(add_request_id));

    // Optionally add CORS for dev if configured
    if let Some(origin) = &state.config.dev_cors_origin {
        let hv = header::HeaderValue::from_str(origin)
            .unwrap_or(header::HeaderValue::from_static("http://localhost:5173"));
        let cors = CorsLayer::new()
            .allow_origin(hv)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
        app.layer(cors)
    } else {
        app
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn add_request_id(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let hdr = HeaderName::from_static("x-request-id");
    // Use provided x-request-id if present, else generate
    let rid = req
        .headers()
        .get(&hdr)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(ReqId(rid.clone()));
    let mut resp = next.run(req).await;
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

async fn add_security_headers(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let path = req.uri().path().to_string();
    let mut resp = next.run(req).await;

    let headers = resp.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("SAMEORIGIN"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );

    // Disable caching for API and health endpoints
    if path == "/healthz" || path.starts_with("/api/") {
        headers.insert(
            HeaderName::from_static("cache-control"),
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        );
    }

    Ok(resp)
}

async fn set_auth_span_fields(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    if let Some(auth) = req.extensions().get::<AuthCtx>() {
        let span = Span::current();
        span.record("parent_id", tracing::field::display(&auth.claims.sub));
        span.record("role", tracing::field::debug(&auth.claims.role));
        if let Some(did) = &auth.claims.device_id {
            span.record("device_id", tracing::field::display(did));
        }
    }
    Ok(next.run(req).await)
}

/// Resolve a device by the authenticated parent's id, 404 when unknown or
/// owned by someone else (never distinguishable from the outside).
async fn resolve_device(
    state: &AppState,
    auth: &AuthCtx,
    device_id: &str,
) -> Result<Device, AppError> {
    state
        .store
        .find_device(&auth.claims.sub, device_id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("device not found: {}", device_id)))
}

/// Device tokens may only act on the device they were minted for.
fn ensure_device_scope(auth: &AuthCtx, device_id: &str) -> Result<(), AppError> {
    match auth.claims.role {
        Role::Parent => Ok(()),
        Role::Device => {
            if auth.claims.device_id.as_deref() == Some(device_id) {
                Ok(())
            } else {
                Err(AppError::forbidden())
            }
        }
    }
}

async fn api_register_device(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::RegisterDeviceReq>,
) -> Result<Json<api::RegisterDeviceResp>, AppError> {
    let device_id = body.device_id.trim();
    if device_id.is_empty() {
        return Err(AppError::bad_request("device_id is required"));
    }
    let nickname = body
        .nickname
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let outcome = state
        .store
        .register_device(&auth.claims.sub, device_id, nickname)
        .await
        .map_err(AppError::internal)?;
    let status = match &outcome {
        RegisterOutcome::Created(_) => api::RegisterStatus::Created,
        RegisterOutcome::AlreadyRegistered(_) => api::RegisterStatus::AlreadyRegistered,
    };
    Ok(Json(api::RegisterDeviceResp {
        status,
        device_id: outcome.device().identifier.clone(),
    }))
}

async fn api_sync_usage(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::SyncUsageReq>,
) -> Result<Json<api::SyncUsageResp>, AppError> {
    ensure_device_scope(&auth, &body.device_id)?;
    let device = resolve_device(&state, &auth, &body.device_id).await?;

    // Shape check before any per-entry processing.
    let Some(raw_entries) = body.usage_data.as_array() else {
        return Err(AppError::bad_request("usage_data should be a list"));
    };

    let limits = state.config.sync.limits();
    let outcome = ingest::validate_batch(raw_entries, &limits);
    let valid_entries = outcome.accepted.len();
    let skipped_entries = outcome.skipped();

    state
        .store
        .record_sync(device.id, outcome.accepted)
        .await
        .map_err(AppError::internal)?;

    tracing::info!(
        device_id = %device.identifier,
        total = outcome.total,
        valid = valid_entries,
        skipped = skipped_entries,
        "sync completed"
    );

    let mut errors = outcome.errors;
    let additional = errors.len().saturating_sub(limits.max_reported_errors);
    errors.truncate(limits.max_reported_errors);

    Ok(Json(api::SyncUsageResp {
        status: "synced".to_string(),
        total_entries: outcome.total,
        valid_entries,
        skipped_entries,
        errors: (!errors.is_empty()).then_some(errors),
        additional_errors: (additional > 0).then_some(additional),
    }))
}

async fn api_usage_summary(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(device_id): Path<String>,
) -> Result<Json<api::UsageSummaryDto>, AppError> {
    let device = resolve_device(&state, &auth, &device_id).await?;

    let per_app = state
        .store
        .per_app_totals(device.id)
        .await
        .map_err(AppError::internal)?;
    let per_day = state
        .store
        .per_day_totals(device.id, None, None)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(api::UsageSummaryDto {
        device_id: device.identifier,
        per_app: per_app
            .into_iter()
            .map(|(app_name, total_seconds)| api::AppTotalDto {
                app_name,
                total_seconds,
                hours: crate::report::hours(total_seconds),
            })
            .collect(),
        per_day: per_day
            .into_iter()
            .map(|(date, total_seconds)| api::DayTotalDto {
                date: date.to_string(),
                total_seconds,
                hours: crate::report::hours(total_seconds),
            })
            .collect(),
    }))
}

#[derive(Deserialize)]
struct ReportQuery {
    format: Option<String>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

async fn api_usage_report(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(device_id): Path<String>,
    Query(opts): Query<ReportQuery>,
) -> Result<AxumResponse, AppError> {
    let device = resolve_device(&state, &auth, &device_id).await?;
    let format = match opts.format.as_deref() {
        None => ReportFormat::Csv,
        Some(raw) => raw
            .parse::<ReportFormat>()
            .map_err(AppError::bad_request)?,
    };

    let entries = state
        .store
        .list_entries(device.id, opts.from, opts.to)
        .await
        .map_err(AppError::internal)?;

    let report = Report {
        device_label: device.label(),
        generated_at: Utc::now(),
        entries: &entries,
    };
    let body = report.render(format, state.friendly.as_ref());

    let mut resp = AxumResponse::new(axum::body::Body::from(body));
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(format.content_type()),
    );
    Ok(resp)
}

async fn api_get_rule(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(device_id): Path<String>,
) -> Result<Json<api::RuleDto>, AppError> {
    let device = resolve_device(&state, &auth, &device_id).await?;
    let rule = state
        .store
        .get_rule(device.id)
        .await
        .map_err(AppError::internal)?;
    // No stored rule means the defaults apply; never an error.
    let dto = match rule {
        Some(rule) => rule_dto(&device.identifier, &rule),
        None => api::RuleDto {
            device_id: device.identifier,
            daily_limit_minutes: state.config.sync.default_daily_limit_minutes,
            bedtime_start: None,
            bedtime_end: None,
        },
    };
    Ok(Json(dto))
}

async fn api_set_rule(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(device_id): Path<String>,
    Json(body): Json<api::RuleReq>,
) -> Result<Json<api::RuleDto>, AppError> {
    let device = resolve_device(&state, &auth, &device_id).await?;

    let daily_limit = coerce_daily_limit(body.daily_limit_minutes.as_ref());
    if body.daily_limit_minutes.is_some() && daily_limit.is_none() {
        tracing::warn!(
            device_id = %device.identifier,
            value = ?body.daily_limit_minutes,
            "rules: ignoring invalid daily_limit_minutes"
        );
    }
    let bedtime_start = parse_bedtime(&device.identifier, "bedtime_start", body.bedtime_start.as_deref());
    let bedtime_end = parse_bedtime(&device.identifier, "bedtime_end", body.bedtime_end.as_deref());

    let rule = state
        .store
        .upsert_rule(
            device.id,
            daily_limit,
            bedtime_start,
            bedtime_end,
            state.config.sync.default_daily_limit_minutes,
        )
        .await
        .map_err(AppError::internal)?;

    Ok(Json(rule_dto(&device.identifier, &rule)))
}

async fn api_block_app(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(device_id): Path<String>,
    Json(body): Json<api::BlockAppReq>,
) -> Result<Json<api::BlockAppResp>, AppError> {
    let device = resolve_device(&state, &auth, &device_id).await?;
    let app_name = body.app_name.trim();
    if app_name.is_empty() {
        return Err(AppError::bad_request("app_name is required"));
    }
    let package = body
        .package_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let outcome = state
        .store
        .block_app(
            device.id,
            app_name,
            package,
            &auth.claims.sub,
            body.note.as_deref(),
        )
        .await
        .map_err(AppError::internal)?;

    let (status, row) = match outcome {
        BlockOutcome::Blocked(row) => {
            notify::device_sync_trigger(&device.identifier, "block", app_name);
            (api::BlockStatus::Blocked, row)
        }
        BlockOutcome::AlreadyBlocked(row) => (api::BlockStatus::AlreadyBlocked, row),
    };

    Ok(Json(api::BlockAppResp {
        status,
        app_id: row.id,
        app_name: row.app_name,
    }))
}

async fn api_unblock_app(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(device_id): Path<String>,
    Json(body): Json<api::UnblockAppReq>,
) -> Result<Json<api::UnblockAppResp>, AppError> {
    let device = resolve_device(&state, &auth, &device_id).await?;
    let app_name = body.app_name.trim();
    if app_name.is_empty() {
        return Err(AppError::bad_request("app_name is required"));
    }

    let deactivated = state
        .store
        .unblock_app(device.id, app_name)
        .await
        .map_err(AppError::internal)?;

    let status = if deactivated > 0 {
        notify::device_sync_trigger(&device.identifier, "unblock", app_name);
        api::UnblockStatus::Unblocked
    } else {
        api::UnblockStatus::NotBlocked
    };

    Ok(Json(api::UnblockAppResp {
        status,
        deactivated,
    }))
}

async fn api_poll_blocked(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(device_id): Path<String>,
) -> Result<Json<api::BlockedAppsDto>, AppError> {
    let device = resolve_device(&state, &auth, &device_id).await?;
    let rows = state
        .store
        .poll_blocked(device.id)
        .await
        .map_err(AppError::internal)?;

    let blocked_apps: Vec<String> = rows
        .iter()
        .map(|row| row.enforcement_name().to_string())
        .collect();

    Ok(Json(api::BlockedAppsDto {
        device_id: device.identifier,
        total_count: blocked_apps.len(),
        blocked_apps,
        synced_at: Utc::now().to_rfc3339(),
    }))
}

fn rule_dto(device_id: &str, rule: &crate::storage::models::ScreenTimeRule) -> api::RuleDto {
    api::RuleDto {
        device_id: device_id.to_string(),
        daily_limit_minutes: rule.daily_limit_minutes,
        bedtime_start: rule.bedtime_start.map(|t| t.format("%H:%M:%S").to_string()),
        bedtime_end: rule.bedtime_end.map(|t| t.format("%H:%M:%S").to_string()),
    }
}

/// Lenient limit coercion: JSON number or numeric string, bounded [1,1440].
/// Anything else keeps the previously stored limit.
fn coerce_daily_limit(value: Option<&serde_json::Value>) -> Option<i32> {
    let value = value?;
    let n = value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse::<i64>().ok()))?;
    (1..=1440).contains(&n).then_some(n as i32)
}

/// `HH:MM:SS` first, then `HH:MM`; unparseable values are logged and ignored
/// so a bad bedtime never clobbers a stored one.
fn parse_bedtime(device_id: &str, field: &str, raw: Option<&str>) -> Option<NaiveTime> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    match NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
    {
        Ok(t) => Some(t),
        Err(e) => {
            tracing::warn!(device_id, field, raw, error = %e, "rules: ignoring unparseable bedtime");
            None
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized,
    Forbidden,
    NotFound(String),
    Internal(String),
}

impl AppError {
    fn bad_request<T: Into<String>>(msg: T) -> Self {
        Self::BadRequest(msg.into())
    }
    fn unauthorized() -> Self {
        Self::Unauthorized
    }
    fn forbidden() -> Self {
        Self::Forbidden
    }
    fn not_found<T: Into<String>>(msg: T) -> Self {
        Self::NotFound(msg.into())
    }
    fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg, kind, detail) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m, "bad_request", None),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized".into(),
                "unauthorized",
                None,
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden".into(), "forbidden", None),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m, "not_found", None),
            // Do not leak internal error details to clients, but log them
            AppError::Internal(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".into(),
                "internal",
                Some(m),
            ),
        };
        if let Some(detail) = detail {
            tracing::error!(status = %status, kind = kind, message = %msg, detail = %detail, "request failed");
        } else {
            tracing::error!(status = %status, kind = kind, message = %msg, "request failed");
        }
        let body = axum::Json(ErrorBody { error: msg });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn daily_limit_accepts_numbers_and_numeric_strings() {
        assert_eq!(coerce_daily_limit(Some(&json!(90))), Some(90));
        assert_eq!(coerce_daily_limit(Some(&json!("45"))), Some(45));
        assert_eq!(coerce_daily_limit(Some(&json!(" 45 "))), Some(45));
    }

    #[test]
    fn daily_limit_rejects_out_of_range_and_garbage() {
        assert_eq!(coerce_daily_limit(Some(&json!(0))), None);
        assert_eq!(coerce_daily_limit(Some(&json!(1441))), None);
        assert_eq!(coerce_daily_limit(Some(&json!("lots"))), None);
        assert_eq!(coerce_daily_limit(Some(&json!(null))), None);
        assert_eq!(coerce_daily_limit(None), None);
    }

    #[test]
    fn daily_limit_bounds_are_inclusive() {
        assert_eq!(coerce_daily_limit(Some(&json!(1))), Some(1));
        assert_eq!(coerce_daily_limit(Some(&json!(1440))), Some(1440));
    }

    #[test]
    fn bedtime_accepts_both_clock_formats() {
        let t = parse_bedtime("d", "bedtime_start", Some("21:00")).unwrap();
        assert_eq!(t, NaiveTime::from_hms_opt(21, 0, 0).unwrap());
        let t = parse_bedtime("d", "bedtime_start", Some("21:30:15")).unwrap();
        assert_eq!(t, NaiveTime::from_hms_opt(21, 30, 15).unwrap());
    }

    #[test]
    fn bad_bedtimes_are_ignored() {
        assert!(parse_bedtime("d", "bedtime_end", Some("late")).is_none());
        assert!(parse_bedtime("d", "bedtime_end", Some("")).is_none());
        assert!(parse_bedtime("d", "bedtime_end", None).is_none());
    }
}
