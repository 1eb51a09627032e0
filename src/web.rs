//! HTTP surface. Every `/admin` handler resolves the current actor
//! from the session cookie and authorizes the operation before touching
//! storage; actors without a session (or without panel access) are
//! redirected to `/login`, authenticated admins missing the permission
//! get a 403.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::authz::errors::AuthzError;
use crate::authz::{engine, Action, Principal, Resource};
use crate::errors::AppError;
use crate::export;
use crate::geo;
use crate::query::{self, status_color, status_label, EmployeePage, EmployeeQuery, EmployeeRow};
use crate::session::SessionCookie;
use crate::settings::Settings;
use crate::storage::{self, DepartmentInput, EmployeeInput, DEFAULT_ATTACH_ORDER};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub db: DatabaseConnection,
}

/// The authenticated principal, resolved per request. Admin permission
/// snapshots are loaded fresh on every request, so a revoked permission
/// takes effect on the next call.
pub struct CurrentActor(pub Principal);

impl FromRequestParts<AppState> for CurrentActor {
    type Rejection = AuthzError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let cookie =
            SessionCookie::from_headers(&parts.headers).ok_or(AuthzError::Unauthenticated)?;
        let session = storage::get_session(&state.db, &cookie.session_id)
            .await
            .map_err(|e| AuthzError::Internal(e.to_string()))?
            .ok_or(AuthzError::Unauthenticated)?;

        match session.principal_type.as_str() {
            "admin" => {
                let admin = storage::get_admin(&state.db, session.principal_id)
                    .await
                    .map_err(|e| AuthzError::Internal(e.to_string()))?
                    .ok_or(AuthzError::Unauthenticated)?;
                let permissions = storage::load_admin_permissions(&state.db, admin.id)
                    .await
                    .map_err(|e| AuthzError::Internal(e.to_string()))?;
                Ok(CurrentActor(Principal::Admin {
                    id: admin.id,
                    name: admin.name,
                    permissions,
                }))
            }
            "user" => Ok(CurrentActor(Principal::User {
                id: session.principal_id,
            })),
            other => Err(AuthzError::Internal(format!(
                "unknown principal type `{other}`"
            ))),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/login", post(login))
        .route("/logout", get(logout))
        .route(
            "/admin/employees",
            get(list_employees).post(create_employee),
        )
        .route("/admin/employees/export", post(dispatch_export))
        .route(
            "/admin/employees/{id}",
            get(get_employee).put(update_employee).delete(delete_employee),
        )
        .route(
            "/admin/employees/{id}/departments",
            get(list_employee_departments).post(attach_department),
        )
        .route(
            "/admin/employees/{id}/departments/{dept}",
            axum::routing::patch(update_department_order).delete(detach_department),
        )
        .route(
            "/admin/departments",
            get(list_departments).post(create_department),
        )
        .route(
            "/admin/departments/{id}",
            get(get_department).put(update_department).delete(delete_department),
        )
        .route("/admin/countries", get(list_countries))
        .route("/admin/countries/{id}/states", get(list_states))
        .route("/admin/states/{id}/cities", get(list_cities))
        .route("/admin/exports", get(list_exports))
        .route("/admin/exports/{id}", get(get_export))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(settings: Settings, db: DatabaseConnection) -> Result<(), AppError> {
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let state = AppState {
        settings: Arc::new(settings),
        db,
    };

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

/// Admins and plain users share the login endpoint; the session row
/// records which kind of principal it belongs to.
async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Response, AppError> {
    if let Some(admin_id) =
        storage::verify_admin_password(&state.db, &body.email, &body.password).await?
    {
        let session = storage::create_session(&state.db, "admin", admin_id).await?;
        return Ok(session_response(session));
    }
    if let Some(user_id) =
        storage::verify_user_password(&state.db, &body.email, &body.password).await?
    {
        let session = storage::create_session(&state.db, "user", user_id).await?;
        return Ok(session_response(session));
    }

    Ok((
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "invalid credentials" })),
    )
        .into_response())
}

fn session_response(session: storage::Session) -> Response {
    let cookie = SessionCookie::new(session.session_id);
    (
        StatusCode::OK,
        [(header::SET_COOKIE, cookie.to_cookie_header())],
        Json(json!({ "status": "ok", "expires_at": session.expires_at })),
    )
        .into_response()
}

async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if let Some(cookie) = SessionCookie::from_headers(&headers) {
        storage::delete_session(&state.db, &cookie.session_id).await?;
    }

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, SessionCookie::delete_cookie_header())],
        Json(json!({ "status": "logged out" })),
    )
        .into_response())
}

// Employee handlers

fn employee_row_json(row: &EmployeeRow) -> Value {
    json!({
        "id": row.id,
        "full_name": row.full_name(),
        "first_name": row.first_name,
        "last_name": row.last_name,
        "address": row.address,
        "date_hired": row.date_hired,
        "image": row.image,
        "status": {
            "active": row.is_active(),
            "label": status_label(row.is_active()),
            "color": status_color(row.is_active()),
        },
        "country": row.country_name,
        "state": row.state_name,
        "city": row.city_name,
        "departments_count": row.departments_count,
        "created_at": row.created_at,
        "updated_at": row.updated_at,
    })
}

fn employee_page_json(page: &EmployeePage) -> Value {
    json!({
        "rows": page.rows.iter().map(employee_row_json).collect::<Vec<_>>(),
        "page": page.page,
        "per_page": page.per_page,
        "total_items": page.total_items,
        "total_pages": page.total_pages,
    })
}

async fn list_employees(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(q): Query<EmployeeQuery>,
) -> Result<Json<Value>, AppError> {
    engine::authorize(&actor, Action::View, Resource::Employee)?;
    let page = query::list_employees(&state.db, &q).await?;
    Ok(Json(employee_page_json(&page)))
}

async fn create_employee(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(input): Json<EmployeeInput>,
) -> Result<Response, AppError> {
    engine::authorize(&actor, Action::Create, Resource::Employee)?;
    let employee = storage::create_employee(&state.db, input).await?;
    let departments = storage::departments_for_employee(&state.db, employee.id).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "employee": employee, "departments": departments })),
    )
        .into_response())
}

async fn get_employee(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    engine::authorize(&actor, Action::View, Resource::Employee)?;
    let employee = storage::get_employee(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("employee {id}")))?;
    let departments = storage::departments_for_employee(&state.db, id).await?;
    Ok(Json(json!({ "employee": employee, "departments": departments })))
}

async fn update_employee(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
    Json(input): Json<EmployeeInput>,
) -> Result<Json<Value>, AppError> {
    engine::authorize(&actor, Action::Update, Resource::Employee)?;
    let employee = storage::update_employee(&state.db, id, input).await?;
    let departments = storage::departments_for_employee(&state.db, id).await?;
    Ok(Json(json!({ "employee": employee, "departments": departments })))
}

async fn delete_employee(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    engine::authorize(&actor, Action::Delete, Resource::Employee)?;
    storage::delete_employee(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Association handlers

#[derive(Debug, Deserialize)]
struct AttachRequest {
    department_id: i64,
    order: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OrderRequest {
    order: i64,
}

async fn list_employee_departments(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    engine::authorize(&actor, Action::View, Resource::Employee)?;
    storage::get_employee(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("employee {id}")))?;
    let departments = storage::departments_for_employee(&state.db, id).await?;
    Ok(Json(json!({ "departments": departments })))
}

async fn attach_department(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
    Json(body): Json<AttachRequest>,
) -> Result<StatusCode, AppError> {
    engine::authorize(&actor, Action::Update, Resource::Employee)?;
    storage::attach_department(
        &state.db,
        id,
        body.department_id,
        body.order.unwrap_or(DEFAULT_ATTACH_ORDER),
    )
    .await?;
    Ok(StatusCode::CREATED)
}

async fn update_department_order(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path((id, dept)): Path<(i64, i64)>,
    Json(body): Json<OrderRequest>,
) -> Result<StatusCode, AppError> {
    engine::authorize(&actor, Action::Update, Resource::Employee)?;
    storage::update_department_order(&state.db, id, dept, body.order).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn detach_department(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path((id, dept)): Path<(i64, i64)>,
) -> Result<StatusCode, AppError> {
    engine::authorize(&actor, Action::Update, Resource::Employee)?;
    storage::detach_department(&state.db, id, dept).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Department handlers

async fn list_departments(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<Value>, AppError> {
    engine::authorize(&actor, Action::View, Resource::Department)?;
    let departments = storage::list_departments(&state.db).await?;
    Ok(Json(json!({ "departments": departments })))
}

async fn create_department(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(input): Json<DepartmentInput>,
) -> Result<Response, AppError> {
    engine::authorize(&actor, Action::Create, Resource::Department)?;
    let department = storage::create_department(&state.db, input).await?;
    Ok((StatusCode::CREATED, Json(department)).into_response())
}

async fn get_department(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    engine::authorize(&actor, Action::View, Resource::Department)?;
    let department = storage::get_department(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("department {id}")))?;
    Ok(Json(json!(department)))
}

async fn update_department(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
    Json(input): Json<DepartmentInput>,
) -> Result<Json<Value>, AppError> {
    engine::authorize(&actor, Action::Update, Resource::Department)?;
    let department = storage::update_department(&state.db, id, input).await?;
    Ok(Json(json!(department)))
}

async fn delete_department(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    engine::authorize(&actor, Action::Delete, Resource::Department)?;
    storage::delete_department(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Geo option handlers, gated like the employee form they feed

async fn list_countries(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<Value>, AppError> {
    engine::authorize(&actor, Action::View, Resource::Employee)?;
    let countries = storage::list_countries(&state.db).await?;
    Ok(Json(json!({ "countries": countries })))
}

async fn list_states(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(country_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    engine::authorize(&actor, Action::View, Resource::Employee)?;
    let states = geo::state_options(&state.db, country_id).await?;
    Ok(Json(json!({ "states": states })))
}

async fn list_cities(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(state_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    engine::authorize(&actor, Action::View, Resource::Employee)?;
    let cities = geo::city_options(&state.db, state_id).await?;
    Ok(Json(json!({ "cities": cities })))
}

// Export handlers

fn export_run_json(run: &storage::ExportRun) -> Value {
    json!({
        "id": run.id,
        "file_name": run.file_name,
        "status": run.status,
        "started_at": run.started_at,
        "completed_at": run.completed_at,
        "successful_rows": run.successful_rows,
        "failed_rows": run.failed_rows,
        "notification": export::run_notification(run),
    })
}

async fn dispatch_export(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(criteria): Query<EmployeeQuery>,
) -> Result<Response, AppError> {
    engine::authorize(&actor, Action::View, Resource::Employee)?;
    let run = export::dispatch(&state.db, &state.settings.exports.dir, criteria).await?;
    Ok((StatusCode::ACCEPTED, Json(export_run_json(&run))).into_response())
}

async fn list_exports(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<Value>, AppError> {
    engine::authorize(&actor, Action::View, Resource::Employee)?;
    let runs = storage::list_export_runs(&state.db, 50).await?;
    Ok(Json(json!({
        "runs": runs.iter().map(export_run_json).collect::<Vec<_>>(),
    })))
}

async fn get_export(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    engine::authorize(&actor, Action::View, Resource::Employee)?;
    let run = storage::get_export_run(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("export run {id}")))?;
    Ok(Json(export_run_json(&run)))
}
