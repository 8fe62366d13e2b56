//!
//! carelink HTTP server
//! --------------------
//! This module defines the Axum-based HTTP API.
//!
//! Responsibilities:
//! - Session management with an opaque bearer token carried in the `X-Auth` header.
//! - Register/login/me/logout endpoints backed by the `identity` module.
//! - User management, messaging and patient record endpoints delegating to the core.
//! - Mapping `AppError` kinds onto HTTP status codes, extractor rejections included.
//! - Optional demo account seeding on first start with an empty store.

use std::sync::Arc;

use anyhow::Context;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::error::{AppError, AppResult};
use crate::identity::{
    list_contacts, AuthProvider, Contact, LocalAuthProvider, LoginRequest, RegisterRequest, SessionRegistry,
};
use crate::messaging::{self, SendMessageRequest, ThreadMessage};
use crate::records::{
    self, CreateDiagnosisByNameRequest, CreateDiagnosisRequest, CreateNoteByNameRequest, CreateNoteRequest,
    PatientSummary,
};
use crate::storage::{Condition, Encounter, PatientId, SharedStore, User, UserId};
use crate::users::{self, UserView};

/// Header carrying the session token on every authenticated call.
pub const AUTH_HEADER: &str = "x-auth";

/// Shared server state injected into all handlers.
///
/// Holds the directory store handle and the auth provider, which owns the one
/// session registry of the process.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub auth: LocalAuthProvider,
}

impl AppState {
    pub fn new(store: SharedStore) -> Self {
        let sessions = Arc::new(SessionRegistry::new());
        let auth = LocalAuthProvider::new(store.clone(), sessions);
        Self { store, auth }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("request failed: {}", self);
        }
        (status, Json(json!({"status": "error", "code": self.code_str(), "error": self.message()}))).into_response()
    }
}

/// Build the router with all API routes mounted on `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "carelink ok" }))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(me))
        .route("/api/auth/logout", post(logout))
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/users/{id}", get(get_user).delete(delete_user))
        .route("/api/messages", post(send_message))
        .route("/api/messages/contacts", get(contacts))
        .route("/api/messages/thread/{other_id}", get(thread))
        .route("/api/patients/me", get(my_record))
        .route("/api/patients/notes/by-name", post(create_note_by_name))
        .route("/api/patients/conditions/by-name", post(create_diagnosis_by_name))
        .route("/api/patients/{patient}/notes", post(create_note))
        .route("/api/patients/{patient}/conditions", post(create_diagnosis))
        .route("/api/patients/{patient}/full", get(full_record))
        .route("/api/patients/{patient}/record", get(patient_record))
        .with_state(state)
}

fn log_startup(cfg: &ServerConfig) {
    let cwd = std::env::current_dir().ok();
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "startup",
        "carelink starting: addr={} data_dir={:?} seed_demo={} cwd={:?} RUST_LOG='{}'",
        cfg.socket_addr(), cfg.data_dir, cfg.seed_demo, cwd, rust_log
    );
}

/// Demo accounts for a fresh installation: one patient, one doctor, one staff member.
fn seed_demo_accounts(auth: &LocalAuthProvider) -> AppResult<()> {
    for (username, role) in [("patient", "PATIENT"), ("doctor", "DOCTOR"), ("staff", "STAFF")] {
        auth.register(&RegisterRequest { username: username.into(), password: "carelink".into(), role: role.into() })?;
    }
    warn!(target: "startup", "demo accounts seeded (patient/doctor/staff, password 'carelink'); do not use in production");
    Ok(())
}

/// Open the store, optionally seed it, and serve the API until the listener fails.
pub async fn run_with_config(cfg: ServerConfig) -> anyhow::Result<()> {
    log_startup(&cfg);

    let store = match &cfg.data_dir {
        Some(dir) => SharedStore::open(dir).with_context(|| format!("While opening store under {}", dir.display()))?,
        None => SharedStore::in_memory(),
    };
    let state = AppState::new(store);

    if cfg.seed_demo && state.store.0.lock().is_empty() {
        seed_demo_accounts(&state.auth).context("While seeding demo accounts")?;
    }

    let addr = cfg.socket_addr();
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Convenience entry point reading configuration from the environment.
pub async fn run() -> anyhow::Result<()> {
    run_with_config(ServerConfig::from_env()?).await
}

fn auth_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok()).map(str::trim)
}

fn require_user(state: &AppState, headers: &HeaderMap) -> AppResult<User> {
    state.auth.current_user(auth_token(headers))
}

// Extractor failures are held back as values so each handler can check the session
// first and then report them in the common error shape.
type JsonBody<T> = Result<Json<T>, JsonRejection>;
type PathParam<T> = Result<Path<T>, PathRejection>;

fn malformed(detail: String) -> AppError { AppError::invalid("malformed_request".to_string(), detail) }

fn body<T>(payload: JsonBody<T>) -> AppResult<T> {
    payload.map(|Json(v)| v).map_err(|e| malformed(e.body_text()))
}

fn path<T>(param: PathParam<T>) -> AppResult<T> {
    param.map(|Path(v)| v).map_err(|e| malformed(e.body_text()))
}

// ---- auth ----

#[derive(Debug, Deserialize)]
struct RegisterPayload {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    role: String,
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

impl From<RegisterPayload> for RegisterRequest {
    fn from(p: RegisterPayload) -> Self { RegisterRequest { username: p.username, password: p.password, role: p.role } }
}

async fn register(State(state): State<AppState>, payload: JsonBody<RegisterPayload>) -> AppResult<Json<UserView>> {
    let user = state.auth.register(&body(payload)?.into())?;
    Ok(Json(UserView::from(&user)))
}

async fn login(State(state): State<AppState>, payload: JsonBody<LoginPayload>) -> AppResult<impl IntoResponse> {
    let payload = body(payload)?;
    let resp = state.auth.login(&LoginRequest { username: payload.username, password: payload.password })?;
    Ok(Json(json!({"token": resp.token, "user": UserView::from(&resp.user)})))
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<UserView>> {
    let user = require_user(&state, &headers)?;
    Ok(Json(UserView::from(&user)))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    state.auth.logout(auth_token(&headers));
    StatusCode::NO_CONTENT
}

// ---- users ----

async fn list_users(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Vec<UserView>>> {
    require_user(&state, &headers)?;
    Ok(Json(users::list_users(&state.auth)))
}

async fn get_user(State(state): State<AppState>, headers: HeaderMap, id: PathParam<UserId>) -> AppResult<Json<UserView>> {
    require_user(&state, &headers)?;
    Ok(Json(users::get_user(&state.auth, path(id)?)?))
}

async fn create_user(State(state): State<AppState>, payload: JsonBody<RegisterPayload>) -> AppResult<impl IntoResponse> {
    let view = users::create_user(&state.auth, &body(payload)?.into())?;
    let location = format!("/api/users/{}", view.id);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(view)))
}

async fn delete_user(State(state): State<AppState>, headers: HeaderMap, id: PathParam<UserId>) -> AppResult<StatusCode> {
    let me = require_user(&state, &headers)?;
    users::delete_user(&state.auth, &me, path(id)?)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- messages ----

async fn contacts(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Vec<Contact>>> {
    let me = require_user(&state, &headers)?;
    Ok(Json(list_contacts(&state.store, &me)))
}

async fn thread(
    State(state): State<AppState>,
    headers: HeaderMap,
    other_id: PathParam<UserId>,
) -> AppResult<Json<Vec<ThreadMessage>>> {
    let me = require_user(&state, &headers)?;
    Ok(Json(messaging::open_thread(&state.store, &me, path(other_id)?)?))
}

async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: JsonBody<SendMessageRequest>,
) -> AppResult<Json<ThreadMessage>> {
    let me = require_user(&state, &headers)?;
    Ok(Json(messaging::send_message(&state.store, &me, &body(payload)?)?))
}

// ---- patient records ----

async fn create_note(
    State(state): State<AppState>,
    headers: HeaderMap,
    patient_id: PathParam<PatientId>,
    payload: JsonBody<CreateNoteRequest>,
) -> AppResult<Json<Encounter>> {
    let me = require_user(&state, &headers)?;
    Ok(Json(records::create_note(&state.store, &me, path(patient_id)?, &body(payload)?)?))
}

async fn create_diagnosis(
    State(state): State<AppState>,
    headers: HeaderMap,
    patient_id: PathParam<PatientId>,
    payload: JsonBody<CreateDiagnosisRequest>,
) -> AppResult<Json<Condition>> {
    let me = require_user(&state, &headers)?;
    Ok(Json(records::create_diagnosis(&state.store, &me, path(patient_id)?, &body(payload)?)?))
}

async fn create_note_by_name(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: JsonBody<CreateNoteByNameRequest>,
) -> AppResult<Json<Encounter>> {
    let me = require_user(&state, &headers)?;
    Ok(Json(records::create_note_by_name(&state.store, &me, &body(payload)?)?))
}

async fn create_diagnosis_by_name(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: JsonBody<CreateDiagnosisByNameRequest>,
) -> AppResult<Json<Condition>> {
    let me = require_user(&state, &headers)?;
    Ok(Json(records::create_diagnosis_by_name(&state.store, &me, &body(payload)?)?))
}

async fn full_record(
    State(state): State<AppState>,
    headers: HeaderMap,
    patient_name: PathParam<String>,
) -> AppResult<Json<PatientSummary>> {
    let me = require_user(&state, &headers)?;
    Ok(Json(records::full_record_by_name(&state.store, &me, &path(patient_name)?)?))
}

async fn patient_record(
    State(state): State<AppState>,
    headers: HeaderMap,
    patient_id: PathParam<PatientId>,
) -> AppResult<Json<PatientSummary>> {
    let me = require_user(&state, &headers)?;
    Ok(Json(records::patient_record(&state.store, &me, path(patient_id)?)?))
}

async fn my_record(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<PatientSummary>> {
    let me = require_user(&state, &headers)?;
    Ok(Json(records::my_record(&state.store, &me)?))
}
