//! Axum routes and handlers for the workshop API.
//!
//! Reads are served from the local FSM and work on any node; writes are
//! leader-only. A write that lands on a follower is answered with a 307
//! redirect to the leader's HTTP address (raft port + 1000 by convention),
//! or 503 when no leader is known.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use printfarm_shared::api_models::{AckResponse, JoinRequest};
use printfarm_shared::command::Command;
use printfarm_shared::config::http_addr_for_raft_addr;
use printfarm_shared::models::{Filament, JobStatus, PrintJob, Printer};

use crate::store::{Role, Store, StoreError};

pub struct AppStateInner {
    pub store: Arc<Store>,
}

pub type AppState = Arc<AppStateInner>;

/// Build the public API router around a store handle.
pub fn create_router(store: Arc<Store>) -> Router {
    let state = Arc::new(AppStateInner { store });
    Router::new()
        .route("/join", post(join_cluster))
        .route("/status", get(cluster_status))
        .route("/printers", get(list_printers).post(create_printer))
        .route("/filaments", get(list_filaments).post(create_filament))
        .route("/print_jobs", get(list_print_jobs).post(create_print_job))
        .route("/print_jobs/:id/status", post(update_job_status))
        .with_state(state)
}

/// Domain and request errors carry their message as a plain-text body;
/// clients parse the insufficient-filament message to recover usage data.
fn error_response(status: StatusCode, message: &str) -> Response {
    (status, message.to_string()).into_response()
}

/// Location for a write redirected to the leader, preserving the original
/// path and query.
fn leader_redirect_url(leader_raft_addr: &str, uri: &Uri) -> Option<String> {
    let http_addr = http_addr_for_raft_addr(leader_raft_addr)?;
    let mut url = format!("http://{http_addr}{}", uri.path());
    if let Some(query) = uri.query() {
        url.push('?');
        url.push_str(query);
    }
    Some(url)
}

/// Gate for leader-only handlers: `None` when the local node is the leader,
/// otherwise the redirect (leader known) or 503 (no leader) response.
fn require_leader(state: &AppState, uri: &Uri) -> Option<Response> {
    if state.store.role() == Role::Leader {
        return None;
    }
    let Some(leader_raft_addr) = state.store.leader_address() else {
        return Some(error_response(StatusCode::SERVICE_UNAVAILABLE, "No leader found"));
    };
    match leader_redirect_url(&leader_raft_addr, uri) {
        Some(location) => {
            tracing::debug!(%location, "redirecting write to leader");
            Some(
                (
                    StatusCode::TEMPORARY_REDIRECT,
                    [(header::LOCATION, location)],
                )
                    .into_response(),
            )
        }
        None => Some(error_response(StatusCode::SERVICE_UNAVAILABLE, "No leader found")),
    }
}

/// Submit a command and translate the outcome: domain failures are 400 with
/// the FSM's message verbatim, consensus failures are 500.
async fn propose(state: &AppState, cmd: Command) -> Response {
    match state.store.propose(cmd).await {
        Ok(outcome) => match outcome.error {
            None => (StatusCode::OK, Json(AckResponse::ok())).into_response(),
            Some(message) => error_response(StatusCode::BAD_REQUEST, &message),
        },
        Err(e @ (StoreError::NotLeaderApply | StoreError::NotLeaderJoin)) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, &e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn cluster_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.store.stats();
    let field = |key: &str| stats.get(key).cloned().unwrap_or_default();
    Json(serde_json::json!({
        "state": field("state"),
        "node_id": field("node_id"),
        "leader": field("leader_addr"),
        "commit_index": field("commit_index"),
        "last_applied": field("last_applied"),
        "last_log_index": field("last_log_index"),
    }))
}

async fn join_cluster(State(state): State<AppState>, uri: Uri, body: Bytes) -> Response {
    if let Some(response) = require_leader(&state, &uri) {
        return response;
    }
    let req: JoinRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("invalid join payload: {e}"))
        }
    };
    match state.store.join(&req.id, &req.addr).await {
        Ok(()) => (StatusCode::OK, Json(AckResponse::ok())).into_response(),
        Err(e @ StoreError::NotLeaderJoin) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, &e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn list_printers(State(state): State<AppState>) -> Json<Vec<Printer>> {
    Json(state.store.printers())
}

async fn create_printer(State(state): State<AppState>, uri: Uri, body: Bytes) -> Response {
    if let Some(response) = require_leader(&state, &uri) {
        return response;
    }
    let printer: Printer = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("invalid printer payload: {e}"))
        }
    };
    match Command::add_printer(&printer) {
        Ok(cmd) => propose(&state, cmd).await,
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn list_filaments(State(state): State<AppState>) -> Json<Vec<Filament>> {
    Json(state.store.filaments())
}

async fn create_filament(State(state): State<AppState>, uri: Uri, body: Bytes) -> Response {
    if let Some(response) = require_leader(&state, &uri) {
        return response;
    }
    let filament: Filament = match serde_json::from_slice(&body) {
        Ok(f) => f,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("invalid filament payload: {e}"),
            )
        }
    };
    match Command::add_filament(&filament) {
        Ok(cmd) => propose(&state, cmd).await,
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn list_print_jobs(State(state): State<AppState>) -> Json<Vec<PrintJob>> {
    Json(state.store.print_jobs())
}

async fn create_print_job(State(state): State<AppState>, uri: Uri, body: Bytes) -> Response {
    if let Some(response) = require_leader(&state, &uri) {
        return response;
    }
    let job: PrintJob = match serde_json::from_slice(&body) {
        Ok(j) => j,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("invalid print job payload: {e}"),
            )
        }
    };
    match Command::add_print_job(&job) {
        Ok(cmd) => propose(&state, cmd).await,
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct StatusParams {
    status: Option<String>,
}

async fn update_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(params): Query<StatusParams>,
    uri: Uri,
) -> Response {
    if let Some(response) = require_leader(&state, &uri) {
        return response;
    }
    let Some(raw) = params.status else {
        return error_response(StatusCode::BAD_REQUEST, "missing status query parameter");
    };
    let new_status: JobStatus = match raw.parse() {
        Ok(s) => s,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    match Command::update_job_status(&job_id, new_status) {
        Ok(cmd) => propose(&state, cmd).await,
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}
