//! API Routes

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::command::CommandOutcome;
use crate::error::{Error, Result};
use crate::history::{EventKind, HistoryFilter, HistoryWindow};
use crate::ingest::DEVICE_IDENTITY_LEN;
use crate::models::ApiResponse;
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Fleet
        .route("/api/doorphones", get(list_doorphones))
        .route("/api/doorphones/:mac", get(get_doorphone))
        .route("/api/doorphones/:mac", delete(delete_doorphone))
        .route("/api/doorphones/:mac/open-door", post(open_door))
        // Calls
        .route("/api/calls", get(list_calls))
        .route("/api/calls/:mac/open-door", post(call_open_door))
        // History
        .route("/api/history", get(query_history))
        .with_state(state)
}

fn validate_mac(mac: &str) -> Result<()> {
    if mac.len() != DEVICE_IDENTITY_LEN {
        return Err(Error::Validation(format!(
            "device identity must be {DEVICE_IDENTITY_LEN} characters"
        )));
    }
    Ok(())
}

/// GET /api/doorphones - fleet snapshot
async fn list_doorphones(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.fleet.snapshot().await))
}

/// GET /api/doorphones/:mac - one device
async fn get_doorphone(
    State(state): State<AppState>,
    Path(mac): Path<String>,
) -> Result<impl IntoResponse> {
    validate_mac(&mac)?;
    let record = state
        .fleet
        .get(&mac)
        .await
        .ok_or_else(|| Error::NotFound(format!("door phone {mac} is not registered")))?;
    Ok(Json(ApiResponse::success(record)))
}

/// POST /api/doorphones/:mac/open-door - open door from the device page
async fn open_door(
    State(state): State<AppState>,
    Path(mac): Path<String>,
) -> Result<impl IntoResponse> {
    validate_mac(&mac)?;
    let outcome = state.commands.send_command(&mac, "open-door").await;
    Ok(command_response(outcome))
}

/// DELETE /api/doorphones/:mac - administrative removal
async fn delete_doorphone(
    State(state): State<AppState>,
    Path(mac): Path<String>,
) -> Result<impl IntoResponse> {
    validate_mac(&mac)?;
    state.commands.remove_device(&mac).await?;
    Ok(Json(ApiResponse::success(json!({ "removed": mac }))))
}

/// GET /api/calls - open call sessions
async fn list_calls(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.calls.snapshot().await))
}

/// POST /api/calls/:mac/open-door - answer an active call
async fn call_open_door(
    State(state): State<AppState>,
    Path(mac): Path<String>,
) -> Result<impl IntoResponse> {
    validate_mac(&mac)?;
    let outcome = state.commands.send_command(&mac, "call-response").await;
    Ok(command_response(outcome))
}

fn command_response(outcome: CommandOutcome) -> Json<ApiResponse<serde_json::Value>> {
    Json(ApiResponse::success(json!({ "outcome": outcome.as_str() })))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    mac: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(rename = "time")]
    window: Option<String>,
}

/// GET /api/history?mac=&type=&time= - filtered event history
async fn query_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse> {
    let mac = match query.mac.as_deref() {
        None | Some("all") | Some("") => None,
        Some(mac) => {
            validate_mac(mac)?;
            Some(mac.to_string())
        }
    };
    let kind = match query.kind.as_deref() {
        None | Some("all") | Some("") => None,
        Some(raw) => Some(
            EventKind::parse(raw)
                .ok_or_else(|| Error::Validation(format!("unknown history type: {raw}")))?,
        ),
    };
    let window = match query.window.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            HistoryWindow::parse(raw)
                .ok_or_else(|| Error::Validation(format!("unknown history window: {raw}")))?,
        ),
    };

    let filter = HistoryFilter { mac, kind, window };
    Ok(Json(ApiResponse::success(state.history.query(&filter).await)))
}
