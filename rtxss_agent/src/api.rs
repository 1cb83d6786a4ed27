//! HTTP routes: snapshot reads and the two runtime controls.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::control;
use crate::error::{ConfigError, ControlError};
use crate::sampler::SamplerHealth;
use crate::state::AppState;
use crate::types::{HistoryEntry, Sample};
use crate::ws::ws_handler;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/sample", get(get_sample))
        .route("/api/history", get(get_history))
        .route("/api/status", get(get_status))
        .route("/api/set_power", post(set_power))
        .route("/api/set_update_interval", post(set_update_interval))
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Reply {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Reply {
    fn ok(message: String) -> Self {
        Reply {
            success: true,
            message,
            kind: None,
        }
    }

    fn err(kind: &str, message: String) -> Self {
        Reply {
            success: false,
            message,
            kind: Some(kind.to_string()),
        }
    }
}

// Control bodies are read as loose JSON so that a wrong type still gets a JSON
// reply. Err carries the offending value as text.
fn integer_field(body: &Result<Json<Value>, JsonRejection>, name: &str) -> Result<i64, String> {
    let Ok(Json(body)) = body else {
        return Err("request body (not a JSON object)".to_string());
    };
    match body.get(name) {
        Some(v) => v.as_i64().ok_or_else(|| v.to_string()),
        None => Err(format!("missing {name:?}")),
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReply {
    pub sampler_running: bool,
    pub interval_ms: u64,
    pub clients: usize,
    pub history_len: usize,
    pub history_capacity: usize,
    pub power_levels: &'static [u32],
    pub health: SamplerHealth,
}

async fn get_sample(State(state): State<AppState>) -> Json<Option<Arc<Sample>>> {
    Json(state.broadcaster.last_sample())
}

async fn get_history(State(state): State<AppState>) -> Json<Vec<HistoryEntry>> {
    Json(state.history.snapshot())
}

async fn get_status(State(state): State<AppState>) -> Json<StatusReply> {
    Json(StatusReply {
        sampler_running: state.is_running(),
        interval_ms: state.interval.get().as_millis() as u64,
        clients: state.broadcaster.subscriber_count(),
        history_len: state.history.len(),
        history_capacity: state.history.capacity(),
        power_levels: state.control.levels(),
        health: state.health(),
    })
}

async fn set_power(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let outcome = match integer_field(&body, "wattage") {
        Ok(watts) => state.control.set_power_limit(watts).await,
        Err(raw) => Err(control::invalid_value(raw)),
    };
    match outcome {
        Ok(ack) => (StatusCode::OK, Json(Reply::ok(ack.message))).into_response(),
        Err(e) => {
            let code = match &e {
                ControlError::InvalidValue { .. } => StatusCode::BAD_REQUEST,
                ControlError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
                ControlError::InvocationFailed(_) => StatusCode::BAD_GATEWAY,
            };
            (code, Json(Reply::err(e.kind(), e.to_string()))).into_response()
        }
    }
}

async fn set_update_interval(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let outcome = integer_field(&body, "interval")
        .map_err(|value| ConfigError::InvalidValue { name: "interval", value })
        .and_then(|ms| state.interval.set_ms(ms));
    match outcome {
        Ok(d) => {
            info!("update interval set to {}ms", d.as_millis());
            (
                StatusCode::OK,
                Json(Reply::ok(format!("Update interval set to {}ms", d.as_millis()))),
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(Reply::err("invalid_value", e.to_string())),
        )
            .into_response(),
    }
}
