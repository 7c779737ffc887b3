//! HTTP API handlers

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::audio::device::{list_devices, AudioDeviceInfo};
use crate::hub::HubStatus;
use crate::ui::server::AppState;

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// System status
#[derive(serde::Serialize)]
pub struct SystemStatus {
    pub uptime_seconds: u64,
    #[serde(flatten)]
    pub hub: HubStatus,
}

/// Get server and hub status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SystemStatus>> {
    let status = SystemStatus {
        uptime_seconds: state.started.elapsed().as_secs(),
        hub: state.hub.status(),
    };
    Json(ApiResponse::ok(status))
}

/// Get available audio devices
pub async fn get_devices() -> Json<ApiResponse<Vec<AudioDeviceInfo>>> {
    Json(ApiResponse::ok(list_devices()))
}
