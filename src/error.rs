//! Error type shared by the store, the services and the HTTP layer.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::{AlertId, AlertStatus, DeviceId};

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceId),

    #[error("Alert not found: {0}")]
    AlertNotFound(AlertId),

    #[error("Alert cannot move from {from} to {to}")]
    InvalidTransition { from: AlertStatus, to: AlertStatus },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Store error: {0}")]
    Store(String),
}

pub type Result<T, E = MonitorError> = std::result::Result<T, E>;

impl IntoResponse for MonitorError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            MonitorError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
            }
            MonitorError::Store(ref e) => {
                tracing::error!("Store error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Store error")
            }
            MonitorError::DeviceNotFound(_) => (StatusCode::NOT_FOUND, "Device not found"),
            MonitorError::AlertNotFound(_) => (StatusCode::NOT_FOUND, "Alert not found"),
            MonitorError::InvalidTransition { .. } => {
                (StatusCode::CONFLICT, "Invalid alert transition")
            }
            MonitorError::BadRequest(_) => (StatusCode::BAD_REQUEST, "Bad request"),
        };

        let body = Json(json!({
            "error": error_message,
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}
