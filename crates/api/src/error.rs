//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use engagement::EngagementError;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("Engagement error: {0}")]
    Engagement(#[from] EngagementError),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    detail: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::CameraUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Engagement(EngagementError::Camera(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Engagement(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self.status() {
            StatusCode::SERVICE_UNAVAILABLE => "camera unavailable",
            _ => "internal error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!("Request failed: {}", self);
        } else {
            warn!("Request refused: {}", self);
        }
        let body = ErrorBody {
            error: self.code(),
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::CameraError;

    #[test]
    fn test_camera_failures_map_to_503() {
        let direct = ApiError::CameraUnavailable("no source".into());
        assert_eq!(direct.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(direct.code(), "camera unavailable");

        let wrapped = ApiError::from(EngagementError::Camera(CameraError::Unavailable("busy".into())));
        assert_eq!(wrapped.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(wrapped.to_string(), "Engagement error: camera unavailable: busy");
    }

    #[test]
    fn test_other_failures_map_to_500() {
        let err = ApiError::from(EngagementError::WorkerClosed);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
