use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::error;

use super::types::ErrorResponse;
use crate::Error;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// API错误类型
pub enum AppError {
    Service(Error),
    Unauthorized,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Service(e) => match e {
                Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
                Error::NoFaceDetected => StatusCode::UNPROCESSABLE_ENTITY,
                Error::RemoteUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Unauthorized => "无效的 token".to_string(),
            Self::Service(e) => e.to_string(),
        };
        if status.is_server_error() {
            error!("请求处理失败: {message}");
        }
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<Error>,
{
    fn from(err: E) -> Self {
        Self::Service(err.into())
    }
}
