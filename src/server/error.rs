use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::error;

use super::types::ErrorResponse;
use crate::error::{ExtractError, FetchError, UpsertError};

/// API错误类型
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

pub type Result<T, E = AppError> = std::result::Result<T, E>;

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(anyhow::Error::msg(message.into()).context(StatusCode::BAD_REQUEST))
    }

    /// 按错误来源决定状态码
    fn status(&self) -> StatusCode {
        if let Some(status) = self.0.downcast_ref::<StatusCode>() {
            return *status;
        }
        if let Some(e) = self.0.downcast_ref::<FetchError>() {
            return match e {
                FetchError::NotFound(_) => StatusCode::NOT_FOUND,
                FetchError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
                FetchError::Rejected(_) => StatusCode::BAD_GATEWAY,
            };
        }
        if let Some(e) = self.0.downcast_ref::<ExtractError>() {
            return match e {
                ExtractError::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
                ExtractError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
        }
        if let Some(e) = self.0.downcast_ref::<UpsertError>() {
            return match e {
                UpsertError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
                UpsertError::DimensionMismatch { .. } | UpsertError::Invalid(_) => {
                    StatusCode::BAD_REQUEST
                }
                UpsertError::UnknownIndex(_) | UpsertError::Rejected(_) => StatusCode::BAD_GATEWAY,
            };
        }
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("请求处理失败: {:#}", self.0);
        }
        // `{:#}` 会把作为上下文的状态码也打印出来，这里只取根本原因
        let message = match self.0.downcast_ref::<StatusCode>() {
            Some(_) => self.0.root_cause().to_string(),
            None => format!("{:#}", self.0),
        };
        (status, Json(ErrorResponse { message })).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
