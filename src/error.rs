use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::utils::{error_codes, error_to_api_response};

#[derive(Debug)]
pub enum AppError {
    Unauthorized,
    Validation(String),
    FailedToStoreLocation,
    FailedToGetLocations,
    FailedToStoreProfile,
    FailedToGetProfile,
    FailedToStoreMessage,
    FailedToGetMessage,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error_message) = match self {
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                error_codes::AUTH_FAILED,
                "未授权访问".to_string(),
            ),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                error_codes::VALIDATION_ERROR,
                msg,
            ),
            AppError::FailedToStoreLocation => (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_codes::INTERNAL_ERROR,
                "保存位置失败".to_string(),
            ),
            AppError::FailedToGetLocations => (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_codes::INTERNAL_ERROR,
                "获取位置失败".to_string(),
            ),
            AppError::FailedToStoreProfile => (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_codes::INTERNAL_ERROR,
                "保存用户资料失败".to_string(),
            ),
            AppError::FailedToGetProfile => (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_codes::INTERNAL_ERROR,
                "获取用户资料失败".to_string(),
            ),
            AppError::FailedToStoreMessage => (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_codes::INTERNAL_ERROR,
                "存储消息失败".to_string(),
            ),
            AppError::FailedToGetMessage => (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_codes::INTERNAL_ERROR,
                "获取消息失败".to_string(),
            ),
        };

        (status, error_to_api_response::<()>(code, error_message)).into_response()
    }
}
