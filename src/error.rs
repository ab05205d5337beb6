use actix_web::{http::StatusCode, ResponseError};
use thiserror::Error;

use crate::response::response_from_error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Param(String),
    #[error("please login first")]
    NeedLogin,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("unsupported image type: {0}")]
    InvalidImageType(String),
    #[error("failed to upload image")]
    UploadFailure,
    #[error("failed to delete image")]
    DeleteFailure,
    #[error("system_exception")]
    System,
}

impl AppError {
    pub fn param_error(msg: impl Into<String>) -> Self {
        Self::Param(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_image_type(content_type: impl Into<String>) -> Self {
        Self::InvalidImageType(content_type.into())
    }

    pub fn need_login() -> Self {
        Self::NeedLogin
    }

    pub fn system_exception() -> Self {
        Self::System
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Param(_) => 1,
            Self::NeedLogin => 3,
            Self::Forbidden(_) => 5,
            Self::NotFound(_) => 6,
            Self::InvalidImageType(_) => 7,
            Self::UploadFailure => 8,
            Self::DeleteFailure => 9,
            Self::System => 99,
        }
    }

    pub fn msg(&self) -> String {
        self.to_string()
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        log::error!("database error: {}", err);
        Self::System
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Param(_) | Self::InvalidImageType(_) => StatusCode::BAD_REQUEST,
            Self::NeedLogin => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::UploadFailure | Self::DeleteFailure | Self::System => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> actix_web::HttpResponse {
        response_from_error(self)
    }
}
