use actix_web::{
    error::{JsonPayloadError, QueryPayloadError},
    HttpRequest, HttpResponse, ResponseError,
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Serialize)]
pub struct ResponseDto<T: Serialize> {
    pub data: Option<T>,
    pub code: i32,
    pub msg: String,
}

impl<T: Serialize> ResponseDto<T> {
    pub fn success(data: Option<T>) -> Self {
        Self {
            data,
            code: 0,
            msg: "".to_string(),
        }
    }
}

/// One page of results. `page` is zero-based.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub list: Vec<T>,
    pub page: u64,
    pub size: u64,
    pub total: u64,
    pub total_page: u64,
}

impl<T> Page<T> {
    pub fn new(list: Vec<T>, page: u64, size: u64, total: u64) -> Self {
        let size = size.max(1);
        let total_page = if total % size == 0 {
            total / size
        } else {
            total / size + 1
        };
        Self {
            list,
            page,
            size,
            total,
            total_page,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            list: self.list.into_iter().map(f).collect(),
            page: self.page,
            size: self.size,
            total: self.total,
            total_page: self.total_page,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub page: u64,
}

/// Row offset of a zero-based page. Rejects pages whose offset does not fit
/// a signed 64-bit SQL offset.
pub fn page_offset(page: u64, size: u64) -> Result<u64, AppError> {
    page.checked_mul(size.max(1))
        .filter(|offset| *offset <= i64::MAX as u64)
        .ok_or_else(|| AppError::param_error(format!("page {} is out of range", page)))
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let app_err = match err {
        JsonPayloadError::ContentType => AppError::param_error("content type must be application/json"),
        JsonPayloadError::Deserialize(e) => AppError::param_error(format!("invalid request body: {}", e)),
        _ => AppError::param_error("invalid request body"),
    };
    app_err.into()
}

pub fn query_error_handler(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    AppError::param_error(format!("invalid query: {}", err)).into()
}

pub fn response_from_error(err: &AppError) -> HttpResponse {
    HttpResponse::build(err.status_code()).json(ResponseDto::<()> {
        data: None,
        code: err.code(),
        msg: err.msg(),
    })
}
