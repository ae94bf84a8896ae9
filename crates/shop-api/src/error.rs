//! HTTP error mapping onto the `{code, message, data}` envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use shop_ingest::IngestError;
use shop_scheduler::SchedulerError;
use shop_types::{AuditLogError, BaseResponse, EventStoreError, TenantError};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = BaseResponse::<()>::error(i32::from(status.as_u16()), self.to_string());
        (status, Json(body)).into_response()
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::MissingShopDomain | IngestError::Validation(_) => {
                ApiError::BadRequest(err.to_string())
            }
            IngestError::TenantNotFound(_) => ApiError::NotFound(err.to_string()),
            IngestError::Directory(_) | IngestError::Store(_) | IngestError::AuditLog(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<EventStoreError> for ApiError {
    fn from(err: EventStoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<AuditLogError> for ApiError {
    fn from(err: AuditLogError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<TenantError> for ApiError {
    fn from(err: TenantError) -> Self {
        match err {
            TenantError::NotFound(_) => ApiError::NotFound(err.to_string()),
            TenantError::Other(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::JobNotFound(_) => ApiError::NotFound(err.to_string()),
            SchedulerError::Other(_) => ApiError::Internal(err.to_string()),
        }
    }
}
