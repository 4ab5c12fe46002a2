use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::{BrokerError, ErrorKind};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        match self.0.downcast_ref::<BrokerError>().map(BrokerError::kind) {
            Some(ErrorKind::Validation) => StatusCode::BAD_REQUEST,
            Some(ErrorKind::Authorization) => StatusCode::FORBIDDEN,
            Some(ErrorKind::NotFound) => StatusCode::NOT_FOUND,
            None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, backtrace = %self.0.backtrace(), "request failed");
            return (status, Json(json!({ "error": "internal server error" }))).into_response();
        }

        let body = match self.0.downcast_ref::<BrokerError>() {
            Some(err) => json!({ "error": err.code(), "message": err.to_string() }),
            None => json!({ "error": self.0.to_string() }),
        };
        (status, Json(body)).into_response()
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
