use crate::lifecycle::LifecycleError;
use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Every handler answers with HTTP 200; the outcome travels in the body as
/// `{"success":"success","data":..}` or `{"success":"error","error":..}`.
#[derive(Debug)]
pub enum ApiResponse<T> {
    Success(T),
    Error(String),
}

impl<T> ApiResponse<T> {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    pub fn unauthorized() -> Self {
        Self::error("Unauthorized")
    }
}

impl<T> From<Result<T, LifecycleError>> for ApiResponse<T> {
    fn from(result: Result<T, LifecycleError>) -> Self {
        match result {
            Ok(data) => Self::Success(data),
            Err(e) => e.into(),
        }
    }
}

impl<T> From<LifecycleError> for ApiResponse<T> {
    fn from(e: LifecycleError) -> Self {
        let message = match &e {
            LifecycleError::UnexpectedError(_) => "Something went wrong".to_string(),
            e => e.to_string(),
        };
        tracing::error!(error.cause_chain = ?e, error.message = %e, "Request failed");
        Self::Error(message)
    }
}

impl<T> From<JsonRejection> for ApiResponse<T> {
    fn from(rejection: JsonRejection) -> Self {
        tracing::info!("Rejected request body: {rejection}");
        Self::Error(rejection.body_text())
    }
}

impl<T> From<PathRejection> for ApiResponse<T> {
    fn from(rejection: PathRejection) -> Self {
        tracing::info!("Rejected request path: {rejection}");
        Self::Error(rejection.body_text())
    }
}

impl<T> From<QueryRejection> for ApiResponse<T> {
    fn from(rejection: QueryRejection) -> Self {
        tracing::info!("Rejected query string: {rejection}");
        Self::Error(rejection.body_text())
    }
}

#[derive(Serialize)]
#[serde(tag = "success", rename_all = "lowercase")]
enum Envelope<T> {
    Success { data: T },
    Error { error: String },
}

impl<T> IntoResponse for ApiResponse<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response {
        let envelope = match self {
            Self::Success(data) => Envelope::Success { data },
            Self::Error(error) => Envelope::Error { error },
        };

        Json(envelope).into_response()
    }
}
