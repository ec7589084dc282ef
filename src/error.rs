use crate::data::{RunId, ValidationError};
use crate::slots::SlotError;
use crate::timetable::LifecycleError;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{error, warn};
use serde::Serialize;
use thiserror::Error;

/// Envelope shared by every JSON endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            data,
        })
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("invalid request body: {0}")]
    Body(#[from] JsonRejection),
    #[error("invalid query: {0}")]
    Query(#[from] QueryRejection),
    #[error("invalid path: {0}")]
    Path(#[from] PathRejection),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Slots(#[from] SlotError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("no timetable run {}", describe_run(.0))]
    RunNotFound(Option<RunId>),
    #[error("allocation task failed: {0}")]
    Allocation(#[from] tokio::task::JoinError),
}

fn describe_run(id: &Option<RunId>) -> String {
    match id {
        Some(id) => id.to_string(),
        None => "exists yet".to_string(),
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Body(_)
            | AppError::Query(_)
            | AppError::Path(_)
            | AppError::Validation(_)
            | AppError::Slots(_) => StatusCode::BAD_REQUEST,
            AppError::Lifecycle(
                LifecycleError::UnknownExam(_)
                | LifecycleError::UnknownCourse(_)
                | LifecycleError::UnknownRoom(_),
            )
            | AppError::RunNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Lifecycle(_) => StatusCode::CONFLICT,
            AppError::Allocation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Tell axum how to convert `AppError` into a response.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{}", self);
        } else {
            warn!("Request rejected ({}): {}", status, self);
        }
        let body = ApiResponse {
            success: false,
            message: self.to_string(),
            data: (),
        };
        (status, Json(body)).into_response()
    }
}
