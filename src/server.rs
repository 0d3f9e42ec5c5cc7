use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::commands;
use crate::error::AppError;
use crate::orchestration::engine::TurnFailure;
use crate::orchestration::trace::TraceView;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(commands::service::root))
        .route("/health", get(commands::service::health))
        .route("/tools", get(commands::tools::list_tools))
        .route(
            "/sessions",
            post(commands::sessions::create_session).get(commands::sessions::list_sessions),
        )
        .route("/sessions/:id", axum::routing::delete(commands::sessions::end_session))
        .route("/sessions/:id/chat", post(commands::sessions::chat))
        .route("/sessions/:id/trace", get(commands::sessions::get_trace))
        .route("/sessions/:id/history", get(commands::sessions::get_history))
        .route("/sessions/:id/cancel", post(commands::sessions::cancel_session))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error body for every endpoint. Turn failures carry the partial trace.
#[derive(Debug)]
pub struct ApiError {
    pub error: AppError,
    pub trace: Option<TraceView>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.error {
            AppError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            AppError::SessionBusy(_) | AppError::Cancelled => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::TooManySessions(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::ModelUnavailable(_) | AppError::IterationLimitExceeded(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AppError> for ApiError {
    fn from(error: AppError) -> Self {
        Self { error, trace: None }
    }
}

impl From<TurnFailure> for ApiError {
    fn from(failure: TurnFailure) -> Self {
        let trace = failure.reason.is_loop_fatal().then_some(failure.trace);
        Self {
            error: failure.reason,
            trace,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.error.code(), error = %self.error, "request failed");
        }
        let mut body = json!({
            "error": { "code": self.error.code(), "message": self.error.to_string() }
        });
        if let Some(trace) = self.trace {
            body["trace"] = serde_json::to_value(trace).unwrap_or_default();
        }
        (status, Json(body)).into_response()
    }
}
