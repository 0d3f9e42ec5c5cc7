use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::error::AppError;
use crate::models::chat::{ChatMessageCreate, ChatResponse, HistoryResponse, SessionCreate, TraceResponse};
use crate::models::common::SuccessResponse;
use crate::server::ApiError;
use crate::session::SessionInfo;
use crate::state::AppState;

pub async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<SessionCreate>>,
) -> Result<(StatusCode, Json<SessionInfo>), ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let info = state.sessions.create(body.environment)?;
    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.sessions.list())
}

pub async fn chat(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<ChatMessageCreate>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = body.message.trim();
    if message.is_empty() {
        return Err(AppError::Validation("message must not be empty".to_string()).into());
    }

    let reply = state.sessions.run_turn(&session_id, message).await?;
    Ok(Json(ChatResponse {
        session_id,
        message: reply.final_text,
        trace: reply.trace,
    }))
}

pub async fn get_trace(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<TraceResponse>, ApiError> {
    let entries = state.sessions.get_trace(&session_id)?;
    Ok(Json(TraceResponse { session_id, entries }))
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let turns = state.sessions.get_history(&session_id)?;
    Ok(Json(HistoryResponse { session_id, turns }))
}

pub async fn cancel_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state.sessions.cancel(&session_id)?;
    Ok(Json(SuccessResponse::new(format!("Session {session_id} cancelled"))))
}

pub async fn end_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state.sessions.end(&session_id)?;
    Ok(Json(SuccessResponse::new(format!("Session {session_id} ended"))))
}
