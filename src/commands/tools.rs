use axum::extract::State;
use axum::Json;

use crate::models::chat::ToolListResponse;
use crate::state::AppState;

pub async fn list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    let tools = state.sessions.orchestrator().tool_specs().to_vec();
    Json(ToolListResponse {
        count: tools.len(),
        tools,
    })
}
