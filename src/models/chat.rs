use serde::{Deserialize, Serialize};

use crate::orchestration::conversation::Turn;
use crate::orchestration::trace::TraceView;
use crate::tools::definition::ToolSpec;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionCreate {
    #[serde(default)]
    pub environment: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessageCreate {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub message: String,
    pub trace: TraceView,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceResponse {
    pub session_id: String,
    pub entries: TraceView,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub turns: Vec<Turn>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolListResponse {
    pub tools: Vec<ToolSpec>,
    pub count: usize,
}
