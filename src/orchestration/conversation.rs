//! Ordered, append-only turn history for one chat session.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::error::AppError;
use crate::tools::definition::{ToolCall, ToolResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    User {
        content: String,
    },
    AssistantText {
        content: String,
    },
    AssistantToolCalls {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        calls: Vec<ToolCall>,
    },
    ToolResult {
        result: Arc<ToolResult>,
    },
}

/// Read side of a conversation. Kept in step with every append so readers
/// never wait on the turn that owns the writer.
#[derive(Debug, Clone, Default)]
pub struct HistoryReader {
    turns: Arc<RwLock<Vec<Turn>>>,
}

impl HistoryReader {
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.read().clone()
    }

    pub fn len(&self) -> usize {
        self.turns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct ConversationState {
    turns: Vec<Turn>,
    published: HistoryReader,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reader(&self) -> HistoryReader {
        self.published.clone()
    }

    /// Appends `turn` and returns its index.
    pub fn append(&mut self, turn: Turn) -> usize {
        self.published.turns.write().push(turn.clone());
        self.turns.push(turn);
        self.turns.len() - 1
    }

    pub fn history(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    #[cfg(test)]
    pub fn tool_call_count(&self) -> usize {
        self.turns
            .iter()
            .map(|t| match t {
                Turn::AssistantToolCalls { calls, .. } => calls.len(),
                _ => 0,
            })
            .sum()
    }

    #[cfg(test)]
    pub fn tool_result_count(&self) -> usize {
        self.turns
            .iter()
            .filter(|t| matches!(t, Turn::ToolResult { .. }))
            .count()
    }

    /// Call ids of the most recent tool-calls turn that have no result yet.
    #[cfg(test)]
    pub fn unresolved_calls(&self) -> Vec<String> {
        let Some(pos) = self
            .turns
            .iter()
            .rposition(|t| matches!(t, Turn::AssistantToolCalls { .. }))
        else {
            return Vec::new();
        };
        let Turn::AssistantToolCalls { calls, .. } = &self.turns[pos] else {
            return Vec::new();
        };
        calls
            .iter()
            .filter(|c| {
                !self.turns[pos + 1..].iter().any(|t| {
                    matches!(t, Turn::ToolResult { result } if result.call_id == c.call_id)
                })
            })
            .map(|c| c.call_id.clone())
            .collect()
    }
}

/// Collects the results of one tool-calls turn so they can be committed in
/// request order regardless of completion order.
#[derive(Debug)]
pub struct PendingToolResults {
    base_index: usize,
    calls: Vec<ToolCall>,
    slots: Vec<Option<Arc<ToolResult>>>,
}

impl PendingToolResults {
    /// `base_index` is the history index the first result turn will occupy.
    pub fn new(base_index: usize, calls: Vec<ToolCall>) -> Self {
        let slots = vec![None; calls.len()];
        Self {
            base_index,
            calls,
            slots,
        }
    }

    #[cfg(test)]
    pub fn calls(&self) -> &[ToolCall] {
        &self.calls
    }

    pub fn turn_index_for(&self, slot: usize) -> usize {
        self.base_index + slot
    }

    pub fn fill(&mut self, slot: usize, result: Arc<ToolResult>) {
        if let Some(s) = self.slots.get_mut(slot) {
            *s = Some(result);
        }
    }

    pub fn unfilled(&self) -> impl Iterator<Item = (usize, &ToolCall)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(i, _)| (i, &self.calls[i]))
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Appends every result as a tool-result turn, in request order.
    pub fn commit(self, state: &mut ConversationState) -> Result<(), AppError> {
        if state.len() != self.base_index {
            return Err(AppError::Message(format!(
                "history moved while tools were dispatched (expected {}, found {})",
                self.base_index,
                state.len()
            )));
        }
        if !self.is_complete() {
            return Err(AppError::Message("tool calls left without results".to_string()));
        }
        for result in self.slots.into_iter().flatten() {
            state.append(Turn::ToolResult { result });
        }
        Ok(())
    }
}
