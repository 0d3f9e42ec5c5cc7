//! Append-only record of every tool invocation in a session.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::tools::definition::ToolResult;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEntry {
    pub sequence: usize,
    pub session_id: String,
    /// Index of the tool-result turn this entry belongs to.
    pub turn_index: usize,
    #[serde(flatten)]
    pub result: Arc<ToolResult>,
}

#[derive(Debug)]
pub struct TraceRecorder {
    session_id: String,
    entries: RwLock<Vec<Arc<TraceEntry>>>,
}

impl TraceRecorder {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn record(&self, result: Arc<ToolResult>, turn_index: usize) -> Arc<TraceEntry> {
        let mut entries = self.entries.write();
        let entry = Arc::new(TraceEntry {
            sequence: entries.len(),
            session_id: self.session_id.clone(),
            turn_index,
            result,
        });
        log_entry(&entry);
        entries.push(entry.clone());
        entry
    }

    /// Snapshot of everything recorded so far, oldest first.
    pub fn snapshot(&self) -> TraceView {
        TraceView {
            entries: self.entries.read().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read-only, restartable view over recorded trace entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TraceView {
    entries: Vec<Arc<TraceEntry>>,
}

impl TraceView {
    pub fn iter(&self) -> impl Iterator<Item = &TraceEntry> + Clone + '_ {
        self.entries.iter().map(|e| e.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&TraceEntry> {
        self.entries.get(idx).map(|e| e.as_ref())
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = s[..end].to_string();
    out.push('…');
    out
}

fn log_entry(entry: &TraceEntry) {
    let r = &entry.result;
    let args_preview = truncate(&r.arguments.to_string(), 200);
    if r.is_success() {
        tracing::info!(
            session = %entry.session_id,
            seq = entry.sequence,
            tool = %r.tool_name,
            call_id = %r.call_id,
            duration_ms = r.duration_ms,
            args = %args_preview,
            output = %truncate(&r.output.to_string(), 200),
            "tool call succeeded"
        );
    } else {
        tracing::warn!(
            session = %entry.session_id,
            seq = entry.sequence,
            tool = %r.tool_name,
            call_id = %r.call_id,
            duration_ms = r.duration_ms,
            args = %args_preview,
            error = r.error_detail.as_deref().unwrap_or(""),
            "tool call failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::definition::ToolCall;
    use chrono::Utc;
    use serde_json::json;

    fn result(id: &str) -> Arc<ToolResult> {
        let now = Utc::now();
        Arc::new(ToolResult::success(
            &ToolCall::new(id, "fetch_logs", json!({})),
            json!({}),
            json!({ "logs": [] }),
            now,
            now,
        ))
    }

    #[test]
    fn entries_are_ordered_and_numbered() {
        let rec = TraceRecorder::new("s1");
        rec.record(result("a"), 2);
        rec.record(result("b"), 3);
        let view = rec.snapshot();
        let ids: Vec<&str> = view.iter().map(|e| e.result.call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(view.get(1).unwrap().sequence, 1);
        assert_eq!(view.get(1).unwrap().turn_index, 3);
        assert_eq!(view.get(0).unwrap().session_id, "s1");
    }

    #[test]
    fn snapshot_is_stable_after_later_records() {
        let rec = TraceRecorder::new("s1");
        rec.record(result("a"), 2);
        let before = rec.snapshot();
        rec.record(result("b"), 3);
        assert_eq!(before.len(), 1);
        assert_eq!(rec.snapshot().len(), 2);
    }

    #[test]
    fn result_is_shared_not_copied() {
        let rec = TraceRecorder::new("s1");
        let r = result("a");
        let entry = rec.record(r.clone(), 2);
        assert!(Arc::ptr_eq(&entry.result, &r));
    }

    #[test]
    fn serializes_flat() {
        let rec = TraceRecorder::new("s1");
        rec.record(result("a"), 2);
        let v = serde_json::to_value(rec.snapshot()).unwrap();
        assert_eq!(v[0]["call_id"], "a");
        assert_eq!(v[0]["turn_index"], 2);
        assert_eq!(v[0]["status"], "success");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h…");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
