//! Registry of callable tools. Populated once at startup, read-only afterwards.

use std::collections::HashMap;

use crate::error::AppError;
use crate::tools::definition::{ToolDefinition, ToolSpec};

#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: ToolDefinition) -> Result<(), AppError> {
        if self.index.contains_key(&definition.name) {
            return Err(AppError::DuplicateTool(definition.name));
        }
        tracing::debug!(tool = %definition.name, "registered tool");
        self.index.insert(definition.name.clone(), self.tools.len());
        self.tools.push(definition);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&ToolDefinition, AppError> {
        self.index
            .get(name)
            .map(|&idx| &self.tools[idx])
            .ok_or_else(|| AppError::UnknownTool(name.to_string()))
    }

    /// All definitions in registration order. The iterator is cheap to clone,
    /// so callers can walk it more than once.
    pub fn list(&self) -> std::slice::Iter<'_, ToolDefinition> {
        self.tools.iter()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.list().map(ToolDefinition::spec).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
