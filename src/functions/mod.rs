//! Tool registry and routing of model tool calls.

use std::fmt;

use serde_json::Value;

use crate::{
    errors::TurnError,
    llm::{ContentBlock, ModelResponse, ToolSchema},
};

/// Every tool the model may call. Extending the registry means adding a
/// variant here and an arm wherever a `Tool` is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    ExecutePython,
}

impl Tool {
    pub const ALL: &'static [Tool] = &[Tool::ExecutePython];

    pub fn name(self) -> &'static str {
        match self {
            Tool::ExecutePython => "execute_python",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.name() == name)
    }

    pub fn schema(self) -> ToolSchema {
        match self {
            Tool::ExecutePython => ToolSchema {
                name: self.name().to_string(),
                description: "Execute Python code in a Jupyter notebook cell and return results, stdout, stderr, display data, and errors.".to_string(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "code": {
                            "type": "string",
                            "description": "The Python code to execute in a single cell."
                        }
                    },
                    "required": ["code"]
                }),
            },
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn schemas() -> Vec<ToolSchema> {
    Tool::ALL.iter().map(|t| t.schema()).collect()
}

/// A tool invocation parsed out of a model response.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    pub id: String,
    pub tool: Tool,
    pub input: Value,
}

impl ToolRequest {
    /// The `code` argument of `execute_python`.
    pub fn code(&self) -> Result<&str, TurnError> {
        self.input
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                TurnError::Protocol(format!("{} called without a string `code` argument", self.tool))
            })
    }
}

/// Picks the tool invocation out of a response, if the model asked for one.
///
/// Only the first `tool_use` block counts. A `tool_use` stop reason with no
/// such block is a protocol violation.
pub fn route(response: &ModelResponse) -> Result<Option<ToolRequest>, TurnError> {
    if !response.is_tool_use() {
        return Ok(None);
    }

    let (id, name, input) = response
        .content
        .iter()
        .find_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => Some((id, name, input)),
            _ => None,
        })
        .ok_or_else(|| {
            TurnError::Protocol("stop_reason is tool_use but no tool_use block was returned".into())
        })?;

    let tool = Tool::from_name(name).ok_or_else(|| TurnError::UnknownTool(name.clone()))?;

    Ok(Some(ToolRequest {
        id: id.clone(),
        tool,
        input: input.clone(),
    }))
}
