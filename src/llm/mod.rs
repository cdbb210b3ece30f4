//! Reqwest-based client for the Anthropic Messages API with tool use.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::{config::Config, errors::TurnError, functions};

pub const SYSTEM_PROMPT: &str = r#"
## Your Role & Context
You are an AI-powered Python data scientist. Your tasks involve analyzing data, generating visualizations, and providing insights using Python code.
- The Python code runs in a Jupyter notebook environment.
- Each call to the `execute_python` tool runs the code in a separate cell. You can make multiple calls to `execute_python` as needed.
- Visualizations can be displayed using matplotlib or other libraries directly in the notebook.
- You have internet access and can make API requests.
- You have filesystem access for reading and writing files.
- You can install any required pip package (if available), but common data analysis packages are preinstalled.
- All code runs securely in a sandboxed environment.
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

/// Structured reply of one Messages API call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

impl ModelResponse {
    pub fn is_tool_use(&self) -> bool {
        self.stop_reason == Some(StopReason::ToolUse)
    }

    /// Concatenated text blocks, tool blocks skipped.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One stateless exchange with the inference service.
#[async_trait]
pub trait ConversationTurn: Send + Sync {
    async fn send(&self, user_message: &str) -> Result<ModelResponse, TurnError>;
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub model: String,
    pub max_tokens: u32,
    pub system: String,
    pub tools: Vec<ToolSchema>,
}

impl ChatOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            model: cfg
                .get("DEFAULT_MODEL")
                .unwrap_or_else(|| "claude-3-opus-20240229".to_string()),
            max_tokens: cfg.get_u32("MAX_TOKENS").unwrap_or(4096),
            system: SYSTEM_PROMPT.to_string(),
            tools: functions::schemas(),
        }
    }
}

#[derive(Debug)]
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    api_version: String,
    opts: ChatOptions,
}

impl LlmClient {
    pub fn from_config(cfg: &Config, opts: ChatOptions) -> Result<Self> {
        let api_key = cfg.require("ANTHROPIC_API_KEY")?;
        let base_url = cfg
            .get("ANTHROPIC_BASE_URL")
            .unwrap_or_else(|| "https://api.anthropic.com".into())
            .trim_end_matches('/')
            .trim_end_matches("/v1")
            .to_string();
        let api_version = cfg
            .get("ANTHROPIC_VERSION")
            .unwrap_or_else(|| "2023-06-01".into());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs()))
            .build()?;

        Ok(Self {
            http,
            base_url,
            api_key,
            api_version,
            opts,
        })
    }

    pub fn options(&self) -> &ChatOptions {
        &self.opts
    }

    fn request_body(&self, messages: &[Message]) -> Result<serde_json::Value> {
        Ok(serde_json::json!({
            "model": self.opts.model,
            "system": self.opts.system,
            "max_tokens": self.opts.max_tokens,
            "messages": messages,
            "tools": serde_json::to_value(&self.opts.tools)?,
        }))
    }

    async fn create_message(&self, messages: &[Message]) -> Result<ModelResponse> {
        let url = format!("{}/v1/messages", self.base_url);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("x-api-key", HeaderValue::from_str(&self.api_key)?);
        headers.insert("anthropic-version", HeaderValue::from_str(&self.api_version)?);

        let resp = self
            .http
            .post(url)
            .headers(headers)
            .json(&self.request_body(messages)?)
            .send()
            .await
            .context("failed to send messages request")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("LLM error: {} - {}", status, text));
        }

        resp.json::<ModelResponse>()
            .await
            .context("failed to decode messages response")
    }
}

#[async_trait]
impl ConversationTurn for LlmClient {
    async fn send(&self, user_message: &str) -> Result<ModelResponse, TurnError> {
        let messages = [Message::user(user_message)];
        self.create_message(&messages).await.map_err(|e| {
            tracing::error!("messages request failed: {:#}", e);
            TurnError::Service(e)
        })
    }
}
