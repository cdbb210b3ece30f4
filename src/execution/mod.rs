//! Execution outcome of one notebook cell.

use serde::{Deserialize, Serialize};

pub mod artifacts;

/// Media types a result item can carry, in the order the extractor scans them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Png,
    Jpeg,
    Svg,
    Pdf,
    Html,
    Json,
    Javascript,
    Markdown,
    Latex,
}

impl MediaType {
    pub const SCAN_ORDER: [MediaType; 9] = [
        MediaType::Png,
        MediaType::Jpeg,
        MediaType::Svg,
        MediaType::Pdf,
        MediaType::Html,
        MediaType::Json,
        MediaType::Javascript,
        MediaType::Markdown,
        MediaType::Latex,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            MediaType::Png => "png",
            MediaType::Jpeg => "jpeg",
            MediaType::Svg => "svg",
            MediaType::Pdf => "pdf",
            MediaType::Html => "html",
            MediaType::Json => "json",
            MediaType::Javascript => "javascript",
            MediaType::Markdown => "markdown",
            MediaType::Latex => "latex",
        }
    }

    /// Binary formats travel base64 encoded; the rest are plain text.
    pub fn is_base64(self) -> bool {
        matches!(self, MediaType::Png | MediaType::Jpeg | MediaType::Pdf)
    }
}

/// Encoded payload as reported by the sandbox.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload<'a> {
    Text(&'a str),
    Json(&'a serde_json::Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Main,
    Display,
}

impl ResultKind {
    pub fn label(self) -> &'static str {
        match self {
            ResultKind::Main => "[Main Result]",
            ResultKind::Display => "[Display Data]",
        }
    }
}

/// One entry of a cell's results: the value of the last expression or
/// incidental display output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub is_main_result: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub png: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jpeg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub javascript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latex: Option<String>,
}

impl ResultItem {
    pub fn kind(&self) -> ResultKind {
        if self.is_main_result {
            ResultKind::Main
        } else {
            ResultKind::Display
        }
    }

    /// Returns the payload for `media` if populated. Empty strings and JSON
    /// nulls count as absent.
    pub fn payload(&self, media: MediaType) -> Option<Payload<'_>> {
        let text = match media {
            MediaType::Png => &self.png,
            MediaType::Jpeg => &self.jpeg,
            MediaType::Svg => &self.svg,
            MediaType::Pdf => &self.pdf,
            MediaType::Html => &self.html,
            MediaType::Javascript => &self.javascript,
            MediaType::Markdown => &self.markdown,
            MediaType::Latex => &self.latex,
            MediaType::Json => {
                return self
                    .json
                    .as_ref()
                    .filter(|v| !v.is_null())
                    .map(Payload::Json)
            }
        };
        text.as_deref().filter(|s| !s.is_empty()).map(Payload::Text)
    }

    /// First populated media type in scan order.
    pub fn first_payload(&self) -> Option<(MediaType, Payload<'_>)> {
        MediaType::SCAN_ORDER
            .iter()
            .find_map(|&m| self.payload(m).map(|p| (m, p)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Logs {
    #[serde(default)]
    pub stdout: Vec<String>,
    #[serde(default)]
    pub stderr: Vec<String>,
}

impl Logs {
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub traceback: String,
}

/// Everything one submitted cell produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutcome {
    pub results: Vec<ResultItem>,
    pub logs: Logs,
    pub error: Option<ErrorInfo>,
}

impl ExecutionOutcome {
    pub fn failed(error: ErrorInfo, logs: Logs) -> Self {
        Self {
            results: Vec::new(),
            logs,
            error: Some(error),
        }
    }
}
