//! Error taxonomy for one interpreter turn.

use thiserror::Error;

/// Errors that abort the current turn. The loop reports them and keeps going.
#[derive(Error, Debug)]
pub enum TurnError {
    #[error("Inference service error: {0:#}")]
    Service(anyhow::Error),

    #[error("Malformed tool response: {0}")]
    Protocol(String),

    #[error("Unknown tool requested: {0}")]
    UnknownTool(String),

    #[error("Sandbox error: {0:#}")]
    Sandbox(anyhow::Error),

    #[error("Output error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Interrupted")]
    Interrupted,
}

/// Failure to persist a single artifact. Logged and skipped by the extractor.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("could not decode {kind} payload: {reason}")]
    Decode { kind: &'static str, reason: String },

    #[error("failed to write {path} in sandbox: {cause:#}")]
    RemoteWrite { path: String, cause: anyhow::Error },

    #[error("failed to download {path}: {cause:#}")]
    RemoteRead { path: String, cause: anyhow::Error },

    #[error("failed to write {path}: {source}")]
    LocalWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
