//! Rendering of execution outcomes and persistence of their media payloads.

use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use super::{ErrorInfo, ExecutionOutcome, Logs, MediaType, Payload, ResultItem};
use crate::{errors::ArtifactError, sandbox::SandboxFs};

pub const NO_OUTPUT: &str = "No output from execution.";

/// A media payload written to local disk.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedFile {
    pub filename: String,
    pub path: PathBuf,
    /// 1-based position of the originating result item.
    pub index: usize,
    pub media: MediaType,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub rendered: String,
    pub saved_files: Vec<SavedFile>,
}

pub struct ResultExtractor<'a> {
    fs: &'a dyn SandboxFs,
    remote_home: String,
    output_dir: PathBuf,
}

impl<'a> ResultExtractor<'a> {
    pub fn new(fs: &'a dyn SandboxFs, remote_home: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            remote_home: remote_home.into(),
            output_dir: output_dir.into(),
        }
    }

    pub async fn extract(&self, outcome: &ExecutionOutcome) -> Extraction {
        if let Some(err) = &outcome.error {
            let mut rendered = render_error(err);
            if let Some(logs) = render_logs(&outcome.logs) {
                rendered.push('\n');
                rendered.push_str(&logs);
            }
            return Extraction {
                rendered,
                saved_files: Vec::new(),
            };
        }

        let mut rendered = String::new();
        let mut saved_files = Vec::new();

        if outcome.results.iter().any(|item| item.first_payload().is_some()) {
            if let Err(e) = self.fs.keep_alive().await {
                tracing::warn!("failed to extend artifact sandbox lifetime: {:#}", e);
            }
        }

        if !outcome.results.is_empty() {
            rendered.push_str("Execution Results:\n");
            for (i, item) in outcome.results.iter().enumerate() {
                let index = i + 1;
                rendered.push_str(&render_item(index, item));

                let Some((media, payload)) = item.first_payload() else {
                    continue;
                };
                match self.save(index, media, payload).await {
                    Ok(saved) => {
                        tracing::debug!(path = %saved.path.display(), "artifact saved");
                        saved_files.push(saved);
                    }
                    Err(e) => tracing::warn!("skipping artifact of result {}: {}", index, e),
                }
            }
        }

        if let Some(logs) = render_logs(&outcome.logs) {
            rendered.push_str(&logs);
        }

        if rendered.is_empty() {
            rendered = NO_OUTPUT.to_string();
        }

        Extraction {
            rendered,
            saved_files,
        }
    }

    /// Decode, push through the sandbox filesystem, pull back and write locally.
    async fn save(
        &self,
        index: usize,
        media: MediaType,
        payload: Payload<'_>,
    ) -> Result<SavedFile, ArtifactError> {
        let bytes = decode_payload(media, payload)?;
        let filename = artifact_filename(index, media);
        let remote_path = format!("{}/{}", self.remote_home.trim_end_matches('/'), filename);

        self.fs
            .write_bytes(&remote_path, &bytes)
            .await
            .map_err(|cause| ArtifactError::RemoteWrite {
                path: remote_path.clone(),
                cause,
            })?;
        let downloaded = self
            .fs
            .download_file(&remote_path)
            .await
            .map_err(|cause| ArtifactError::RemoteRead {
                path: remote_path.clone(),
                cause,
            })?;

        let path = self.output_dir.join(&filename);
        let local_write = async {
            tokio::fs::create_dir_all(&self.output_dir).await?;
            tokio::fs::write(&path, &downloaded).await
        };
        local_write.await.map_err(|source| ArtifactError::LocalWrite {
            path: path.display().to_string(),
            source,
        })?;

        Ok(SavedFile {
            filename,
            path,
            index,
            media,
        })
    }
}

pub fn artifact_filename(index: usize, media: MediaType) -> String {
    format!("output_file_{}.{}", index, media.extension())
}

pub fn decode_payload(media: MediaType, payload: Payload<'_>) -> Result<Vec<u8>, ArtifactError> {
    match payload {
        Payload::Text(s) if media.is_base64() => {
            let compact: String = s.chars().filter(|c| !c.is_ascii_whitespace()).collect();
            STANDARD.decode(compact).map_err(|e| ArtifactError::Decode {
                kind: media.extension(),
                reason: e.to_string(),
            })
        }
        Payload::Text(s) => Ok(s.as_bytes().to_vec()),
        Payload::Json(v) => serde_json::to_vec_pretty(v).map_err(|e| ArtifactError::Decode {
            kind: media.extension(),
            reason: e.to_string(),
        }),
    }
}

fn render_item(index: usize, item: &ResultItem) -> String {
    format!(
        "Result {}:\n{}: {}\n",
        index,
        item.kind().label(),
        item.text.as_deref().unwrap_or_default()
    )
}

pub fn render_error(err: &ErrorInfo) -> String {
    format!(
        "Execution error: {}: {}.\n{}",
        err.name, err.value, err.traceback
    )
}

pub fn render_logs(logs: &Logs) -> Option<String> {
    if logs.is_empty() {
        return None;
    }
    let mut out = String::from("Logs:\n");
    if !logs.stdout.is_empty() {
        out.push_str(&format!("Stdout: {}\n", logs.stdout.join(" ")));
    }
    if !logs.stderr.is_empty() {
        out.push_str(&format!("Stderr: {}\n", logs.stderr.join(" ")));
    }
    Some(out)
}
