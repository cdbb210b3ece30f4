//! E2B cloud sandbox: control plane, notebook execution and filesystem.

use std::{
    pin::Pin,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use reqwest::{multipart, Client, RequestBuilder};
use serde::Deserialize;

use super::{ExecutionSession, SandboxFs, SessionProvider};
use crate::{
    config::Config,
    execution::{ErrorInfo, ExecutionOutcome, Logs, ResultItem},
};

const ENVD_PORT: u16 = 49983;
const JUPYTER_PORT: u16 = 49999;
const SANDBOX_USER: &str = "user";

#[derive(Debug, Clone, Deserialize)]
pub struct SandboxInfo {
    #[serde(rename = "sandboxID")]
    pub sandbox_id: String,
    #[serde(rename = "clientID", default)]
    pub client_id: Option<String>,
    #[serde(rename = "envdAccessToken", default)]
    pub envd_access_token: Option<String>,
}

/// Control-plane client shared by every sandbox it creates.
#[derive(Debug, Clone)]
pub struct E2bClient {
    http: Client,
    /// Cells may run for a long time; only connecting is bounded.
    exec_http: Client,
    api_key: String,
    domain: String,
    sandbox_timeout: u64,
}

impl E2bClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let api_key = cfg.require("E2B_API_KEY")?;
        let domain = cfg.get("E2B_DOMAIN").unwrap_or_else(|| "e2b.app".into());
        let sandbox_timeout = cfg.get_u64("SANDBOX_TIMEOUT").unwrap_or(300);

        let request_timeout = Duration::from_secs(cfg.request_timeout_secs());
        let http = Client::builder().timeout(request_timeout).build()?;
        let exec_http = Client::builder().connect_timeout(request_timeout).build()?;

        Ok(Self {
            http,
            exec_http,
            api_key,
            domain,
            sandbox_timeout,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("https://api.{}{}", self.domain, path)
    }

    fn host_url(&self, port: u16, sandbox_id: &str, path: &str) -> String {
        format!("https://{}-{}.{}{}", port, sandbox_id, self.domain, path)
    }

    pub async fn create(&self, template: &str) -> Result<E2bSandbox> {
        let resp = self
            .http
            .post(self.api_url("/sandboxes"))
            .header("X-API-Key", &self.api_key)
            .json(&serde_json::json!({
                "templateID": template,
                "timeout": self.sandbox_timeout,
            }))
            .send()
            .await
            .context("failed to send sandbox create request")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("sandbox create failed: {} - {}", status, text);
        }
        let info: SandboxInfo = resp.json().await.context("invalid sandbox create response")?;
        tracing::debug!(sandbox_id = %info.sandbox_id, template, "sandbox created");

        Ok(E2bSandbox {
            client: self.clone(),
            info,
            closed: AtomicBool::new(false),
        })
    }

    fn timeout_request(&self, sandbox_id: &str) -> RequestBuilder {
        self.http
            .post(self.api_url(&format!("/sandboxes/{}/timeout", sandbox_id)))
            .header("X-API-Key", &self.api_key)
            .json(&serde_json::json!({ "timeout": self.sandbox_timeout }))
    }

    async fn kill(&self, sandbox_id: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.api_url(&format!("/sandboxes/{}", sandbox_id)))
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .context("failed to send sandbox kill request")?;

        let status = resp.status();
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            let text = resp.text().await.unwrap_or_default();
            bail!("sandbox kill failed: {} - {}", status, text);
        }
        Ok(())
    }
}

/// One live sandbox. [`E2bSandbox::close`] releases it; later calls are no-ops.
#[derive(Debug)]
pub struct E2bSandbox {
    client: E2bClient,
    info: SandboxInfo,
    closed: AtomicBool,
}

impl E2bSandbox {
    pub fn id(&self) -> &str {
        &self.info.sandbox_id
    }

    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.client.kill(self.id()).await?;
        tracing::debug!(sandbox_id = %self.id(), "sandbox killed");
        Ok(())
    }

    /// Pushes the sandbox's expiry `SANDBOX_TIMEOUT` seconds into the future.
    pub async fn keep_alive(&self) -> Result<()> {
        let resp = self
            .client
            .timeout_request(self.id())
            .send()
            .await
            .context("failed to send sandbox timeout request")?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("sandbox timeout refresh failed: {} - {}", status, text);
        }
        tracing::debug!(sandbox_id = %self.id(), "sandbox timeout refreshed");
        Ok(())
    }

    /// How often an idle handle should call [`keep_alive`](Self::keep_alive).
    pub fn keep_alive_period(&self) -> Duration {
        Duration::from_secs((self.client.sandbox_timeout / 2).max(1))
    }

    fn with_token(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.info.envd_access_token {
            Some(token) => req.header("X-Access-Token", token),
            None => req,
        }
    }

    fn files_request(&self, req: RequestBuilder, path: &str) -> RequestBuilder {
        self.with_token(req.query(&[("path", path), ("username", SANDBOX_USER)]))
    }

    /// Streams the events of one cell execution as the kernel reports them.
    pub fn execute_stream(
        &self,
        code: &str,
    ) -> Pin<Box<dyn Stream<Item = Result<ExecEvent>> + Send>> {
        let req = self.execute_request(code);

        Box::pin(try_stream! {
            let resp = req.send().await.context("failed to send execute request")?;
            if !resp.status().is_success() {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                Err::<(), _>(anyhow!("execute failed: {} - {}", status, text))?;
                return;
            }

            let mut buf: Vec<u8> = Vec::new();
            let mut stream = resp.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let bytes = chunk.context("execute stream error")?;
                buf.extend_from_slice(&bytes);
                for line in drain_lines(&mut buf) {
                    if let Some(event) = parse_event_line(&line)? {
                        yield event;
                    }
                }
            }
            if let Some(event) = parse_event_line(&String::from_utf8_lossy(&buf))? {
                yield event;
            }
        })
    }

    fn execute_request(&self, code: &str) -> RequestBuilder {
        let url = self.client.host_url(JUPYTER_PORT, self.id(), "/execute");
        self.with_token(self.client.exec_http.post(url))
            .json(&serde_json::json!({ "code": code }))
    }
}

#[async_trait]
impl SandboxFs for E2bSandbox {
    async fn keep_alive(&self) -> Result<()> {
        E2bSandbox::keep_alive(self).await
    }

    async fn write_bytes(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let url = self.client.host_url(ENVD_PORT, self.id(), "/files");
        let file_name = path.rsplit('/').next().unwrap_or(path).to_string();
        let form = multipart::Form::new()
            .part("file", multipart::Part::bytes(bytes.to_vec()).file_name(file_name));

        let resp = self
            .files_request(self.client.http.post(url), path)
            .multipart(form)
            .send()
            .await
            .context("failed to send file upload")?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("upload of {} failed: {} - {}", path, status, text);
        }
        Ok(())
    }

    async fn download_file(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.client.host_url(ENVD_PORT, self.id(), "/files");
        let resp = self
            .files_request(self.client.http.get(url), path)
            .send()
            .await
            .context("failed to send file download")?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("download of {} failed: {} - {}", path, status, text);
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

/// Newline-delimited events emitted by the sandbox's notebook kernel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecEvent {
    Result(ResultItem),
    Stdout { text: String },
    Stderr { text: String },
    Error(ErrorInfo),
    NumberOfExecutions { execution_count: u64 },
    EndOfExecution,
    #[serde(other)]
    Unknown,
}

/// Removes every complete line from `buf` and decodes it. Bytes after the
/// last newline stay buffered, so a character split across chunks survives.
fn drain_lines(buf: &mut Vec<u8>) -> Vec<String> {
    let Some(last) = buf.iter().rposition(|&b| b == b'\n') else {
        return Vec::new();
    };
    let complete: Vec<u8> = buf.drain(..=last).collect();
    complete
        .split(|&b| b == b'\n')
        .filter(|l| !l.is_empty())
        .map(|l| String::from_utf8_lossy(l).into_owned())
        .collect()
}

fn parse_event_line(line: &str) -> Result<Option<ExecEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .with_context(|| format!("invalid execution event: {}", line))
}

/// Folds a cell's events into one outcome. An error event discards results.
pub fn collect_outcome<I: IntoIterator<Item = ExecEvent>>(events: I) -> ExecutionOutcome {
    let mut results = Vec::new();
    let mut logs = Logs::default();
    let mut error = None;

    for event in events {
        match event {
            ExecEvent::Result(item) => results.push(item),
            ExecEvent::Stdout { text } => logs.stdout.push(text),
            ExecEvent::Stderr { text } => logs.stderr.push(text),
            ExecEvent::Error(info) => error = Some(info),
            ExecEvent::NumberOfExecutions { .. } | ExecEvent::EndOfExecution | ExecEvent::Unknown => {}
        }
    }

    match error {
        Some(info) => ExecutionOutcome::failed(info, logs),
        None => ExecutionOutcome {
            results,
            logs,
            error: None,
        },
    }
}

/// A notebook session backed by its own code-interpreter sandbox.
#[derive(Debug)]
pub struct E2bSession {
    sandbox: E2bSandbox,
}

#[async_trait]
impl ExecutionSession for E2bSession {
    async fn submit(&self, code: &str) -> Result<ExecutionOutcome> {
        let mut stream = self.sandbox.execute_stream(code);
        let mut events = Vec::new();
        while let Some(ev) = stream.next().await {
            let ev = ev?;
            let done = ev == ExecEvent::EndOfExecution;
            events.push(ev);
            if done {
                break;
            }
        }
        Ok(collect_outcome(events))
    }

    async fn close(&self) -> Result<()> {
        self.sandbox.close().await
    }
}

/// Opens one [`E2bSession`] per user turn from the interpreter template.
#[derive(Debug, Clone)]
pub struct E2bInterpreter {
    client: E2bClient,
    template: String,
}

impl E2bInterpreter {
    pub fn new(client: E2bClient, template: impl Into<String>) -> Self {
        Self {
            client,
            template: template.into(),
        }
    }
}

#[async_trait]
impl SessionProvider for E2bInterpreter {
    async fn open(&self) -> Result<Box<dyn ExecutionSession>> {
        let sandbox = self.client.create(&self.template).await?;
        Ok(Box::new(E2bSession { sandbox }))
    }
}
