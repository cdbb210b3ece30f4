#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use code_opus::{
    errors::TurnError,
    execution::ExecutionOutcome,
    llm::{ContentBlock, ConversationTurn, ModelResponse, StopReason},
    sandbox::{ExecutionSession, SandboxFs, SessionProvider},
};

pub fn text_response(text: &str) -> ModelResponse {
    ModelResponse {
        id: Some("msg_text".into()),
        stop_reason: Some(StopReason::EndTurn),
        content: vec![ContentBlock::Text { text: text.into() }],
    }
}

pub fn tool_response(name: &str, code: &str) -> ModelResponse {
    ModelResponse {
        id: Some("msg_tool".into()),
        stop_reason: Some(StopReason::ToolUse),
        content: vec![
            ContentBlock::Text { text: "Running it.".into() },
            ContentBlock::ToolUse {
                id: "toolu_1".into(),
                name: name.into(),
                input: serde_json::json!({ "code": code }),
            },
        ],
    }
}

/// Replays canned responses; an exhausted queue behaves like a failed request.
#[derive(Default)]
pub struct ScriptedConversation {
    responses: Mutex<VecDeque<ModelResponse>>,
    pub sent: Mutex<Vec<String>>,
}

impl ScriptedConversation {
    pub fn new<I: IntoIterator<Item = ModelResponse>>(responses: I) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            sent: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ConversationTurn for ScriptedConversation {
    async fn send(&self, user_message: &str) -> Result<ModelResponse, TurnError> {
        self.sent.lock().unwrap().push(user_message.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TurnError::Service(anyhow!("529 overloaded")))
    }
}

#[derive(Debug, Clone)]
pub enum Behaviour {
    Outcome(ExecutionOutcome),
    Fail(String),
    Panic,
    /// Never finishes, like a cell stuck in an infinite loop.
    Hang,
}

#[derive(Default)]
pub struct Counters {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub submitted: Mutex<Vec<String>>,
}

pub struct FakeSession {
    behaviour: Behaviour,
    counters: Arc<Counters>,
}

#[async_trait]
impl ExecutionSession for FakeSession {
    async fn submit(&self, code: &str) -> Result<ExecutionOutcome> {
        self.counters.submitted.lock().unwrap().push(code.to_string());
        match &self.behaviour {
            Behaviour::Outcome(outcome) => Ok(outcome.clone()),
            Behaviour::Fail(msg) => Err(anyhow!(msg.clone())),
            Behaviour::Panic => panic!("kernel connection dropped"),
            Behaviour::Hang => std::future::pending().await,
        }
    }

    async fn close(&self) -> Result<()> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeSessions {
    behaviour: Behaviour,
    pub counters: Arc<Counters>,
}

impl FakeSessions {
    pub fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionProvider for FakeSessions {
    async fn open(&self) -> Result<Box<dyn ExecutionSession>> {
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            behaviour: self.behaviour.clone(),
            counters: Arc::clone(&self.counters),
        }))
    }
}

/// In-memory sandbox filesystem. Writes to `failing` paths and downloads
/// of `unreadable` paths are rejected.
#[derive(Default)]
pub struct MemoryFs {
    files: Mutex<HashMap<String, Vec<u8>>>,
    failing: HashSet<String>,
    unreadable: HashSet<String>,
    pub keep_alives: AtomicUsize,
}

impl MemoryFs {
    pub fn failing_on<I: IntoIterator<Item = &'static str>>(paths: I) -> Self {
        Self {
            failing: paths.into_iter().map(String::from).collect(),
            ..Default::default()
        }
    }

    pub fn unreadable<I: IntoIterator<Item = &'static str>>(paths: I) -> Self {
        Self {
            unreadable: paths.into_iter().map(String::from).collect(),
            ..Default::default()
        }
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }
}

#[async_trait]
impl SandboxFs for MemoryFs {
    async fn write_bytes(&self, path: &str, bytes: &[u8]) -> Result<()> {
        if self.failing.contains(path) {
            return Err(anyhow!("disk quota exceeded"));
        }
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn download_file(&self, path: &str) -> Result<Vec<u8>> {
        if self.unreadable.contains(path) {
            return Err(anyhow!("502 bad gateway"));
        }
        self.get(path).ok_or_else(|| anyhow!("{} not found", path))
    }

    async fn keep_alive(&self) -> Result<()> {
        self.keep_alives.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
