//! Interactive interpreter loop: user text in, model tool call out, code run
//! in a fresh sandbox session, results and artifacts printed.

use std::{io::Write, sync::Arc};

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt},
    sync::watch,
};

use crate::{
    errors::TurnError,
    execution::{
        artifacts::{render_error, ResultExtractor, SavedFile},
        ExecutionOutcome,
    },
    functions::{self, Tool, ToolRequest},
    llm::ConversationTurn,
    printer::{MarkdownPrinter, TextPrinter},
    sandbox::{self, ExecutionSession, SessionProvider},
};

pub const PROMPT: &str = "Enter your message (or 'quit' to exit): ";
pub const NO_EXECUTION: &str = "No code execution requested.";
const QUIT: &str = "quit";

/// What one turn produced for the user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutput {
    pub rendered: String,
    pub saved_files: Vec<SavedFile>,
    pub outcome: Option<ExecutionOutcome>,
}

impl TurnOutput {
    pub fn no_execution() -> Self {
        Self {
            rendered: NO_EXECUTION.to_string(),
            ..Default::default()
        }
    }
}

pub struct InteractionLoop<'a> {
    conversation: &'a dyn ConversationTurn,
    sessions: &'a dyn SessionProvider,
    extractor: ResultExtractor<'a>,
    text: TextPrinter,
    markdown: Option<MarkdownPrinter>,
    colors: bool,
    interrupt: Option<watch::Receiver<bool>>,
}

impl<'a> InteractionLoop<'a> {
    pub fn new(
        conversation: &'a dyn ConversationTurn,
        sessions: &'a dyn SessionProvider,
        extractor: ResultExtractor<'a>,
    ) -> Self {
        Self {
            conversation,
            sessions,
            extractor,
            text: TextPrinter::plain(),
            markdown: None,
            colors: false,
            interrupt: None,
        }
    }

    /// Stop reading and abandon the current turn once `interrupt` turns true.
    pub fn with_interrupt(mut self, interrupt: watch::Receiver<bool>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn with_colors(mut self, enabled: bool) -> Self {
        self.colors = enabled;
        self.text = if enabled {
            TextPrinter::colored("cyan")
        } else {
            TextPrinter::plain()
        };
        self
    }

    pub fn with_markdown(mut self, enabled: bool) -> Self {
        self.markdown = enabled.then(MarkdownPrinter::default);
        self
    }

    fn accent(&self, color: &'static str) -> TextPrinter {
        if self.colors {
            TextPrinter::colored(color)
        } else {
            TextPrinter::plain()
        }
    }

    /// Resolves once the interrupt flag is set; never, if there is none.
    async fn interrupted(&self) {
        if let Some(mut rx) = self.interrupt.clone() {
            if rx.wait_for(|&set| set).await.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await
    }

    /// Reads messages until `quit` (any case), end of input or an interrupt.
    /// Per-turn failures are reported and the loop moves on to the next
    /// message. Lines that are not valid UTF-8 are decoded lossily.
    pub async fn run<R, W>(&self, mut input: R, out: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let mut buf = Vec::new();
        loop {
            write!(out, "{}", PROMPT)?;
            out.flush()?;

            buf.clear();
            let read = tokio::select! {
                biased;
                _ = self.interrupted() => {
                    writeln!(out)?;
                    break;
                }
                read = input.read_until(b'\n', &mut buf) => read?,
            };
            if read == 0 {
                writeln!(out)?;
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            let message = line.trim();
            if message.eq_ignore_ascii_case(QUIT) {
                break;
            }
            if message.is_empty() {
                continue;
            }

            match self.run_turn(message, out).await {
                Ok(turn) => self.print_turn(out, &turn)?,
                Err(TurnError::Interrupted) => {
                    tracing::info!("turn interrupted");
                    writeln!(out)?;
                    break;
                }
                Err(e) => {
                    tracing::warn!("turn aborted: {}", e);
                    self.accent("red")
                        .write(out, &format!("Error processing message: {}", e))?;
                }
            }
        }
        Ok(())
    }

    /// One full turn inside its own sandbox session. The session is closed
    /// before this returns, whatever the outcome, including an interrupt.
    pub async fn run_turn<W: Write>(&self, message: &str, out: &mut W) -> Result<TurnOutput, TurnError> {
        let session = self.sessions.open().await.map_err(TurnError::Sandbox)?;
        tracing::debug!("sandbox session opened");
        sandbox::scoped(session, move |session| async move {
            tokio::select! {
                biased;
                _ = self.interrupted() => Err(TurnError::Interrupted),
                turn = self.process_message(session, message, out) => turn,
            }
        })
        .await
    }

    async fn process_message<W: Write>(
        &self,
        session: Arc<dyn ExecutionSession>,
        message: &str,
        out: &mut W,
    ) -> Result<TurnOutput, TurnError> {
        self.text.banner(out, &format!("User Message: {}", message), "")?;

        let response = self.conversation.send(message).await?;
        let text = response.text();
        if !text.is_empty() {
            self.text.banner(out, "Model Response:", "")?;
            match &self.markdown {
                Some(md) => md.write(out, &text)?,
                None => self.text.write(out, &text)?,
            }
        }

        match functions::route(&response)? {
            Some(request) => self.dispatch(session.as_ref(), &request, out).await,
            None => Ok(TurnOutput::no_execution()),
        }
    }

    async fn dispatch<W: Write>(
        &self,
        session: &dyn ExecutionSession,
        request: &ToolRequest,
        out: &mut W,
    ) -> Result<TurnOutput, TurnError> {
        self.text.banner(out, &format!("Using Tool: {}", request.tool), "")?;
        match request.tool {
            Tool::ExecutePython => {
                let code = request.code()?;
                self.accent("yellow")
                    .banner(out, "> Executing AI-generated code:", code)?;

                let outcome = session.submit(code).await.map_err(TurnError::Sandbox)?;
                if let Some(err) = &outcome.error {
                    self.accent("red")
                        .write(out, &format!("[Code Interpreter Error] {}", render_error(err)))?;
                }

                let extraction = self.extractor.extract(&outcome).await;
                let green = self.accent("green");
                for file in &extraction.saved_files {
                    green.write(out, &format!("Saved: {}", file.filename))?;
                }
                Ok(TurnOutput {
                    rendered: extraction.rendered,
                    saved_files: extraction.saved_files,
                    outcome: Some(outcome),
                })
            }
        }
    }

    fn print_turn<W: Write>(&self, out: &mut W, turn: &TurnOutput) -> std::io::Result<()> {
        writeln!(out, "{}", turn.rendered)?;
        if !turn.saved_files.is_empty() {
            let green = self.accent("green");
            green.write(out, "Saved Files:")?;
            for file in &turn.saved_files {
                green.write(out, &format!("- {}", file.filename))?;
            }
        }
        Ok(())
    }
}
