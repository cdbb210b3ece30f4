use std::{io, panic::AssertUnwindSafe, sync::Arc};

use anyhow::{Context, Result};
use futures::FutureExt;
use code_opus::{
    cli::Cli,
    config::Config,
    execution::artifacts::ResultExtractor,
    handlers::interpreter::InteractionLoop,
    llm::{ChatOptions, LlmClient},
    sandbox::e2b::{E2bClient, E2bInterpreter, E2bSandbox},
};
use is_terminal::IsTerminal;
use tokio::{
    io::{AsyncBufRead, AsyncReadExt, BufReader},
    sync::watch,
    time::{self, Instant},
};
use tracing_subscriber::EnvFilter;

/// Conventional exit status after SIGINT.
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("code_opus=warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let args = Cli::parse();

    // Load config; CLI values take precedence
    let mut cfg = Config::load();
    if let Some(model) = &args.model {
        cfg.merge([("DEFAULT_MODEL", model.as_str())]);
    }
    if let Some(n) = args.max_tokens {
        cfg.merge([("MAX_TOKENS", n.to_string())]);
    }
    if let Some(dir) = &args.output_dir {
        cfg.merge([("OUTPUT_DIR", dir.as_str())]);
    }

    let stdout_is_tty = io::stdout().is_terminal();
    let md = if args.no_md {
        false
    } else if args.md {
        true
    } else {
        cfg.get_bool("PRETTIFY_MARKDOWN") && stdout_is_tty
    };

    let llm = LlmClient::from_config(&cfg, ChatOptions::from_config(&cfg))?;
    let e2b = E2bClient::from_config(&cfg)?;
    let interpreter = E2bInterpreter::new(
        e2b.clone(),
        cfg.get("INTERPRETER_TEMPLATE").unwrap_or_else(|| "code-interpreter-v1".into()),
    );

    let (interrupt_tx, interrupt_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("received Ctrl-C");
            let _ = interrupt_tx.send(true);
        }
    });

    // Process-lifetime sandbox used to round-trip artifacts
    let template = cfg.get("SANDBOX_TEMPLATE").unwrap_or_else(|| "base".into());
    let files = Arc::new(
        e2b.create(&template)
            .await
            .with_context(|| format!("failed to start {} sandbox", template))?,
    );
    tracing::info!(sandbox_id = %files.id(), model = %llm.options().model, "interpreter ready");
    let keep_alive = tokio::spawn(keep_alive(Arc::clone(&files)));

    let extractor = ResultExtractor::new(files.as_ref(), cfg.sandbox_home(), cfg.output_dir());
    let interaction = InteractionLoop::new(&llm, &interpreter, extractor)
        .with_colors(stdout_is_tty)
        .with_markdown(md)
        .with_interrupt(interrupt_rx.clone());

    let preset: String = args.messages.iter().map(|m| format!("{}\n", m)).collect();
    let input = BufReader::new(io::Cursor::new(preset).chain(tokio::io::stdin()));

    let result = AssertUnwindSafe(run(&interaction, input)).catch_unwind().await;
    keep_alive.abort();
    if let Err(e) = files.close().await {
        tracing::warn!("failed to close sandbox {}: {:#}", files.id(), e);
    }

    let result = match result {
        Ok(r) => r,
        Err(panic) => std::panic::resume_unwind(panic),
    };
    if *interrupt_rx.borrow() {
        // The stdin reader thread may still be blocked; leave without waiting for it.
        std::process::exit(EXIT_INTERRUPTED);
    }
    result
}

async fn run<R: AsyncBufRead + Unpin>(interaction: &InteractionLoop<'_>, input: R) -> Result<()> {
    let mut stdout = io::stdout();
    interaction.run(input, &mut stdout).await
}

/// Refreshes the artifact sandbox's expiry for as long as the process runs.
async fn keep_alive(files: Arc<E2bSandbox>) {
    let period = files.keep_alive_period();
    let mut ticker = time::interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        if let Err(e) = files.keep_alive().await {
            tracing::warn!("failed to refresh sandbox {}: {:#}", files.id(), e);
        }
    }
}
