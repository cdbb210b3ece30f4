//! Sandbox abstraction: the per-turn notebook session and the long-lived
//! filesystem handle used to round-trip artifacts.
//!
//! - [`ExecutionSession`] runs one cell in a remote notebook context.
//! - [`SessionProvider`] opens a fresh session for every user turn.
//! - [`SandboxFs`] writes and downloads files inside the process-lifetime sandbox.
//!
//! [`scoped`] guarantees a session is closed exactly once, whether the body
//! returns `Ok`, returns `Err` or panics.

pub mod e2b;

use std::{future::Future, panic::AssertUnwindSafe, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;

use crate::execution::ExecutionOutcome;

#[async_trait]
pub trait ExecutionSession: Send + Sync {
    /// Submit one cell and wait for its outcome. A runtime error in the code
    /// is reported through [`ExecutionOutcome::error`], not as `Err`.
    async fn submit(&self, code: &str) -> Result<ExecutionOutcome>;

    /// Release the remote context.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn open(&self) -> Result<Box<dyn ExecutionSession>>;
}

#[async_trait]
pub trait SandboxFs: Send + Sync {
    async fn write_bytes(&self, path: &str, bytes: &[u8]) -> Result<()>;

    async fn download_file(&self, path: &str) -> Result<Vec<u8>>;

    /// Extend the lifetime of the backing sandbox. Handles that never expire
    /// keep the default.
    async fn keep_alive(&self) -> Result<()> {
        Ok(())
    }
}

/// Runs `body` with `session` and closes the session afterwards on every
/// exit path. A panic inside `body` is re-raised once the session is closed.
pub async fn scoped<T, F, Fut>(session: Box<dyn ExecutionSession>, body: F) -> T
where
    F: FnOnce(Arc<dyn ExecutionSession>) -> Fut,
    Fut: Future<Output = T>,
{
    let session: Arc<dyn ExecutionSession> = Arc::from(session);
    let outcome = AssertUnwindSafe(body(Arc::clone(&session)))
        .catch_unwind()
        .await;

    match session.close().await {
        Ok(()) => tracing::debug!("sandbox session closed"),
        Err(e) => tracing::warn!("failed to close sandbox session: {:#}", e),
    }

    match outcome {
        Ok(value) => value,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
