//! Operator interruption
//!
//! SIGINT, SIGHUP, SIGTERM and SIGQUIT cancel the shared token. Cancellation is cooperative: the
//! walker stops enqueueing, workers stop picking up new files, in-flight files complete.

use anyhow::Context;
use tokio::signal::unix::{SignalKind, signal};

/// Cancels a token on the first termination signal. The listener is stopped when dropped.
#[derive(Debug)]
pub struct SignalListener {
    task: tokio::task::JoinHandle<()>,
}

impl SignalListener {
    /// Installs the signal handlers; must be called from within a tokio runtime.
    pub fn spawn(token: tokio_util::sync::CancellationToken) -> anyhow::Result<Self> {
        let mut interrupt =
            signal(SignalKind::interrupt()).context("cannot install SIGINT handler")?;
        let mut hangup = signal(SignalKind::hangup()).context("cannot install SIGHUP handler")?;
        let mut terminate =
            signal(SignalKind::terminate()).context("cannot install SIGTERM handler")?;
        let mut quit = signal(SignalKind::quit()).context("cannot install SIGQUIT handler")?;
        let task = tokio::spawn(async move {
            let name = tokio::select! {
                _ = interrupt.recv() => "SIGINT",
                _ = hangup.recv() => "SIGHUP",
                _ = terminate.recv() => "SIGTERM",
                _ = quit.recv() => "SIGQUIT",
                () = token.cancelled() => return,
            };
            tracing::warn!("received {}, finishing files in flight", name);
            token.cancel();
        });
        Ok(Self { task })
    }
}

impl Drop for SignalListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}
