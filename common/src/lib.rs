//! Common library for `repocli`: stores, path resolution, progress and the bulk transfer engine
//!
//! # Overview
//!
//! A bulk operation (`put`, `get`, `cp`, `mv`, `rm`) goes through the following steps:
//!
//! 1. [`path::WorkingDirs`] turns user arguments into absolute paths and
//!    [`engine::Engine::resolve`] applies the nesting rules against the stores
//! 2. [`engine::Engine::run`] checks the preconditions and, for a directory, starts the
//!    [`walk::Walker`] and a fixed pool of workers connected by a bounded queue
//! 3. every file is processed through the [`store::Store`] trait, implemented for the local
//!    filesystem and for a WebDAV repository
//! 4. failures are counted and written to the [`errlog::ErrorSink`], progress is rendered from a
//!    [`progress::ProgressTracker`]
//! 5. the resulting [`engine::Summary`] is printed by [`run`]
//!
//! # Skip by default
//!
//! An existing destination file is left untouched and counted as succeeded (and skipped) unless
//! overwrite is requested.
//!
//! # Cancellation
//!
//! [`cancel::SignalListener`] turns SIGINT, SIGHUP, SIGTERM and SIGQUIT into a cancelled token.
//! The walker stops enqueueing and the workers stop picking up new files; files in flight
//! complete and the partial summary is returned.

pub mod cancel;
pub mod config;
pub mod engine;
pub mod errlog;
pub mod listing;
pub mod path;
pub mod progress;
pub mod store;
pub mod walk;

#[cfg(test)]
pub mod testutils;

pub use config::{OutputConfig, RemoteConfig, RuntimeConfig, TracingConfig};
pub use progress::{ProgressSettings, ProgressType};

fn console_directive(output: &OutputConfig) -> &'static str {
    if output.quiet {
        return "off";
    }
    match output.verbose {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn init_tracing(output: &OutputConfig, tracing_config: &TracingConfig) -> anyhow::Result<()> {
    use anyhow::Context;
    use tracing_subscriber::prelude::*;
    let console_filter = tracing_subscriber::EnvFilter::try_from_env("REPOCLI_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(console_directive(output)));
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);
    let file_layer = match &tracing_config.debug_log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open debug log file {path:?}"))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_thread_ids(true)
                    .with_writer(std::sync::Mutex::new(file))
                    .with_filter(tracing_subscriber::EnvFilter::new("common=trace,repocli=trace")),
            )
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("cannot initialize logging")
}

fn build_runtime(runtime: &RuntimeConfig) -> anyhow::Result<tokio::runtime::Runtime> {
    use anyhow::Context;
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    builder.build().context("failed to create tokio runtime")
}

/// Sets up logging and the tokio runtime, runs `func` and reports its outcome.
///
/// Returns `None` if setup or `func` failed; the error has already been printed unless quiet.
pub fn run<Fut, Summary, Error>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    tracing: TracingConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Summary: std::fmt::Display,
    Error: std::fmt::Display,
    Fut: std::future::Future<Output = Result<Summary, Error>>,
{
    if let Err(error) = init_tracing(&output, &tracing) {
        eprintln!("{error:#}");
        return None;
    }
    let runtime = match build_runtime(&runtime) {
        Ok(runtime) => runtime,
        Err(error) => {
            if !output.quiet {
                eprintln!("{error:#}");
            }
            return None;
        }
    };
    match runtime.block_on(func()) {
        Ok(summary) => {
            if output.print_summary {
                eprintln!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            if !output.quiet {
                eprintln!("{error:#}");
            }
            None
        }
    }
}
