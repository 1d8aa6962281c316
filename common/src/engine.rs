//! Bulk transfer engine
//!
//! One top-level operation runs a single walker (the calling task) that lists the source tree and
//! feeds file tasks into a bounded queue, concurrently with a fixed pool of workers that apply the
//! operation through the [`Store`] handles. Individual file failures are counted, logged and written
//! to the [`ErrorSink`]; they never abort the run. Only precondition failures (and a failed cleanup
//! of a moved or removed directory) are fatal.
//!
//! | operation | source  | destination | progress unit |
//! |-----------|---------|-------------|---------------|
//! | `Put`     | local   | repository  | bytes         |
//! | `Get`     | repository | local    | bytes         |
//! | `Copy`    | repository | repository | files       |
//! | `Move`    | repository | repository | files       |
//! | `Remove`  | repository | -        | files         |

use tracing::instrument;

use crate::errlog::ErrorSink;
use crate::path::{TransferPaths, UserPath};
use crate::progress::{ProgressRenderer, ProgressSettings, ProgressTracker, Unit};
use crate::store::{self, Outcome, PathEntry, Store};
use crate::walk::{WalkOutcome, Walker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Put,
    Get,
    Copy,
    Move,
    Remove,
}

impl Operation {
    #[must_use]
    pub fn unit(self) -> Unit {
        match self {
            Operation::Put | Operation::Get => Unit::Bytes,
            Operation::Copy | Operation::Move | Operation::Remove => Unit::Files,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Operation::Put => "uploading...",
            Operation::Get => "downloading...",
            Operation::Copy => "copying...",
            Operation::Move => "moving...",
            Operation::Remove => "removing...",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            Operation::Put => "put",
            Operation::Get => "get",
            Operation::Copy => "copy",
            Operation::Move => "move",
            Operation::Remove => "remove",
        };
        write!(f, "{name}")
    }
}

/// One file to process. Removal tasks have no destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub source: PathEntry,
    pub destination: Option<PathEntry>,
}

impl Task {
    /// Progress contribution of a file: its size in bytes or one file.
    #[must_use]
    pub fn metric_of(entry: &PathEntry, unit: Unit) -> u64 {
        match unit {
            Unit::Bytes => entry.size(),
            Unit::Files => 1,
        }
    }

    #[must_use]
    pub fn metric(&self, unit: Unit) -> u64 {
        Self::metric_of(&self.source, unit)
    }
}

#[derive(Debug, Copy, Clone)]
pub struct Settings {
    /// Number of concurrent workers.
    pub workers: usize,
    /// Capacity of the task queue between the walker and the workers.
    pub queue_depth: usize,
    /// Replace existing destination files instead of skipping them.
    pub overwrite: bool,
    /// Allow removal of non-empty directories.
    pub recursive: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_depth: 16,
            overwrite: false,
            recursive: false,
        }
    }
}

impl Settings {
    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("number of workers must be at least 1".to_string());
        }
        if self.queue_depth == 0 {
            return Err("queue depth must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    /// Files processed without error, skipped ones included.
    pub succeeded: usize,
    pub failed: usize,
    /// Files left alone because the destination existed.
    pub skipped: usize,
    /// Files handed to the workers.
    pub discovered: usize,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            succeeded: self.succeeded + other.succeeded,
            failed: self.failed + other.failed,
            skipped: self.skipped + other.skipped,
            discovered: self.discovered + other.discovered,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "no. succeeded: {}, no. failed: {}",
            self.succeeded, self.failed
        )
    }
}

/// Failure of a single file, contained by the worker that hit it.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Store(#[from] store::Error),

    #[error("file size {path:?} mis-match: expected {expected}, found {actual}")]
    SizeMismatch {
        path: std::path::PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("no destination given for {path:?}")]
    NoDestination { path: std::path::PathBuf },
}

/// Failure that stops the operation.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("{path:?}: no such file or directory")]
    SourceMissing { path: std::path::PathBuf },

    #[error("destination not a directory: {path:?}")]
    DestinationNotADirectory { path: std::path::PathBuf },

    #[error("cannot {operation} {src:?} into itself ({dst:?})")]
    IntoItself {
        operation: Operation,
        src: std::path::PathBuf,
        dst: std::path::PathBuf,
    },

    #[error("directory not empty: {path:?}")]
    DirectoryNotEmpty { path: std::path::PathBuf },

    #[error("not an absolute path: {path:?}")]
    NotAbsolute { path: std::path::PathBuf },

    #[error("{operation} needs a destination")]
    MissingDestination { operation: Operation },

    #[error("cannot remove {path:?}: {error}")]
    Cleanup {
        path: std::path::PathBuf,
        #[source]
        error: store::Error,
    },

    #[error(transparent)]
    Store(#[from] store::Error),
}

/// A fatal error together with what was achieved before it.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct Error {
    #[source]
    pub source: FatalError,
    pub summary: Summary,
}

impl Error {
    #[must_use]
    pub fn new(source: FatalError, summary: Summary) -> Self {
        Error { source, summary }
    }
}

impl From<FatalError> for Error {
    fn from(source: FatalError) -> Self {
        Error::new(source, Summary::default())
    }
}

struct WorkerContext {
    operation: Operation,
    source: std::sync::Arc<dyn Store>,
    destination: std::sync::Arc<dyn Store>,
    overwrite: bool,
    progress: std::sync::Arc<ProgressTracker>,
    errors: std::sync::Arc<ErrorSink>,
}

/// Streams one file between stores, honoring skip-by-default and checking the written size.
async fn transfer_file(
    source_store: &dyn Store,
    source: &PathEntry,
    destination_store: &dyn Store,
    destination: &std::path::Path,
    overwrite: bool,
) -> Result<Outcome, TaskError> {
    if !overwrite {
        match destination_store.stat(destination).await {
            Ok(_) => {
                tracing::debug!("{:?} exists, skipping", destination);
                return Ok(Outcome::Skipped);
            }
            Err(error) if error.is_not_found() => {}
            Err(error) => return Err(error.into()),
        }
    }
    let reader = source_store.read_stream(&source.path).await?;
    destination_store
        .write_stream(destination, reader, source.mode())
        .await?;
    let written = destination_store.stat(destination).await?;
    if written.size() != source.size() {
        return Err(TaskError::SizeMismatch {
            path: destination.to_path_buf(),
            expected: source.size(),
            actual: written.size(),
        });
    }
    Ok(Outcome::Applied)
}

async fn apply(context: &WorkerContext, task: &Task) -> Result<Outcome, TaskError> {
    if context.operation == Operation::Remove {
        context.source.remove(&task.source.path).await?;
        return Ok(Outcome::Applied);
    }
    let destination = task
        .destination
        .as_ref()
        .ok_or_else(|| TaskError::NoDestination {
            path: task.source.path.clone(),
        })?;
    let outcome = match context.operation {
        Operation::Put | Operation::Get => {
            transfer_file(
                context.source.as_ref(),
                &task.source,
                context.destination.as_ref(),
                &destination.path,
                context.overwrite,
            )
            .await?
        }
        Operation::Copy => {
            context
                .source
                .copy(&task.source.path, &destination.path, context.overwrite)
                .await?
        }
        Operation::Move | Operation::Remove => {
            context
                .source
                .rename(&task.source.path, &destination.path, context.overwrite)
                .await?
        }
    };
    Ok(outcome)
}

/// Applies one task and accounts for it. Never fails: errors end up in the summary and the sink.
async fn process(context: &WorkerContext, task: Task) -> Summary {
    let mut summary = Summary::default();
    match apply(context, &task).await {
        Ok(Outcome::Applied) => summary.succeeded += 1,
        Ok(Outcome::Skipped) => {
            summary.succeeded += 1;
            summary.skipped += 1;
        }
        Err(error) => {
            tracing::error!("{} {:?} failed: {}", context.operation, &task.source.path, &error);
            context.errors.record(&task.source.path, &error).await;
            summary.failed += 1;
        }
    }
    context.progress.advance(task.metric(context.progress.unit()));
    summary
}

async fn worker(
    context: std::sync::Arc<WorkerContext>,
    tasks: async_channel::Receiver<Task>,
    cancel: tokio_util::sync::CancellationToken,
) -> Summary {
    let mut summary = Summary::default();
    loop {
        let task = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("worker stopping on cancellation");
                break;
            }
            task = tasks.recv() => match task {
                Ok(task) => task,
                // queue closed and drained
                Err(_) => break,
            },
        };
        summary = summary + process(&context, task).await;
    }
    summary
}

/// Runs top-level operations against a local and a repository store.
#[derive(Debug)]
pub struct Engine {
    local: std::sync::Arc<dyn Store>,
    remote: std::sync::Arc<dyn Store>,
    settings: Settings,
    progress: Option<ProgressSettings>,
    errors: std::sync::Arc<ErrorSink>,
    cancel: tokio_util::sync::CancellationToken,
}

impl Engine {
    pub fn new(
        local: std::sync::Arc<dyn Store>,
        remote: std::sync::Arc<dyn Store>,
        settings: Settings,
        errors: std::sync::Arc<ErrorSink>,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Self {
        Self {
            local,
            remote,
            settings,
            progress: None,
            errors,
            cancel,
        }
    }

    /// Renders progress of every run; without it the engine is silent.
    #[must_use]
    pub fn with_progress(mut self, progress: Option<ProgressSettings>) -> Self {
        self.progress = progress;
        self
    }

    /// Source and destination store of `operation`.
    #[must_use]
    pub fn stores(
        &self,
        operation: Operation,
    ) -> (std::sync::Arc<dyn Store>, std::sync::Arc<dyn Store>) {
        match operation {
            Operation::Put => (self.local.clone(), self.remote.clone()),
            Operation::Get => (self.remote.clone(), self.local.clone()),
            Operation::Copy | Operation::Move | Operation::Remove => {
                (self.remote.clone(), self.remote.clone())
            }
        }
    }

    /// Checks the user's paths against the stores and applies the nesting rules.
    pub async fn resolve(
        &self,
        operation: Operation,
        source: &UserPath,
        destination: Option<&UserPath>,
    ) -> Result<TransferPaths, Error> {
        let (source_store, destination_store) = self.stores(operation);
        let paths = match (operation, destination) {
            (Operation::Remove, _) => {
                TransferPaths::resolve_single(source_store.as_ref(), source).await?
            }
            (_, Some(destination)) => {
                TransferPaths::resolve(
                    source_store.as_ref(),
                    source,
                    destination_store.as_ref(),
                    destination,
                )
                .await?
            }
            (_, None) => return Err(FatalError::MissingDestination { operation }.into()),
        };
        Ok(paths)
    }

    #[instrument(skip(self, paths), fields(source = ?paths.source.path))]
    pub async fn run(&self, operation: Operation, paths: &TransferPaths) -> Result<Summary, Error> {
        let (source_store, _) = self.stores(operation);
        for path in std::iter::once(&paths.source.path)
            .chain(paths.destination.as_ref().map(|destination| &destination.path))
        {
            if !path.is_absolute() {
                return Err(FatalError::NotAbsolute { path: path.clone() }.into());
            }
        }
        let source = match paths.source.metadata {
            Some(_) => paths.source.clone(),
            None => match source_store.stat(&paths.source.path).await {
                Ok(entry) => entry,
                Err(error) if error.is_not_found() => {
                    return Err(FatalError::SourceMissing {
                        path: paths.source.path.clone(),
                    }
                    .into());
                }
                Err(error) => return Err(FatalError::Store(error).into()),
            },
        };
        let destination = match (operation, &paths.destination) {
            (Operation::Remove, _) => None,
            (_, Some(destination)) => Some(destination.clone()),
            (_, None) => return Err(FatalError::MissingDestination { operation }.into()),
        };
        if !source.is_dir() {
            return Ok(self
                .run_single(
                    operation,
                    Task {
                        source,
                        destination,
                    },
                )
                .await);
        }
        match destination {
            None => self.remove_tree(&source).await,
            Some(destination) => self.transfer_tree(operation, &source, &destination).await,
        }
    }

    fn worker_context(
        &self,
        operation: Operation,
        progress: std::sync::Arc<ProgressTracker>,
    ) -> WorkerContext {
        let (source, destination) = self.stores(operation);
        WorkerContext {
            operation,
            source,
            destination,
            overwrite: self.settings.overwrite,
            progress,
            errors: self.errors.clone(),
        }
    }

    fn start_progress(
        &self,
        operation: Operation,
        tracker: &std::sync::Arc<ProgressTracker>,
    ) -> Option<ProgressRenderer> {
        let settings = self.progress.as_ref()?;
        match ProgressRenderer::spawn(tracker.clone(), settings, operation.label()) {
            Ok(renderer) => Some(renderer),
            Err(error) => {
                tracing::warn!("cannot show progress: {:#}", error);
                None
            }
        }
    }

    async fn run_single(&self, operation: Operation, task: Task) -> Summary {
        if self.cancel.is_cancelled() {
            tracing::debug!("cancelled before {} of {:?}", operation, &task.source.path);
            return Summary::default();
        }
        let tracker = std::sync::Arc::new(ProgressTracker::new(operation.unit()));
        tracker.grow(task.metric(tracker.unit()));
        tracker.finalize();
        let renderer = self.start_progress(operation, &tracker);
        let context = self.worker_context(operation, tracker);
        let mut summary = process(&context, task).await;
        summary.discovered = 1;
        if let Some(renderer) = renderer {
            renderer.finish().await;
        }
        summary
    }

    /// Walks `source` and drains the queue through the worker pool.
    async fn dispatch(
        &self,
        operation: Operation,
        source: &PathEntry,
        destination: Option<&std::path::Path>,
        collect_directories: bool,
    ) -> (Summary, WalkOutcome) {
        let tracker = std::sync::Arc::new(ProgressTracker::new(operation.unit()));
        let renderer = self.start_progress(operation, &tracker);
        let context = std::sync::Arc::new(self.worker_context(operation, tracker.clone()));
        tracing::debug!(
            "{} with {} workers, {} -> {}",
            operation,
            self.settings.workers,
            context.source.name(),
            context.destination.name()
        );
        let (tx, rx) = async_channel::bounded(self.settings.queue_depth.max(1));
        let mut join_set = tokio::task::JoinSet::new();
        for _ in 0..self.settings.workers.max(1) {
            join_set.spawn(worker(context.clone(), rx.clone(), self.cancel.clone()));
        }
        drop(rx);
        let outcome = {
            let walker = Walker::new(
                context.source.clone(),
                destination.map(|_| context.destination.clone()),
                tracker.clone(),
                tx,
                self.cancel.clone(),
            )
            .collect_directories(collect_directories);
            walker.run(&source.path, destination).await
            // dropping the walker closes the queue
        };
        tracker.finalize();
        let mut summary = Summary::default();
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok(worker_summary) => summary = summary + worker_summary,
                Err(error) => tracing::error!("worker task failed: {}", error),
            }
        }
        summary.discovered = outcome.discovered;
        if let Some(renderer) = renderer {
            renderer.finish().await;
        }
        (summary, outcome)
    }

    async fn transfer_tree(
        &self,
        operation: Operation,
        source: &PathEntry,
        destination: &PathEntry,
    ) -> Result<Summary, Error> {
        if matches!(operation, Operation::Copy | Operation::Move)
            && destination.path.starts_with(&source.path)
        {
            return Err(FatalError::IntoItself {
                operation,
                src: source.path.clone(),
                dst: destination.path.clone(),
            }
            .into());
        }
        let (_, destination_store) = self.stores(operation);
        destination_store
            .mkdir_all(&destination.path, source.mode())
            .await
            .map_err(FatalError::Store)?;
        tracing::debug!(
            "{} content of {:?} into {:?}",
            operation,
            &source.path,
            &destination.path
        );
        let (summary, outcome) = self
            .dispatch(
                operation,
                source,
                Some(&destination.path),
                operation == Operation::Move,
            )
            .await;
        if operation == Operation::Move {
            return self.cleanup_moved(source, summary, outcome).await;
        }
        Ok(summary)
    }

    /// Removes the emptied source tree of a move, only if every file made it.
    async fn cleanup_moved(
        &self,
        source: &PathEntry,
        summary: Summary,
        outcome: WalkOutcome,
    ) -> Result<Summary, Error> {
        let cancelled = outcome.cancelled || self.cancel.is_cancelled();
        if summary.failed > 0 || summary.skipped > 0 || outcome.skipped_subtrees > 0 || cancelled
        {
            tracing::warn!(
                "keeping source directory {:?}: {} failed, {} skipped, {} subtrees not walked, cancelled: {}",
                &source.path,
                summary.failed,
                summary.skipped,
                outcome.skipped_subtrees,
                cancelled
            );
            return Ok(summary);
        }
        let (store, _) = self.stores(Operation::Move);
        for dir in outcome
            .directories
            .iter()
            .chain(std::iter::once(&source.path))
        {
            if let Err(error) = store.remove(dir).await {
                return Err(Error::new(
                    FatalError::Cleanup {
                        path: dir.clone(),
                        error,
                    },
                    summary,
                ));
            }
        }
        Ok(summary)
    }

    async fn remove_tree(&self, source: &PathEntry) -> Result<Summary, Error> {
        let (store, _) = self.stores(Operation::Remove);
        if !self.settings.recursive {
            let children = store
                .read_dir(&source.path)
                .await
                .map_err(FatalError::Store)?;
            if !children.is_empty() {
                return Err(FatalError::DirectoryNotEmpty {
                    path: source.path.clone(),
                }
                .into());
            }
            store
                .remove(&source.path)
                .await
                .map_err(|error| FatalError::Cleanup {
                    path: source.path.clone(),
                    error,
                })?;
            return Ok(Summary::default());
        }
        let (mut summary, outcome) = self
            .dispatch(Operation::Remove, source, None, true)
            .await;
        if outcome.cancelled || self.cancel.is_cancelled() {
            tracing::warn!("removal of {:?} cancelled, keeping directories", &source.path);
            return Ok(summary);
        }
        if summary.failed > 0 || outcome.skipped_subtrees > 0 {
            tracing::warn!(
                "keeping directories of {:?}: {} failed, {} subtrees not walked",
                &source.path,
                summary.failed,
                outcome.skipped_subtrees
            );
            return Ok(summary);
        }
        for dir in &outcome.directories {
            if let Err(error) = store.remove(dir).await {
                tracing::error!("cannot remove directory {:?}: {}", dir, &error);
                self.errors.record(dir, &error).await;
                summary.failed += 1;
            }
        }
        if summary.failed > 0 {
            tracing::warn!("keeping {:?}, some directories were left", &source.path);
            return Ok(summary);
        }
        store
            .remove(&source.path)
            .await
            .map_err(|error| {
                Error::new(
                    FatalError::Cleanup {
                        path: source.path.clone(),
                        error,
                    },
                    summary,
                )
            })?;
        Ok(summary)
    }
}
