use async_recursion::async_recursion;

use crate::engine::Task;
use crate::progress::ProgressTracker;
use crate::store::{PathEntry, Store};

/// What the walk produced besides the tasks themselves.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    /// Number of files sent to the queue.
    pub discovered: usize,
    /// Directories below the root in post-order (children before parents). Only collected when
    /// requested.
    pub directories: Vec<std::path::PathBuf>,
    /// Subtrees that could not be listed or whose destination could not be created.
    pub skipped_subtrees: usize,
    pub cancelled: bool,
}

/// Depth-first producer of file tasks.
///
/// Directories are created at the destination before their content is enqueued, so a worker
/// never writes into a missing directory. The queue is bounded: sending blocks while the workers
/// are busy, which keeps memory flat for arbitrarily large trees.
pub struct Walker {
    source: std::sync::Arc<dyn Store>,
    /// Absent for removal.
    destination: Option<std::sync::Arc<dyn Store>>,
    progress: std::sync::Arc<ProgressTracker>,
    tasks: async_channel::Sender<Task>,
    cancel: tokio_util::sync::CancellationToken,
    collect_directories: bool,
}

impl Walker {
    pub fn new(
        source: std::sync::Arc<dyn Store>,
        destination: Option<std::sync::Arc<dyn Store>>,
        progress: std::sync::Arc<ProgressTracker>,
        tasks: async_channel::Sender<Task>,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Self {
        Self {
            source,
            destination,
            progress,
            tasks,
            cancel,
            collect_directories: false,
        }
    }

    #[must_use]
    pub fn collect_directories(mut self, collect: bool) -> Self {
        self.collect_directories = collect;
        self
    }

    /// Walks `source` (an existing directory) whose content maps onto `destination`. The queue is
    /// closed when the walker is dropped, not when this returns.
    pub async fn run(
        &self,
        source: &std::path::Path,
        destination: Option<&std::path::Path>,
    ) -> WalkOutcome {
        let mut outcome = WalkOutcome::default();
        walk_dir(self, &mut outcome, source, destination).await;
        tracing::debug!(
            "walk of {:?} done: {} files, {} directories, {} skipped subtrees, cancelled: {}",
            source,
            outcome.discovered,
            outcome.directories.len(),
            outcome.skipped_subtrees,
            outcome.cancelled
        );
        outcome
    }

    /// Returns false if the walk must stop.
    async fn enqueue(&self, task: Task) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            sent = self.tasks.send(task) => match sent {
                Ok(()) => true,
                Err(_) => {
                    tracing::debug!("task queue closed, stopping walk");
                    false
                }
            },
        }
    }
}

#[async_recursion]
async fn walk_dir(
    walker: &Walker,
    outcome: &mut WalkOutcome,
    source: &std::path::Path,
    destination: Option<&std::path::Path>,
) {
    if walker.cancel.is_cancelled() {
        outcome.cancelled = true;
        return;
    }
    let listing = match walker.source.read_dir(source).await {
        Ok(listing) => listing,
        Err(error) => {
            tracing::warn!("cannot list {:?}, skipping: {}", source, error);
            outcome.skipped_subtrees += 1;
            return;
        }
    };
    let unit = walker.progress.unit();
    walker.progress.grow(
        listing
            .iter()
            .filter(|entry| !entry.is_dir())
            .map(|entry| Task::metric_of(entry, unit))
            .sum(),
    );
    for entry in listing {
        if walker.cancel.is_cancelled() {
            outcome.cancelled = true;
            return;
        }
        let Some(name) = entry.name() else {
            continue;
        };
        let target = destination.map(|dir| dir.join(name));
        if entry.is_dir() {
            let created = match (&walker.destination, &target) {
                (Some(store), Some(target)) => store.mkdir(target, entry.mode()).await,
                _ => Ok(()),
            };
            if let Err(error) = created {
                tracing::error!("cannot create directory {:?}, skipping: {}", target, error);
                outcome.skipped_subtrees += 1;
                continue;
            }
            walk_dir(walker, outcome, &entry.path, target.as_deref()).await;
            if outcome.cancelled {
                return;
            }
            if walker.collect_directories {
                outcome.directories.push(entry.path);
            }
        } else {
            let task = Task {
                source: entry,
                destination: target.map(PathEntry::new),
            };
            if !walker.enqueue(task).await {
                outcome.cancelled = true;
                return;
            }
            outcome.discovered += 1;
        }
    }
}
