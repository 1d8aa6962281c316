//! Path resolution for transfer commands
//!
//! User input is resolved against an explicit [`WorkingDirs`] value, one working directory per
//! side, and normalized lexically (no filesystem access, `..` never escapes the root).
//!
//! The destination of a directory transfer follows the trailing separator rule, decided on the
//! string the user typed:
//!
//! - `put /a/dir /b`  uploads into `/b/dir/...`
//! - `put /a/dir/ /b` uploads the content of `dir` directly into `/b/...`
//!
//! A single file whose destination is an existing directory lands inside that directory under its
//! own name.

use crate::engine::FatalError;
use crate::store::{PathEntry, Store};

/// Lexically normalizes `path`: drops `.` components and resolves `..` against the preceding
/// component. An absolute path stays absolute and `..` at the root is dropped.
#[must_use]
pub fn clean(path: &std::path::Path) -> std::path::PathBuf {
    let absolute = path.has_root();
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in path.components() {
        match component {
            std::path::Component::Prefix(_)
            | std::path::Component::RootDir
            | std::path::Component::CurDir => {}
            std::path::Component::ParentDir => match parts.last() {
                Some(last) if *last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(std::ffi::OsStr::new("..")),
            },
            std::path::Component::Normal(name) => parts.push(name),
        }
    }
    let mut cleaned = if absolute {
        std::path::PathBuf::from("/")
    } else {
        std::path::PathBuf::new()
    };
    cleaned.extend(parts);
    if cleaned.as_os_str().is_empty() {
        cleaned.push(".");
    }
    cleaned
}

/// A path as typed by the user together with its resolved absolute form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPath {
    pub raw: String,
    pub path: std::path::PathBuf,
}

impl UserPath {
    /// A trailing separator on a source directory means "its content", not the directory itself.
    #[must_use]
    pub fn merges_content(&self) -> bool {
        self.raw.ends_with(std::path::MAIN_SEPARATOR)
    }
}

/// Working directories of the local and the repository side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingDirs {
    local: std::path::PathBuf,
    remote: std::path::PathBuf,
}

fn absolute_in(cwd: &std::path::Path, input: &str) -> std::path::PathBuf {
    let input = std::path::Path::new(input);
    if input.is_absolute() {
        clean(input)
    } else {
        clean(&cwd.join(input))
    }
}

impl WorkingDirs {
    /// Relative arguments are anchored at the filesystem (resp. repository) root.
    pub fn new(local: impl AsRef<std::path::Path>, remote: impl AsRef<std::path::Path>) -> Self {
        let root = std::path::Path::new("/");
        Self {
            local: clean(&root.join(local)),
            remote: clean(&root.join(remote)),
        }
    }

    /// Local side from the process' current directory, repository side from `remote`.
    pub fn current(remote: &str) -> anyhow::Result<Self> {
        use anyhow::Context;
        let local = std::env::current_dir().context("cannot determine the current directory")?;
        Ok(Self::new(local, remote))
    }

    #[must_use]
    pub fn local(&self) -> &std::path::Path {
        &self.local
    }

    #[must_use]
    pub fn remote(&self) -> &std::path::Path {
        &self.remote
    }

    #[must_use]
    pub fn resolve_local(&self, input: &str) -> UserPath {
        UserPath {
            raw: input.to_string(),
            path: absolute_in(&self.local, input),
        }
    }

    #[must_use]
    pub fn resolve_remote(&self, input: &str) -> UserPath {
        UserPath {
            raw: input.to_string(),
            path: absolute_in(&self.remote, input),
        }
    }
}

/// Source and destination of one top-level operation, checked against the stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPaths {
    /// Always carries metadata.
    pub source: PathEntry,
    /// Final destination of `source` itself (after the nesting rules). Carries metadata only when
    /// that exact path already exists. `None` for removal.
    pub destination: Option<PathEntry>,
}

async fn stat_existing(
    store: &dyn Store,
    path: &std::path::Path,
) -> Result<Option<PathEntry>, FatalError> {
    match store.stat(path).await {
        Ok(entry) => Ok(Some(entry)),
        Err(error) if error.is_not_found() => Ok(None),
        Err(error) => Err(FatalError::Store(error)),
    }
}

impl TransferPaths {
    /// Path pair for operations without a destination.
    pub async fn resolve_single(store: &dyn Store, path: &UserPath) -> Result<Self, FatalError> {
        let source = stat_existing(store, &path.path)
            .await?
            .ok_or_else(|| FatalError::SourceMissing {
                path: path.path.clone(),
            })?;
        Ok(Self {
            source,
            destination: None,
        })
    }

    pub async fn resolve(
        source_store: &dyn Store,
        source: &UserPath,
        destination_store: &dyn Store,
        destination: &UserPath,
    ) -> Result<Self, FatalError> {
        let Self { source: entry, .. } = Self::resolve_single(source_store, source).await?;
        let target = stat_existing(destination_store, &destination.path).await?;
        let name = entry.name().map(std::ffi::OsStr::to_os_string);
        let nested = |parent: &std::path::Path| match &name {
            Some(name) => parent.join(name),
            None => parent.to_path_buf(),
        };
        let path = if entry.is_dir() {
            if target.as_ref().is_some_and(|target| !target.is_dir()) {
                return Err(FatalError::DestinationNotADirectory {
                    path: destination.path.clone(),
                });
            }
            if source.merges_content() {
                destination.path.clone()
            } else {
                nested(&destination.path)
            }
        } else if target.as_ref().is_some_and(PathEntry::is_dir) {
            nested(&destination.path)
        } else {
            destination.path.clone()
        };
        let destination = if path == destination.path {
            target.unwrap_or_else(|| PathEntry::new(path))
        } else {
            stat_existing(destination_store, &path)
                .await?
                .unwrap_or_else(|| PathEntry::new(path))
        };
        tracing::debug!("resolved {:?} -> {:?}", &entry.path, &destination.path);
        Ok(Self {
            source: entry,
            destination: Some(destination),
        })
    }
}
