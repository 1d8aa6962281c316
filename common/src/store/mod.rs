//! Uniform access to a hierarchical file tree, local or remote
//!
//! The transfer engine only ever talks to a [`Store`]: the local filesystem ([`LocalStore`]) and the
//! WebDAV repository ([`WebDavStore`]) expose the same capability set, so a single walker and a
//! single worker loop serve uploads, downloads and in-repository operations alike.
//!
//! Implementations must be safe to share between workers (`Send + Sync`); a store handle is created
//! once per process and reused by every operation.

mod error;
mod local;
mod webdav;

pub use error::{Error, Result};
pub use local::LocalStore;
pub use webdav::{Credentials, WebDavStore};

/// Buffer size used when streaming file content between stores.
pub const CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Mode reported for directories by stores that have no notion of permissions.
pub const DEFAULT_DIR_MODE: u32 = 0o775;

/// Mode reported for files by stores that have no notion of permissions.
pub const DEFAULT_FILE_MODE: u32 = 0o664;

/// Sequential byte stream handed from `read_stream` to `write_stream`.
pub type ByteReader = std::pin::Pin<Box<dyn tokio::io::AsyncRead + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub size: u64,
    pub is_dir: bool,
    /// Permission bits (no file type bits).
    pub mode: u32,
    pub modified: Option<std::time::SystemTime>,
}

impl Metadata {
    #[must_use]
    pub fn file(size: u64) -> Self {
        Self {
            size,
            is_dir: false,
            mode: DEFAULT_FILE_MODE,
            modified: None,
        }
    }

    #[must_use]
    pub fn directory() -> Self {
        Self {
            size: 0,
            is_dir: true,
            mode: DEFAULT_DIR_MODE,
            modified: None,
        }
    }
}

/// An absolute path in some store, with its metadata once it has been stat'd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEntry {
    pub path: std::path::PathBuf,
    pub metadata: Option<Metadata>,
}

impl PathEntry {
    /// Entry that has not been stat'd (e.g. a destination that does not exist yet).
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            path: path.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(path: impl Into<std::path::PathBuf>, metadata: Metadata) -> Self {
        Self {
            path: path.into(),
            metadata: Some(metadata),
        }
    }

    #[must_use]
    pub fn name(&self) -> Option<&std::ffi::OsStr> {
        self.path.file_name()
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.metadata.is_some_and(|md| md.is_dir)
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.metadata.map_or(0, |md| md.size)
    }

    #[must_use]
    pub fn mode(&self) -> u32 {
        match self.metadata {
            Some(md) => md.mode,
            None => DEFAULT_FILE_MODE,
        }
    }
}

/// What a rename or copy actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Destination existed and overwrite was not requested.
    Skipped,
}

#[async_trait::async_trait]
pub trait Store: Send + Sync + std::fmt::Debug {
    /// Short name used in log messages.
    fn name(&self) -> &'static str;

    async fn stat(&self, path: &std::path::Path) -> Result<PathEntry>;

    /// Immediate children of `path`, each carrying metadata. Order is unspecified.
    async fn read_dir(&self, path: &std::path::Path) -> Result<Vec<PathEntry>>;

    /// Creates a single directory; an existing directory is not an error.
    async fn mkdir(&self, path: &std::path::Path, mode: u32) -> Result<()>;

    /// Creates a directory and any missing parents; an existing directory is not an error.
    async fn mkdir_all(&self, path: &std::path::Path, mode: u32) -> Result<()>;

    /// Removes a file or an empty directory.
    async fn remove(&self, path: &std::path::Path) -> Result<()>;

    async fn rename(
        &self,
        src: &std::path::Path,
        dst: &std::path::Path,
        overwrite: bool,
    ) -> Result<Outcome>;

    async fn copy(
        &self,
        src: &std::path::Path,
        dst: &std::path::Path,
        overwrite: bool,
    ) -> Result<Outcome>;

    async fn read_stream(&self, path: &std::path::Path) -> Result<ByteReader>;

    /// Writes the whole stream to `path`, replacing any existing file. A failure part way through
    /// leaves a partial file behind.
    async fn write_stream(&self, path: &std::path::Path, data: ByteReader, mode: u32)
    -> Result<()>;
}
