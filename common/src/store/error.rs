//! Error type shared by all store implementations

/// Result alias used by [`crate::store::Store`] implementations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single store call.
///
/// `NotFound` and `DirectoryNotEmpty` are matched on by the engine (skip-by-default checks and
/// non-recursive removal), every other variant is only ever reported.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{path:?}: no such file or directory")]
    NotFound { path: std::path::PathBuf },

    #[error("directory not empty: {path:?}")]
    DirectoryNotEmpty { path: std::path::PathBuf },

    #[error("not a directory: {path:?}")]
    NotADirectory { path: std::path::PathBuf },

    #[error("{method} {path:?}: server replied {status}")]
    Http {
        method: String,
        path: std::path::PathBuf,
        status: reqwest::StatusCode,
    },

    #[error("{method} {path:?}: {source}")]
    Request {
        method: String,
        path: std::path::PathBuf,
        #[source]
        source: reqwest::Error,
    },

    #[error("malformed response for {path:?}: {message}")]
    Protocol {
        path: std::path::PathBuf,
        message: String,
    },

    #[error("{path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Maps an I/O error on `path`, keeping the kinds the engine needs to tell apart.
    pub fn from_io(path: &std::path::Path, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::DirectoryNotEmpty => Error::DirectoryNotEmpty {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::NotADirectory => Error::NotADirectory {
                path: path.to_path_buf(),
            },
            _ => Error::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    #[must_use]
    pub fn is_directory_not_empty(&self) -> bool {
        matches!(self, Error::DirectoryNotEmpty { .. })
    }
}
