use std::os::unix::fs::PermissionsExt;

use tokio::io::AsyncWriteExt;

use super::{ByteReader, CHUNK_SIZE, Error, Metadata, Outcome, PathEntry, Result, Store};

/// Pass-through to the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStore;

impl LocalStore {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn to_metadata(md: &std::fs::Metadata) -> Metadata {
    Metadata {
        size: if md.is_dir() { 0 } else { md.len() },
        is_dir: md.is_dir(),
        mode: md.permissions().mode() & 0o7777,
        modified: md.modified().ok(),
    }
}

async fn exists(path: &std::path::Path) -> Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|err| Error::from_io(path, err))
}

/// Turns "already exists" into success when the existing entry is a directory.
async fn accept_existing_dir(path: &std::path::Path, error: std::io::Error) -> Result<()> {
    if error.kind() != std::io::ErrorKind::AlreadyExists {
        return Err(Error::from_io(path, error));
    }
    let md = tokio::fs::metadata(path)
        .await
        .map_err(|err| Error::from_io(path, err))?;
    if md.is_dir() {
        Ok(())
    } else {
        Err(Error::NotADirectory {
            path: path.to_path_buf(),
        })
    }
}

#[async_trait::async_trait]
impl Store for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn stat(&self, path: &std::path::Path) -> Result<PathEntry> {
        let md = tokio::fs::metadata(path)
            .await
            .map_err(|err| Error::from_io(path, err))?;
        Ok(PathEntry::with_metadata(path, to_metadata(&md)))
    }

    async fn read_dir(&self, path: &std::path::Path) -> Result<Vec<PathEntry>> {
        let mut entries = tokio::fs::read_dir(path)
            .await
            .map_err(|err| Error::from_io(path, err))?;
        let mut listing = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| Error::from_io(path, err))?
        {
            let entry_path = entry.path();
            // symlinks are followed so that linked files are transferred by content
            let md = match tokio::fs::metadata(&entry_path).await {
                Ok(md) => md,
                Err(error) => {
                    tracing::debug!(
                        "cannot follow {:?} ({}), using its own metadata",
                        &entry_path,
                        error
                    );
                    entry
                        .metadata()
                        .await
                        .map_err(|err| Error::from_io(&entry_path, err))?
                }
            };
            listing.push(PathEntry::with_metadata(entry_path, to_metadata(&md)));
        }
        Ok(listing)
    }

    async fn mkdir(&self, path: &std::path::Path, mode: u32) -> Result<()> {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.mode(mode);
        match builder.create(path).await {
            Ok(()) => Ok(()),
            Err(error) => accept_existing_dir(path, error).await,
        }
    }

    async fn mkdir_all(&self, path: &std::path::Path, mode: u32) -> Result<()> {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true).mode(mode);
        match builder.create(path).await {
            Ok(()) => Ok(()),
            Err(error) => accept_existing_dir(path, error).await,
        }
    }

    async fn remove(&self, path: &std::path::Path) -> Result<()> {
        let md = tokio::fs::symlink_metadata(path)
            .await
            .map_err(|err| Error::from_io(path, err))?;
        let res = if md.is_dir() {
            tokio::fs::remove_dir(path).await
        } else {
            tokio::fs::remove_file(path).await
        };
        res.map_err(|err| Error::from_io(path, err))
    }

    async fn rename(
        &self,
        src: &std::path::Path,
        dst: &std::path::Path,
        overwrite: bool,
    ) -> Result<Outcome> {
        if !overwrite && exists(dst).await? {
            return Ok(Outcome::Skipped);
        }
        tokio::fs::rename(src, dst)
            .await
            .map_err(|err| Error::from_io(src, err))?;
        Ok(Outcome::Applied)
    }

    async fn copy(
        &self,
        src: &std::path::Path,
        dst: &std::path::Path,
        overwrite: bool,
    ) -> Result<Outcome> {
        if !overwrite && exists(dst).await? {
            return Ok(Outcome::Skipped);
        }
        let md = tokio::fs::metadata(src)
            .await
            .map_err(|err| Error::from_io(src, err))?;
        if md.is_dir() {
            // directory content is copied entry by entry by the caller
            self.mkdir(dst, md.permissions().mode() & 0o7777).await?;
        } else {
            tokio::fs::copy(src, dst)
                .await
                .map_err(|err| Error::from_io(src, err))?;
        }
        Ok(Outcome::Applied)
    }

    async fn read_stream(&self, path: &std::path::Path) -> Result<ByteReader> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|err| Error::from_io(path, err))?;
        Ok(Box::pin(file))
    }

    async fn write_stream(
        &self,
        path: &std::path::Path,
        data: ByteReader,
        mode: u32,
    ) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(path)
            .await
            .map_err(|err| Error::from_io(path, err))?;
        let mut reader = tokio::io::BufReader::with_capacity(CHUNK_SIZE, data);
        tokio::io::copy_buf(&mut reader, &mut file)
            .await
            .map_err(|err| Error::from_io(path, err))?;
        file.flush()
            .await
            .map_err(|err| Error::from_io(path, err))?;
        Ok(())
    }
}
