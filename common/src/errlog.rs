//! Per-file failure log
//!
//! Each failed file produces one line `<source path> error:<message>` either on stderr or appended
//! to a user supplied file, so that a partially failed bulk transfer can be inspected and retried.

use tokio::io::AsyncWriteExt;

type Writer = Box<dyn tokio::io::AsyncWrite + Send + Unpin>;

pub struct ErrorSink {
    target: String,
    writer: tokio::sync::Mutex<Writer>,
}

impl std::fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorSink")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl ErrorSink {
    #[must_use]
    pub fn stderr() -> Self {
        Self {
            target: "stderr".to_string(),
            writer: tokio::sync::Mutex::new(Box::new(tokio::io::stderr())),
        }
    }

    /// Opens `path` for appending, creating it (readable by the owner only) if needed.
    pub async fn append_to(path: &std::path::Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o600)
            .open(path)
            .await
            .with_context(|| format!("cannot open file {path:?} for error log"))?;
        Ok(Self {
            target: path.display().to_string(),
            writer: tokio::sync::Mutex::new(Box::new(file)),
        })
    }

    /// Records a failure of `path`. Problems writing the line itself are only traced.
    pub async fn record(&self, path: &std::path::Path, error: &(dyn std::fmt::Display + Sync)) {
        let line = format!("{} error:{}\n", path.display(), error);
        let mut writer = self.writer.lock().await;
        let res = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(write_error) = res {
            tracing::warn!(
                "cannot write to error log {}: {}, dropped: {}",
                &self.target,
                write_error,
                line.trim_end()
            );
        }
    }
}
