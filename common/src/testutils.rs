use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};

use crate::store::{
    ByteReader, Error, LocalStore, Outcome, PathEntry, Result, Store, WebDavStore,
};

/// Creates a temporary directory with the following tree:
///
/// ```text
/// src
/// |- a.txt          (10 bytes)
/// |- sub
///    |- b.txt       (20 bytes)
///    |- deep
///       |- c.txt    (5 bytes)
/// ```
pub async fn setup_tree() -> anyhow::Result<tempfile::TempDir> {
    let tmp = tempfile::tempdir()?;
    let src = tmp.path().join("src");
    tokio::fs::create_dir_all(src.join("sub").join("deep")).await?;
    tokio::fs::write(src.join("a.txt"), "0123456789").await?;
    tokio::fs::write(src.join("sub").join("b.txt"), "abcdefghijklmnopqrst").await?;
    tokio::fs::write(src.join("sub").join("deep").join("c.txt"), "vwxyz").await?;
    Ok(tmp)
}

fn injected(path: &std::path::Path) -> Error {
    Error::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "injected failure"),
    }
}

/// Local filesystem store with injectable faults.
#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: LocalStore,
    unlistable: Vec<std::path::PathBuf>,
    failing: Vec<std::path::PathBuf>,
    lying_sizes: Vec<std::path::PathBuf>,
    delay: Option<std::time::Duration>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `read_dir` of this directory fails.
    pub fn unlistable(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.unlistable.push(path.into());
        self
    }

    /// Any per-file operation with this path as source or destination fails.
    pub fn failing(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.failing.push(path.into());
        self
    }

    /// `stat` reports one byte more than the real size.
    pub fn lying_size(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.lying_sizes.push(path.into());
        self
    }

    /// Every per-file operation sleeps first.
    pub fn slow(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    async fn check(&self, paths: &[&std::path::Path]) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match paths.iter().find(|path| self.failing.iter().any(|f| f == *path)) {
            Some(path) => Err(injected(path)),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Store for FaultyStore {
    fn name(&self) -> &'static str {
        "faulty"
    }

    async fn stat(&self, path: &std::path::Path) -> Result<PathEntry> {
        let mut entry = self.inner.stat(path).await?;
        let lying = self.lying_sizes.iter().any(|p| p == path);
        if let Some(md) = entry.metadata.as_mut().filter(|_| lying) {
            md.size += 1;
        }
        Ok(entry)
    }

    async fn read_dir(&self, path: &std::path::Path) -> Result<Vec<PathEntry>> {
        if self.unlistable.iter().any(|p| p == path) {
            return Err(injected(path));
        }
        self.inner.read_dir(path).await
    }

    async fn mkdir(&self, path: &std::path::Path, mode: u32) -> Result<()> {
        self.inner.mkdir(path, mode).await
    }

    async fn mkdir_all(&self, path: &std::path::Path, mode: u32) -> Result<()> {
        self.inner.mkdir_all(path, mode).await
    }

    async fn remove(&self, path: &std::path::Path) -> Result<()> {
        self.check(&[path]).await?;
        self.inner.remove(path).await
    }

    async fn rename(
        &self,
        src: &std::path::Path,
        dst: &std::path::Path,
        overwrite: bool,
    ) -> Result<Outcome> {
        self.check(&[src, dst]).await?;
        self.inner.rename(src, dst, overwrite).await
    }

    async fn copy(
        &self,
        src: &std::path::Path,
        dst: &std::path::Path,
        overwrite: bool,
    ) -> Result<Outcome> {
        self.check(&[src, dst]).await?;
        self.inner.copy(src, dst, overwrite).await
    }

    async fn read_stream(&self, path: &std::path::Path) -> Result<ByteReader> {
        self.check(&[path]).await?;
        self.inner.read_stream(path).await
    }

    async fn write_stream(
        &self,
        path: &std::path::Path,
        data: ByteReader,
        mode: u32,
    ) -> Result<()> {
        self.check(&[path]).await?;
        self.inner.write_stream(path, data, mode).await
    }
}

/// One request as seen by [`FakeDav`]. Header names are lowercased.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

impl Reply {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }

    pub fn body(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// `207 Multi-Status` with one response per `(href, size)`, a `None` size is a collection.
    pub fn multistatus(entries: &[(&str, Option<u64>)]) -> Self {
        let mut body = String::from(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<D:multistatus xmlns:D=\"DAV:\">\n",
        );
        for (href, size) in entries {
            let prop = match size {
                None => "<D:resourcetype><D:collection/></D:resourcetype>".to_string(),
                Some(size) => {
                    format!("<D:resourcetype/><D:getcontentlength>{size}</D:getcontentlength>")
                }
            };
            body.push_str(&format!(
                "<D:response><D:href>{href}</D:href><D:propstat><D:prop>{prop}</D:prop>\
                 <D:status>HTTP/1.1 200 OK</D:status></D:propstat></D:response>\n"
            ));
        }
        body.push_str("</D:multistatus>\n");
        Self::body(207, body)
    }
}

type Handler = std::sync::Arc<dyn Fn(&RecordedRequest) -> Reply + Send + Sync>;

/// Minimal HTTP/1.1 server on the loopback interface answering every request through a handler.
/// Each connection serves a single request, bodies are only read when a `Content-Length` is sent.
pub struct FakeDav {
    pub url: String,
    requests: std::sync::Arc<std::sync::Mutex<Vec<RecordedRequest>>>,
    server: tokio::task::JoinHandle<()>,
}

impl FakeDav {
    pub async fn start(
        handler: impl Fn(&RecordedRequest) -> Reply + Send + Sync + 'static,
    ) -> anyhow::Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}/dav/", listener.local_addr()?);
        let requests = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let handler: Handler = std::sync::Arc::new(handler);
        let recorded = requests.clone();
        let server = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let handler = handler.clone();
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    if let Err(error) = serve(stream, handler, recorded).await {
                        tracing::debug!("fake server connection failed: {}", error);
                    }
                });
            }
        });
        Ok(Self {
            url,
            requests,
            server,
        })
    }

    pub fn store(&self) -> Result<WebDavStore> {
        WebDavStore::new(&self.url, None, std::time::Duration::from_secs(5))
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for FakeDav {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn serve(
    stream: tokio::net::TcpStream,
    handler: Handler,
    recorded: std::sync::Arc<std::sync::Mutex<Vec<RecordedRequest>>>,
) -> anyhow::Result<()> {
    let mut stream = tokio::io::BufReader::new(stream);
    let mut line = String::new();
    stream.read_line(&mut line).await?;
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();
    let mut headers = Vec::new();
    loop {
        line.clear();
        if stream.read_line(&mut line).await? == 0 {
            break;
        }
        let header = line.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }
    let length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0; length];
    stream.read_exact(&mut body).await?;
    let request = RecordedRequest {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    };
    let reply = handler(&request);
    recorded.lock().unwrap().push(request);
    let reason = reqwest::StatusCode::from_u16(reply.status)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("Unknown");
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nContent-Type: application/xml\r\nConnection: close\r\n\r\n{}",
        reply.status,
        reason,
        reply.body.len(),
        reply.body
    );
    let mut stream = stream.into_inner();
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}
