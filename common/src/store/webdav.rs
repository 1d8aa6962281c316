//! WebDAV client side of the repository
//!
//! Every capability maps onto one or two HTTP requests: `PROPFIND` for stat and listing, `MKCOL`,
//! `DELETE`, `MOVE`, `COPY`, and plain `GET`/`PUT` for streaming. The `reqwest::Client` keeps its
//! own connection pool and is safe to share between workers, so no additional locking is needed at
//! this boundary.

use futures::TryStreamExt;
use reqwest::StatusCode;

use super::{
    ByteReader, CHUNK_SIZE, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE, Error, Metadata, Outcome,
    PathEntry, Result, Store,
};

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:resourcetype/>
    <d:getcontentlength/>
    <d:getlastmodified/>
  </d:prop>
</d:propfind>"#;

const DAV_NAMESPACE: &str = "DAV:";

fn method(name: &'static str) -> reqwest::Method {
    reqwest::Method::from_bytes(name.as_bytes()).expect("WebDAV method names are valid tokens")
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<hidden>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct WebDavStore {
    client: reqwest::Client,
    /// Always ends with a '/', repository paths are appended to it.
    base: url::Url,
    credentials: Option<Credentials>,
}

impl WebDavStore {
    pub fn new(
        base_url: &str,
        credentials: Option<Credentials>,
        connect_timeout: std::time::Duration,
    ) -> Result<Self> {
        let mut base = url::Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|source| Error::Request {
                method: "CONNECT".to_string(),
                path: std::path::PathBuf::from("/"),
                source,
            })?;
        Ok(Self {
            client,
            base,
            credentials,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &url::Url {
        &self.base
    }

    fn url(&self, path: &std::path::Path, collection: bool) -> Result<url::Url> {
        let mut url = self.base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| Error::Protocol {
                path: path.to_path_buf(),
                message: format!("{} cannot be used as a base url", self.base),
            })?;
            segments.pop_if_empty();
            for component in path.components() {
                if let std::path::Component::Normal(name) = component {
                    segments.push(&name.to_string_lossy());
                }
            }
            if collection {
                segments.push("");
            }
        }
        Ok(url)
    }

    /// Translates an `href` from a multistatus response back into a repository path.
    fn href_to_path(&self, href: &str) -> Option<std::path::PathBuf> {
        let url = self.base.join(href).ok()?;
        let path = percent_encoding::percent_decode_str(url.path())
            .decode_utf8()
            .ok()?;
        let base = percent_encoding::percent_decode_str(self.base.path())
            .decode_utf8()
            .ok()?;
        let relative = path.strip_prefix(base.trim_end_matches('/'))?;
        let relative = relative.trim_end_matches('/');
        if relative.is_empty() {
            Some(std::path::PathBuf::from("/"))
        } else if relative.starts_with('/') {
            Some(std::path::PathBuf::from(relative))
        } else {
            None
        }
    }

    fn request(&self, method: reqwest::Method, url: url::Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.credentials {
            Some(credentials) => {
                builder.basic_auth(&credentials.username, Some(&credentials.password))
            }
            None => builder,
        }
    }

    async fn send(
        &self,
        path: &std::path::Path,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let request = builder.build().map_err(|source| Error::Request {
            method: "build".to_string(),
            path: path.to_path_buf(),
            source,
        })?;
        let method = request.method().to_string();
        tracing::trace!("{} {}", &method, request.url());
        self.client
            .execute(request)
            .await
            .map_err(|source| Error::Request {
                method,
                path: path.to_path_buf(),
                source,
            })
    }

    async fn propfind(
        &self,
        path: &std::path::Path,
        depth: u8,
        collection: bool,
    ) -> Result<Vec<PathEntry>> {
        let builder = self
            .request(method("PROPFIND"), self.url(path, collection)?)
            .header("Depth", depth.to_string())
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/xml; charset=utf-8",
            )
            .body(PROPFIND_BODY);
        let response = self.send(path, builder).await?;
        let status = response.status();
        if status != StatusCode::MULTI_STATUS {
            return Err(status_error("PROPFIND", path, status));
        }
        let body = response.text().await.map_err(|source| Error::Request {
            method: "PROPFIND".to_string(),
            path: path.to_path_buf(),
            source,
        })?;
        let responses = parse_multistatus(&body).map_err(|message| Error::Protocol {
            path: path.to_path_buf(),
            message,
        })?;
        let mut entries = Vec::with_capacity(responses.len());
        for (href, metadata) in responses {
            match self.href_to_path(&href) {
                Some(entry_path) => entries.push(PathEntry::with_metadata(entry_path, metadata)),
                None => tracing::debug!("ignoring foreign href {:?} listing {:?}", &href, path),
            }
        }
        Ok(entries)
    }

    async fn transfer(
        &self,
        name: &'static str,
        src: &std::path::Path,
        dst: &std::path::Path,
        overwrite: bool,
    ) -> Result<Outcome> {
        let destination = self.url(dst, false)?;
        let builder = self
            .request(method(name), self.url(src, false)?)
            .header("Destination", destination.as_str())
            .header("Overwrite", if overwrite { "T" } else { "F" });
        let status = self.send(src, builder).await?.status();
        if status.is_success() {
            Ok(Outcome::Applied)
        } else if status == StatusCode::PRECONDITION_FAILED && !overwrite {
            tracing::debug!("{} {:?}: destination {:?} exists, skipping", name, src, dst);
            Ok(Outcome::Skipped)
        } else {
            Err(status_error(name, src, status))
        }
    }
}

fn status_error(method: &str, path: &std::path::Path, status: StatusCode) -> Error {
    if status == StatusCode::NOT_FOUND {
        Error::NotFound {
            path: path.to_path_buf(),
        }
    } else {
        Error::Http {
            method: method.to_string(),
            path: path.to_path_buf(),
            status,
        }
    }
}

fn is_dav(node: &roxmltree::Node, name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == name
        && node.tag_name().namespace() == Some(DAV_NAMESPACE)
}

fn dav_child<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    node.children().find(|child| is_dav(child, name))
}

fn dav_text<'a>(node: roxmltree::Node<'a, '_>, name: &str) -> Option<&'a str> {
    dav_child(node, name)
        .and_then(|child| child.text())
        .map(str::trim)
}

/// Extracts `(href, metadata)` pairs from a `207 Multi-Status` body. Only `200` propstats count.
fn parse_multistatus(body: &str) -> std::result::Result<Vec<(String, Metadata)>, String> {
    let doc = roxmltree::Document::parse(body).map_err(|err| err.to_string())?;
    let mut entries = Vec::new();
    for response in doc.descendants().filter(|node| is_dav(node, "response")) {
        let Some(href) = dav_text(response, "href") else {
            continue;
        };
        let mut is_dir = false;
        let mut size = 0;
        let mut modified = None;
        for propstat in response
            .children()
            .filter(|node| is_dav(node, "propstat"))
        {
            let ok = dav_text(propstat, "status").is_none_or(|status| status.contains(" 200"));
            if !ok {
                continue;
            }
            let Some(prop) = dav_child(propstat, "prop") else {
                continue;
            };
            if let Some(resourcetype) = dav_child(prop, "resourcetype") {
                is_dir = dav_child(resourcetype, "collection").is_some();
            }
            if let Some(length) = dav_text(prop, "getcontentlength") {
                size = length.parse().unwrap_or(0);
            }
            if let Some(lastmodified) = dav_text(prop, "getlastmodified") {
                modified = chrono::DateTime::parse_from_rfc2822(lastmodified)
                    .ok()
                    .map(std::time::SystemTime::from);
            }
        }
        let metadata = Metadata {
            size: if is_dir { 0 } else { size },
            is_dir,
            mode: if is_dir {
                DEFAULT_DIR_MODE
            } else {
                DEFAULT_FILE_MODE
            },
            modified,
        };
        entries.push((href.to_string(), metadata));
    }
    Ok(entries)
}

#[async_trait::async_trait]
impl Store for WebDavStore {
    fn name(&self) -> &'static str {
        "webdav"
    }

    async fn stat(&self, path: &std::path::Path) -> Result<PathEntry> {
        let entries = self.propfind(path, 0, false).await?;
        let mut fallback = None;
        for entry in entries {
            if entry.path == path {
                return Ok(entry);
            }
            fallback.get_or_insert(entry);
        }
        // some servers answer with a canonicalized href, the single response is still ours
        match fallback {
            Some(entry) => Ok(PathEntry {
                path: path.to_path_buf(),
                metadata: entry.metadata,
            }),
            None => Err(Error::Protocol {
                path: path.to_path_buf(),
                message: "empty multistatus response".to_string(),
            }),
        }
    }

    async fn read_dir(&self, path: &std::path::Path) -> Result<Vec<PathEntry>> {
        let entries = self.propfind(path, 1, true).await?;
        let mut listing = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.path == path {
                if !entry.is_dir() {
                    return Err(Error::NotADirectory {
                        path: path.to_path_buf(),
                    });
                }
                continue;
            }
            listing.push(entry);
        }
        Ok(listing)
    }

    async fn mkdir(&self, path: &std::path::Path, _mode: u32) -> Result<()> {
        let builder = self.request(method("MKCOL"), self.url(path, true)?);
        let status = self.send(path, builder).await?.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::METHOD_NOT_ALLOWED {
            // MKCOL on an existing resource
            return if self.stat(path).await?.is_dir() {
                Ok(())
            } else {
                Err(Error::NotADirectory {
                    path: path.to_path_buf(),
                })
            };
        }
        Err(status_error("MKCOL", path, status))
    }

    async fn mkdir_all(&self, path: &std::path::Path, mode: u32) -> Result<()> {
        match self.mkdir(path, mode).await {
            Err(Error::Http { status, .. }) if status == StatusCode::CONFLICT => {}
            other => return other,
        }
        // a parent is missing, create the chain from the top
        let mut ancestors: Vec<&std::path::Path> = path
            .ancestors()
            .filter(|ancestor| ancestor.parent().is_some())
            .collect();
        ancestors.reverse();
        for dir in ancestors {
            self.mkdir(dir, mode).await?;
        }
        Ok(())
    }

    async fn remove(&self, path: &std::path::Path) -> Result<()> {
        let entry = self.stat(path).await?;
        // DELETE on a collection is recursive in WebDAV
        if entry.is_dir() && !self.read_dir(path).await?.is_empty() {
            return Err(Error::DirectoryNotEmpty {
                path: path.to_path_buf(),
            });
        }
        let builder = self.request(reqwest::Method::DELETE, self.url(path, entry.is_dir())?);
        let status = self.send(path, builder).await?.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(status_error("DELETE", path, status))
        }
    }

    async fn rename(
        &self,
        src: &std::path::Path,
        dst: &std::path::Path,
        overwrite: bool,
    ) -> Result<Outcome> {
        self.transfer("MOVE", src, dst, overwrite).await
    }

    async fn copy(
        &self,
        src: &std::path::Path,
        dst: &std::path::Path,
        overwrite: bool,
    ) -> Result<Outcome> {
        self.transfer("COPY", src, dst, overwrite).await
    }

    async fn read_stream(&self, path: &std::path::Path) -> Result<ByteReader> {
        let builder = self.request(reqwest::Method::GET, self.url(path, false)?);
        let response = self.send(path, builder).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error("GET", path, status));
        }
        let stream = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::pin(tokio_util::io::StreamReader::new(stream)))
    }

    async fn write_stream(
        &self,
        path: &std::path::Path,
        data: ByteReader,
        _mode: u32,
    ) -> Result<()> {
        let body =
            reqwest::Body::wrap_stream(tokio_util::io::ReaderStream::with_capacity(data, CHUNK_SIZE));
        let builder = self
            .request(reqwest::Method::PUT, self.url(path, false)?)
            .body(body);
        let status = self.send(path, builder).await?.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(status_error("PUT", path, status))
        }
    }
}
