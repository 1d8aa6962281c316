//! Configuration types for runtime, output and repository access

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print the summary line at the end
    pub print_summary: bool,
}

/// Tracing configuration for debugging
#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    /// Debug log file path, receives everything at TRACE level
    pub debug_log_file: Option<String>,
}

/// Connection to the WebDAV repository
#[derive(Clone)]
pub struct RemoteConfig {
    /// Base URL of the repository, e.g. `https://webdav.data.example.org/`
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout: std::time::Duration,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<hidden>"))
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl RemoteConfig {
    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), String> {
        let url = url::Url::parse(&self.url)
            .map_err(|error| format!("invalid repository url {:?}: {}", self.url, error))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!(
                "repository url must use http or https, got {:?}",
                url.scheme()
            ));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err("a password requires a username".to_string());
        }
        if self.connect_timeout.is_zero() {
            return Err("connect timeout must be greater than zero".to_string());
        }
        Ok(())
    }

    #[must_use]
    pub fn credentials(&self) -> Option<crate::store::Credentials> {
        self.username
            .as_ref()
            .map(|username| crate::store::Credentials {
                username: username.clone(),
                password: self.password.clone().unwrap_or_default(),
            })
    }

    /// Validates the configuration and creates the repository client.
    pub fn connect(&self) -> anyhow::Result<crate::store::WebDavStore> {
        use anyhow::Context;
        self.validate().map_err(anyhow::Error::msg)?;
        crate::store::WebDavStore::new(&self.url, self.credentials(), self.connect_timeout)
            .with_context(|| format!("cannot set up client for {}", self.url))
    }
}
