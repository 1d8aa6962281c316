use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use common::engine::{self, Operation};
use common::store::Store;
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "repocli",
    version,
    about = "Transfer file trees between the local filesystem and a WebDAV data repository",
    long_about = "`repocli` walks a directory tree and moves its files to, from or within a WebDAV \
data repository using a pool of concurrent workers.

EXAMPLE:
    # Upload a directory into the repository collection /project/raw
    repocli --url https://webdav.data.example.org put ./session01 /project/raw

    # Download the content of a collection into the current directory
    repocli --url https://webdav.data.example.org get /project/raw/session01/ .

Existing destination files are skipped unless -f/--overwrite is given."
)]
struct Args {
    // Repository
    /// Base URL of the WebDAV repository
    #[arg(
        short = 'u',
        long,
        env = "REPOCLI_URL",
        global = true,
        value_name = "URL",
        help_heading = "Repository"
    )]
    url: Option<String>,

    /// Username for basic authentication
    #[arg(
        long,
        env = "REPOCLI_USERNAME",
        global = true,
        value_name = "NAME",
        help_heading = "Repository"
    )]
    username: Option<String>,

    /// Password for basic authentication
    #[arg(
        long,
        env = "REPOCLI_PASSWORD",
        hide_env_values = true,
        global = true,
        value_name = "PASSWORD",
        help_heading = "Repository"
    )]
    password: Option<String>,

    /// Timeout for establishing a connection to the repository
    ///
    /// This option accepts a human readable duration, e.g. "500ms", "30s", "1min" etc.
    #[arg(
        long,
        default_value = "30s",
        global = true,
        value_name = "DURATION",
        help_heading = "Repository"
    )]
    connect_timeout: String,

    /// Repository directory that relative repository paths are resolved against
    #[arg(
        short = 'C',
        long,
        default_value = "/",
        global = true,
        value_name = "DIR",
        help_heading = "Repository"
    )]
    remote_dir: String,

    // Transfer options
    /// Number of concurrent transfer workers
    #[arg(
        short = 'n',
        long,
        default_value = "4",
        global = true,
        value_name = "N",
        help_heading = "Transfer options"
    )]
    nthreads: usize,

    /// Number of discovered files that may wait for a worker
    #[arg(
        long,
        default_value = "16",
        global = true,
        value_name = "N",
        help_heading = "Transfer options"
    )]
    queue_depth: usize,

    // Progress & output
    /// Silent mode, no progress and no summary
    #[arg(short = 's', long, global = true, help_heading = "Progress & output")]
    silent: bool,

    /// Toggles the type of progress to show
    ///
    /// Options are: `ProgressBar` (animated progress bar), `TextUpdates` (appropriate for logging), Auto (default, will
    /// choose between `ProgressBar` or `TextUpdates` depending on the type of terminal attached to stderr)
    #[arg(
        long,
        value_name = "TYPE",
        global = true,
        help_heading = "Progress & output"
    )]
    progress_type: Option<common::ProgressType>,

    /// Sets the delay between progress updates
    ///
    /// - For the interactive (--progress-type=ProgressBar), the default is 65ms.
    /// - For the non-interactive (--progress-type=TextUpdates), the default is 10s.
    ///
    /// This option accepts a human readable duration, e.g. "200ms", "10s", "5min" etc.
    #[arg(
        long,
        value_name = "DELAY",
        global = true,
        help_heading = "Progress & output"
    )]
    progress_delay: Option<String>,

    /// Verbose level: -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true, help_heading = "Progress & output")]
    verbose: u8,

    /// Quiet mode, don't report errors
    #[arg(
        short = 'q',
        long = "quiet",
        global = true,
        help_heading = "Progress & output"
    )]
    quiet: bool,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        global = true,
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(
        long,
        default_value = "0",
        global = true,
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,

    /// Append a TRACE level log of this run to the given file
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help_heading = "Advanced settings"
    )]
    debug_log_file: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// List a repository file or the content of a repository directory
    ///
    /// If the path does not exist and its last component contains `*`, `?` or `[`, the entries of
    /// the parent directory matching that pattern are listed.
    Ls {
        /// Long format: mode, size, modification time and path
        #[arg(short = 'l', long)]
        long: bool,
        /// Repository path, the working directory if omitted
        path: Option<String>,
    },
    /// Create a repository directory and its missing parents
    Mkdir {
        /// Repository path
        path: String,
    },
    /// Upload a local file or directory tree into the repository
    ///
    /// A trailing `/` on a source directory uploads its content instead of the directory itself.
    Put {
        /// Overwrite existing destination files
        #[arg(short = 'f', long)]
        overwrite: bool,
        /// Append per-file failures to this file instead of stderr
        #[arg(short = 'e', long = "error", value_name = "FILE")]
        error_file: Option<std::path::PathBuf>,
        /// Local source path
        source: String,
        /// Repository destination path
        destination: String,
    },
    /// Download a repository file or directory tree to the local filesystem
    ///
    /// A trailing `/` on a source directory downloads its content instead of the directory itself.
    Get {
        /// Overwrite existing destination files
        #[arg(short = 'f', long)]
        overwrite: bool,
        /// Append per-file failures to this file instead of stderr
        #[arg(short = 'e', long = "error", value_name = "FILE")]
        error_file: Option<std::path::PathBuf>,
        /// Repository source path
        source: String,
        /// Local destination path
        destination: String,
    },
    /// Copy within the repository
    Cp {
        /// Overwrite existing destination files
        #[arg(short = 'f', long)]
        overwrite: bool,
        source: String,
        destination: String,
    },
    /// Move within the repository
    ///
    /// The source directory is removed only when every file was moved.
    Mv {
        /// Overwrite existing destination files
        #[arg(short = 'f', long)]
        overwrite: bool,
        source: String,
        destination: String,
    },
    /// Remove a repository file or directory
    Rm {
        /// Remove directories and their content
        #[arg(short = 'r', long)]
        recursive: bool,
        /// Repository path
        path: String,
    },
}

/// What a bulk command asks the engine to do.
struct Job<'a> {
    operation: Operation,
    source: &'a str,
    destination: Option<&'a str>,
    overwrite: bool,
    recursive: bool,
    error_file: Option<&'a std::path::Path>,
}

impl Command {
    fn job(&self) -> Option<Job<'_>> {
        let job = match self {
            Command::Ls { .. } | Command::Mkdir { .. } => return None,
            Command::Put {
                overwrite,
                error_file,
                source,
                destination,
            } => Job {
                operation: Operation::Put,
                source,
                destination: Some(destination.as_str()),
                overwrite: *overwrite,
                recursive: true,
                error_file: error_file.as_deref(),
            },
            Command::Get {
                overwrite,
                error_file,
                source,
                destination,
            } => Job {
                operation: Operation::Get,
                source,
                destination: Some(destination.as_str()),
                overwrite: *overwrite,
                recursive: true,
                error_file: error_file.as_deref(),
            },
            Command::Cp {
                overwrite,
                source,
                destination,
            } => Job {
                operation: Operation::Copy,
                source,
                destination: Some(destination.as_str()),
                overwrite: *overwrite,
                recursive: true,
                error_file: None,
            },
            Command::Mv {
                overwrite,
                source,
                destination,
            } => Job {
                operation: Operation::Move,
                source,
                destination: Some(destination.as_str()),
                overwrite: *overwrite,
                recursive: true,
                error_file: None,
            },
            Command::Rm { recursive, path } => Job {
                operation: Operation::Remove,
                source: path,
                destination: None,
                overwrite: false,
                recursive: *recursive,
                error_file: None,
            },
        };
        Some(job)
    }
}

impl Args {
    fn remote(&self) -> Result<common::RemoteConfig> {
        let url = self
            .url
            .clone()
            .ok_or_else(|| anyhow!("no repository url given, use --url or REPOCLI_URL"))?;
        let connect_timeout = humantime::parse_duration(&self.connect_timeout)
            .with_context(|| format!("invalid connect timeout {:?}", self.connect_timeout))?;
        Ok(common::RemoteConfig {
            url,
            username: self.username.clone(),
            password: self.password.clone(),
            connect_timeout,
        })
    }

    fn progress(&self) -> Option<common::ProgressSettings> {
        if self.silent {
            return None;
        }
        Some(common::ProgressSettings {
            progress_type: self.progress_type.unwrap_or_default(),
            progress_delay: self.progress_delay.clone(),
        })
    }
}

async fn list(
    store: &common::store::WebDavStore,
    dirs: &common::path::WorkingDirs,
    long: bool,
    path: Option<&str>,
) -> Result<()> {
    let path = dirs.resolve_remote(path.unwrap_or("."));
    for entry in common::listing::list(store, &path.path).await? {
        println!("{}", common::listing::format_entry(&entry, long));
    }
    Ok(())
}

async fn transfer(
    args: &Args,
    job: Job<'_>,
    store: common::store::WebDavStore,
    dirs: &common::path::WorkingDirs,
) -> Result<engine::Summary> {
    let settings = engine::Settings {
        workers: args.nthreads,
        queue_depth: args.queue_depth,
        overwrite: job.overwrite,
        recursive: job.recursive,
    };
    settings.validate().map_err(anyhow::Error::msg)?;
    let errors = match job.error_file {
        Some(path) => common::errlog::ErrorSink::append_to(path).await?,
        None => common::errlog::ErrorSink::stderr(),
    };
    let cancel = tokio_util::sync::CancellationToken::new();
    let _listener = common::cancel::SignalListener::spawn(cancel.clone())?;
    let engine = engine::Engine::new(
        std::sync::Arc::new(common::store::LocalStore::new()),
        std::sync::Arc::new(store),
        settings,
        std::sync::Arc::new(errors),
        cancel,
    )
    .with_progress(args.progress());
    let source = match job.operation {
        Operation::Put => dirs.resolve_local(job.source),
        _ => dirs.resolve_remote(job.source),
    };
    let destination = job.destination.map(|destination| match job.operation {
        Operation::Get => dirs.resolve_local(destination),
        _ => dirs.resolve_remote(destination),
    });
    let outcome = match engine
        .resolve(job.operation, &source, destination.as_ref())
        .await
    {
        Ok(paths) => engine.run(job.operation, &paths).await,
        Err(error) => Err(error),
    };
    outcome.map_err(|error| {
        tracing::debug!("{} failed: {:?}", job.operation, &error);
        if args.silent {
            anyhow!("{}", error)
        } else {
            anyhow!("{}\n\n{}", error, &error.summary)
        }
    })
}

#[instrument(skip(args), fields(command = ?args.command))]
async fn async_main(args: Args) -> Result<engine::Summary> {
    let store = args.remote()?.connect()?;
    let dirs = common::path::WorkingDirs::current(&args.remote_dir)?;
    tracing::debug!(
        "working directories: local {:?}, repository {:?} at {}",
        dirs.local(),
        dirs.remote(),
        store.base_url()
    );
    match &args.command {
        Command::Ls { long, path } => {
            list(&store, &dirs, *long, path.as_deref()).await?;
            Ok(engine::Summary::default())
        }
        Command::Mkdir { path } => {
            let path = dirs.resolve_remote(path);
            store
                .mkdir_all(&path.path, common::store::DEFAULT_DIR_MODE)
                .await
                .with_context(|| format!("cannot create directory {:?}", &path.path))?;
            Ok(engine::Summary::default())
        }
        command => match command.job() {
            Some(job) => transfer(&args, job, store, &dirs).await,
            None => Err(anyhow!("{:?} is not a transfer", command)),
        },
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.command.job().is_some() && !args.silent,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let tracing = common::TracingConfig {
        debug_log_file: args.debug_log_file.clone(),
    };
    let res = common::run(output, runtime, tracing, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
