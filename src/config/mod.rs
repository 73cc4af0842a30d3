//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU64, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pagelens";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_POOL_SIZE: usize = 3;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 60;
const DEFAULT_JOB_TTL_SECS: u64 = 3600;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_ARTIFACT_DIR: &str = "artifacts";
const DEFAULT_MAX_BODY_BYTES: u64 = 50 * 1024 * 1024;

/// Command-line arguments for the Pagelens binary.
#[derive(Debug, Parser)]
#[command(name = "pagelens", version, about = "HTML and URL to image rendering server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PAGELENS_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the Pagelens HTTP service.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the browser executable path.
    #[arg(long = "browser-executable", value_name = "PATH")]
    pub browser_executable: Option<PathBuf>,

    /// Toggle the Chromium sandbox.
    #[arg(
        long = "browser-sandbox",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub browser_sandbox: Option<bool>,

    /// Override the number of concurrent render slots.
    #[arg(long = "browser-pool-size", value_name = "COUNT")]
    pub browser_pool_size: Option<usize>,

    /// Override how long a request waits for a free render slot.
    #[arg(long = "browser-acquire-timeout-seconds", value_name = "SECONDS")]
    pub browser_acquire_timeout_seconds: Option<u64>,

    /// Override the per-render hard deadline.
    #[arg(long = "browser-render-timeout-seconds", value_name = "SECONDS")]
    pub browser_render_timeout_seconds: Option<u64>,

    /// Override how long finished job records are retained.
    #[arg(long = "jobs-ttl-seconds", value_name = "SECONDS")]
    pub jobs_ttl_seconds: Option<u64>,

    /// Override the cadence of the expired-record sweeper.
    #[arg(long = "jobs-sweep-interval-seconds", value_name = "SECONDS")]
    pub jobs_sweep_interval_seconds: Option<u64>,

    /// Override the artifact storage directory.
    #[arg(long = "artifacts-directory", value_name = "PATH")]
    pub artifacts_directory: Option<PathBuf>,

    /// Override the maximum request body size in bytes.
    #[arg(long = "http-max-body-bytes", value_name = "BYTES")]
    pub http_max_body_bytes: Option<u64>,

    /// Toggle exposing internal error details in API responses.
    #[arg(
        long = "http-expose-internal-errors",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub http_expose_internal_errors: Option<bool>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub browser: BrowserSettings,
    pub jobs: JobsSettings,
    pub artifacts: ArtifactSettings,
    pub http: HttpSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind_addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub executable: Option<PathBuf>,
    pub sandbox: bool,
    pub pool_size: NonZeroUsize,
    pub acquire_timeout: Duration,
    pub render_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ArtifactSettings {
    pub directory: PathBuf,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub max_body_bytes: NonZeroU64,
    pub expose_internal_errors: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("PAGELENS").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    browser: RawBrowserSettings,
    jobs: RawJobsSettings,
    artifacts: RawArtifactSettings,
    http: RawHttpSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(path) = overrides.browser_executable.as_ref() {
            self.browser.executable = Some(path.clone());
        }
        if let Some(sandbox) = overrides.browser_sandbox {
            self.browser.sandbox = Some(sandbox);
        }
        if let Some(size) = overrides.browser_pool_size {
            self.browser.pool_size = Some(size);
        }
        if let Some(seconds) = overrides.browser_acquire_timeout_seconds {
            self.browser.acquire_timeout_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.browser_render_timeout_seconds {
            self.browser.render_timeout_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.jobs_ttl_seconds {
            self.jobs.ttl_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.jobs_sweep_interval_seconds {
            self.jobs.sweep_interval_seconds = Some(seconds);
        }
        if let Some(directory) = overrides.artifacts_directory.as_ref() {
            self.artifacts.directory = Some(directory.clone());
        }
        if let Some(bytes) = overrides.http_max_body_bytes {
            self.http.max_body_bytes = Some(bytes);
        }
        if let Some(expose) = overrides.http_expose_internal_errors {
            self.http.expose_internal_errors = Some(expose);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            browser,
            jobs,
            artifacts,
            http,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let browser = build_browser_settings(browser)?;
        let jobs = build_jobs_settings(jobs)?;
        let artifacts = build_artifact_settings(artifacts)?;
        let http = build_http_settings(http)?;

        Ok(Self {
            server,
            logging,
            browser,
            jobs,
            artifacts,
            http,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let bind_addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.bind_addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        bind_addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_browser_settings(browser: RawBrowserSettings) -> Result<BrowserSettings, LoadError> {
    let executable = match browser.executable {
        Some(path) if path.as_os_str().is_empty() => {
            return Err(LoadError::invalid(
                "browser.executable",
                "path must not be empty",
            ));
        }
        other => other,
    };

    let pool_size_value = browser.pool_size.unwrap_or(DEFAULT_POOL_SIZE);
    let pool_size = NonZeroUsize::new(pool_size_value)
        .ok_or_else(|| LoadError::invalid("browser.pool_size", "must be greater than zero"))?;

    let acquire_secs = browser
        .acquire_timeout_seconds
        .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS);
    if acquire_secs == 0 {
        return Err(LoadError::invalid(
            "browser.acquire_timeout_seconds",
            "must be greater than zero",
        ));
    }

    let render_secs = browser
        .render_timeout_seconds
        .unwrap_or(DEFAULT_RENDER_TIMEOUT_SECS);
    if render_secs == 0 {
        return Err(LoadError::invalid(
            "browser.render_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(BrowserSettings {
        executable,
        sandbox: browser.sandbox.unwrap_or(true),
        pool_size,
        acquire_timeout: Duration::from_secs(acquire_secs),
        render_timeout: Duration::from_secs(render_secs),
    })
}

fn build_jobs_settings(jobs: RawJobsSettings) -> Result<JobsSettings, LoadError> {
    let ttl_secs = jobs.ttl_seconds.unwrap_or(DEFAULT_JOB_TTL_SECS);
    if ttl_secs == 0 {
        return Err(LoadError::invalid(
            "jobs.ttl_seconds",
            "must be greater than zero",
        ));
    }

    let sweep_secs = jobs
        .sweep_interval_seconds
        .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);
    if sweep_secs == 0 {
        return Err(LoadError::invalid(
            "jobs.sweep_interval_seconds",
            "must be greater than zero",
        ));
    }

    Ok(JobsSettings {
        ttl: Duration::from_secs(ttl_secs),
        sweep_interval: Duration::from_secs(sweep_secs),
    })
}

fn build_artifact_settings(artifacts: RawArtifactSettings) -> Result<ArtifactSettings, LoadError> {
    let directory = artifacts
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACT_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "artifacts.directory",
            "path must not be empty",
        ));
    }

    Ok(ArtifactSettings { directory })
}

fn build_http_settings(http: RawHttpSettings) -> Result<HttpSettings, LoadError> {
    let max_body_value = http.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES);
    let max_body_bytes = NonZeroU64::new(max_body_value)
        .ok_or_else(|| LoadError::invalid("http.max_body_bytes", "must be greater than zero"))?;
    usize::try_from(max_body_value).map_err(|_| {
        LoadError::invalid(
            "http.max_body_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(HttpSettings {
        max_body_bytes,
        expose_internal_errors: http.expose_internal_errors.unwrap_or(false),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBrowserSettings {
    executable: Option<PathBuf>,
    sandbox: Option<bool>,
    pool_size: Option<usize>,
    acquire_timeout_seconds: Option<u64>,
    render_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawJobsSettings {
    ttl_seconds: Option<u64>,
    sweep_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawArtifactSettings {
    directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHttpSettings {
    max_body_bytes: Option<u64>,
    expose_internal_errors: Option<bool>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
