//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueEnum, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{CacheConfig, InvalidationKind};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "storefront-cache";
const ENV_PREFIX: &str = "STOREFRONT";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_STORE_HOST: &str = "127.0.0.1";
const DEFAULT_STORE_PORT: u16 = 6379;
const DEFAULT_STORE_KEY_PREFIX: &str = "storefront:";
const DEFAULT_ORIGIN_TIMEOUT_SECS: u64 = 10;

/// Command-line arguments for the storefront cache binary.
#[derive(Debug, Parser)]
#[command(
    name = "storefront-cache",
    version,
    about = "Caching layer and cache admin API for the storefront"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "STOREFRONT_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the cache admin HTTP service.
    Serve(Box<ServeArgs>),
    /// Print cache statistics as JSON.
    Stats(StoreArgs),
    /// Invalidate cache entries by tag, key, pattern or everything.
    Invalidate(InvalidateArgs),
    /// Clear the whole store and reset cache statistics.
    Flush(StoreArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StoreOverrides {
    /// Override the store backend.
    #[arg(long = "store-backend", value_name = "BACKEND", value_enum)]
    pub store_backend: Option<StoreBackend>,

    /// Override the store host.
    #[arg(long = "store-host", value_name = "HOST")]
    pub store_host: Option<String>,

    /// Override the store port.
    #[arg(long = "store-port", value_name = "PORT")]
    pub store_port: Option<u16>,

    /// Override the store database index.
    #[arg(long = "store-db", value_name = "INDEX")]
    pub store_db: Option<u32>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub store: StoreOverrides,

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

    /// Override the default entry TTL.
    #[arg(long = "cache-default-ttl-seconds", value_name = "SECONDS")]
    pub cache_default_ttl_seconds: Option<u64>,

    /// Override the default warmup batch size.
    #[arg(long = "cache-warmup-concurrency", value_name = "COUNT")]
    pub cache_warmup_concurrency: Option<u64>,

    /// Override the origin base URL used for warmup.
    #[arg(long = "origin-base-url", value_name = "URL")]
    pub origin_base_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StoreArgs {
    #[command(flatten)]
    pub store: StoreOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct InvalidateArgs {
    #[command(flatten)]
    pub store: StoreOverrides,

    /// What to invalidate.
    #[arg(value_name = "TYPE", value_enum)]
    pub kind: InvalidateKindArg,

    /// Tag, key or glob pattern; ignored for `all`.
    #[arg(value_name = "TARGET")]
    pub target: Option<String>,

    /// Additional tags to invalidate.
    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,

    /// Additional keys to invalidate.
    #[arg(long = "key", value_name = "KEY")]
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InvalidateKindArg {
    Tag,
    Key,
    Pattern,
    All,
}

impl From<InvalidateKindArg> for InvalidationKind {
    fn from(kind: InvalidateKindArg) -> Self {
        match kind {
            InvalidateKindArg::Tag => Self::Tag,
            InvalidateKindArg::Key => Self::Key,
            InvalidateKindArg::Pattern => Self::Pattern,
            InvalidateKindArg::All => Self::All,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub store: StoreSettings,
    pub cache: CacheSettings,
    pub admin: AdminSettings,
    pub origin: OriginSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
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

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

impl StoreBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
        }
    }
}

#[derive(Clone)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: u32,
    /// Prepended to every physical key; isolates tenants sharing one server.
    pub key_prefix: String,
}

impl std::fmt::Debug for StoreSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSettings")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("db", &self.db)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub default_ttl: Duration,
    pub tag_ttl_extension: Duration,
    pub compress_threshold: usize,
    pub lock_ttl: Duration,
    pub lock_retry_min_ms: u64,
    pub lock_retry_max_ms: u64,
    pub lock_max_attempts: NonZeroU32,
    pub pattern_batch_size: NonZeroUsize,
    pub write_behind_flush: Duration,
    pub l1_capacity: NonZeroUsize,
    pub l1_ttl: Duration,
    pub warmup_concurrency: NonZeroUsize,
}

#[derive(Clone, Default)]
pub struct AdminSettings {
    /// Bearer secret for the admin endpoints. Unset disables them.
    pub token: Option<String>,
}

impl std::fmt::Debug for AdminSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminSettings")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct OriginSettings {
    pub base_url: Option<String>,
    pub timeout: Duration,
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

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Stats(args)) | Some(Command::Flush(args)) => {
            raw.apply_store_overrides(&args.store)
        }
        Some(Command::Invalidate(args)) => raw.apply_store_overrides(&args.store),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    store: RawStoreSettings,
    cache: RawCacheSettings,
    admin: RawAdminSettings,
    origin: RawOriginSettings,
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
        if let Some(ttl) = overrides.cache_default_ttl_seconds {
            self.cache.default_ttl_seconds = Some(ttl);
        }
        if let Some(concurrency) = overrides.cache_warmup_concurrency {
            self.cache.warmup_concurrency = Some(concurrency);
        }
        if let Some(url) = overrides.origin_base_url.as_ref() {
            self.origin.base_url = Some(url.clone());
        }

        self.apply_store_overrides(&overrides.store);
    }

    fn apply_store_overrides(&mut self, overrides: &StoreOverrides) {
        if let Some(backend) = overrides.store_backend {
            self.store.backend = Some(backend);
        }
        if let Some(host) = overrides.store_host.as_ref() {
            self.store.host = Some(host.clone());
        }
        if let Some(port) = overrides.store_port {
            self.store.port = Some(port);
        }
        if let Some(db) = overrides.store_db {
            self.store.db = Some(db);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            store,
            cache,
            admin,
            origin,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let store = build_store_settings(store)?;
        let cache = build_cache_settings(cache)?;
        let admin = build_admin_settings(admin);
        let origin = build_origin_settings(origin)?;

        Ok(Self {
            server,
            logging,
            store,
            cache,
            admin,
            origin,
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

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

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
        addr,
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

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let host = non_blank(store.host).unwrap_or_else(|| DEFAULT_STORE_HOST.to_string());

    let port = store.port.unwrap_or(DEFAULT_STORE_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "store.port",
            "port must be greater than zero",
        ));
    }

    let key_prefix = store
        .key_prefix
        .unwrap_or_else(|| DEFAULT_STORE_KEY_PREFIX.to_string());
    if key_prefix.chars().any(char::is_whitespace) {
        return Err(LoadError::invalid(
            "store.key_prefix",
            "must not contain whitespace",
        ));
    }

    Ok(StoreSettings {
        backend: store.backend.unwrap_or_default(),
        host,
        port,
        password: non_blank(store.password),
        db: store.db.unwrap_or(0),
        key_prefix,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let defaults = CacheConfig::default();

    let default_ttl_seconds = cache
        .default_ttl_seconds
        .unwrap_or(defaults.default_ttl_seconds);
    if default_ttl_seconds == 0 {
        return Err(LoadError::invalid(
            "cache.default_ttl_seconds",
            "must be greater than zero",
        ));
    }

    let lock_ttl_seconds = cache.lock_ttl_seconds.unwrap_or(defaults.lock_ttl_seconds);
    if lock_ttl_seconds == 0 {
        return Err(LoadError::invalid(
            "cache.lock_ttl_seconds",
            "must be greater than zero",
        ));
    }

    let lock_retry_min_ms = cache.lock_retry_min_ms.unwrap_or(defaults.lock_retry_min_ms);
    let lock_retry_max_ms = cache.lock_retry_max_ms.unwrap_or(defaults.lock_retry_max_ms);
    if lock_retry_min_ms > lock_retry_max_ms {
        return Err(LoadError::invalid(
            "cache.lock_retry_min_ms",
            format!("must not exceed lock_retry_max_ms ({lock_retry_max_ms})"),
        ));
    }

    let write_behind_flush_ms = cache
        .write_behind_flush_ms
        .unwrap_or(defaults.write_behind_flush_ms);
    if write_behind_flush_ms == 0 {
        return Err(LoadError::invalid(
            "cache.write_behind_flush_ms",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        default_ttl: Duration::from_secs(default_ttl_seconds),
        tag_ttl_extension: Duration::from_secs(
            cache
                .tag_ttl_extension_seconds
                .unwrap_or(defaults.tag_ttl_extension_seconds),
        ),
        compress_threshold: cache
            .compress_threshold
            .unwrap_or(defaults.compress_threshold),
        lock_ttl: Duration::from_secs(lock_ttl_seconds),
        lock_retry_min_ms,
        lock_retry_max_ms,
        lock_max_attempts: non_zero_u32(
            cache
                .lock_max_attempts
                .unwrap_or(defaults.lock_max_attempts.into()),
            "cache.lock_max_attempts",
        )?,
        pattern_batch_size: non_zero_usize(
            cache
                .pattern_batch_size
                .unwrap_or(defaults.pattern_batch_size as u64),
            "cache.pattern_batch_size",
        )?,
        write_behind_flush: Duration::from_millis(write_behind_flush_ms),
        l1_capacity: non_zero_usize(
            cache.l1_capacity.unwrap_or(defaults.l1_capacity as u64),
            "cache.l1_capacity",
        )?,
        l1_ttl: Duration::from_secs(cache.l1_ttl_seconds.unwrap_or(defaults.l1_ttl_seconds)),
        warmup_concurrency: non_zero_usize(
            cache
                .warmup_concurrency
                .unwrap_or(defaults.warmup_concurrency as u64),
            "cache.warmup_concurrency",
        )?,
    })
}

fn build_admin_settings(admin: RawAdminSettings) -> AdminSettings {
    AdminSettings {
        token: non_blank(admin.token),
    }
}

fn build_origin_settings(origin: RawOriginSettings) -> Result<OriginSettings, LoadError> {
    let timeout_secs = origin.timeout_seconds.unwrap_or(DEFAULT_ORIGIN_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "origin.timeout_seconds",
            "must be greater than zero",
        ));
    }

    let base_url = non_blank(origin.base_url);
    if let Some(url) = base_url.as_deref() {
        url::Url::parse(url)
            .map_err(|err| LoadError::invalid("origin.base_url", format!("{url}: {err}")))?;
    }

    Ok(OriginSettings {
        base_url,
        timeout: Duration::from_secs(timeout_secs),
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
struct RawStoreSettings {
    backend: Option<StoreBackend>,
    host: Option<String>,
    port: Option<u16>,
    password: Option<String>,
    db: Option<u32>,
    key_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    default_ttl_seconds: Option<u64>,
    tag_ttl_extension_seconds: Option<u64>,
    compress_threshold: Option<usize>,
    lock_ttl_seconds: Option<u64>,
    lock_retry_min_ms: Option<u64>,
    lock_retry_max_ms: Option<u64>,
    lock_max_attempts: Option<u64>,
    pattern_batch_size: Option<u64>,
    write_behind_flush_ms: Option<u64>,
    l1_capacity: Option<u64>,
    l1_ttl_seconds: Option<u64>,
    warmup_concurrency: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAdminSettings {
    token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOriginSettings {
    base_url: Option<String>,
    timeout_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
