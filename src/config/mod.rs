//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{NamespaceConfig, default_namespaces};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "newsdesk";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 16;
const DEFAULT_DB_ACQUIRE_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_DB_STATEMENT_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_REDIS_POOL_SIZE: u32 = 16;
const DEFAULT_REDIS_TIMEOUT_MS: u64 = 250;
const DEFAULT_LOCAL_TTL_SECS: u64 = 5;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;
const DEFAULT_ORIGIN_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_LOCK_TTL_SECS: u64 = 300;
const DEFAULT_MUTATION_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_REPLAY_POLL_ATTEMPTS: u32 = 10;
const DEFAULT_REPLAY_POLL_INTERVAL_MS: u64 = 25;
const DEFAULT_WARM_WINDOW_HOURS: u32 = 24;
const DEFAULT_WARM_BATCH_LIMIT: u32 = 50;
const DEFAULT_WARM_CONCURRENCY: usize = 4;
const DEFAULT_WARM_INTERVAL_SECS: u64 = 600;
const DEFAULT_PAGE_SIZE: u32 = 20;
const DEFAULT_RELATED_LIMIT: u32 = 6;

/// Command-line arguments for the newsdesk binary.
#[derive(Debug, Parser)]
#[command(name = "newsdesk", version, about = "Newsdesk content cache service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "NEWSDESK_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service with its background maintenance tasks.
    Serve(Box<ServeArgs>),
    /// Run one cache warm pass and print the summary as JSON.
    Warm(WarmArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the distributed cache URL.
    #[arg(long = "redis-url", value_name = "URL")]
    pub redis_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

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

    /// Override the interval between scheduled warm passes.
    #[arg(long = "warm-interval-seconds", value_name = "SECONDS")]
    pub warm_interval_seconds: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WarmArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Warm these article ids instead of the most viewed ones.
    #[arg(long = "id", value_name = "ARTICLE_ID")]
    pub ids: Vec<String>,

    /// Maximum number of most viewed articles to warm.
    #[arg(long, value_name = "COUNT")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub cache: CacheSettings,
    pub idempotency: IdempotencySettings,
    pub warmer: WarmerSettings,
    pub articles: ArticlesSettings,
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

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub acquire_timeout: Duration,
    pub statement_timeout: Duration,
}

/// Without a URL the service runs against an in-process distributed tier.
#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub url: Option<String>,
    pub pool_size: NonZeroUsize,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub local_ttl: Duration,
    pub sweep_interval: Duration,
    pub tier_timeout: Duration,
    pub origin_timeout: Duration,
    pub namespaces: Vec<NamespaceConfig>,
}

#[derive(Debug, Clone)]
pub struct IdempotencySettings {
    pub lock_ttl: Duration,
    pub mutation_timeout: Duration,
    pub replay_poll_attempts: u32,
    pub replay_poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct WarmerSettings {
    pub window_hours: NonZeroU32,
    pub batch_limit: NonZeroU32,
    pub concurrency: NonZeroUsize,
    /// `None` disables the scheduled pass.
    pub interval: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ArticlesSettings {
    pub page_size: NonZeroU32,
    pub related_limit: NonZeroU32,
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

    builder = builder.add_source(Environment::with_prefix("NEWSDESK").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Warm(args)) => raw.apply_database_override(&args.database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    redis: RawRedisSettings,
    cache: RawCacheSettings,
    idempotency: RawIdempotencySettings,
    warmer: RawWarmerSettings,
    articles: RawArticlesSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(seconds) = overrides.warm_interval_seconds {
            self.warmer.interval_seconds = Some(seconds);
        }

        self.apply_database_override(&overrides.database);
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(url) = overrides.redis_url.as_ref() {
            self.redis.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            redis,
            cache,
            idempotency,
            warmer,
            articles,
        } = raw;

        let redis = build_redis_settings(redis)?;
        let tier_timeout = redis.timeout;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            redis,
            cache: build_cache_settings(cache, tier_timeout)?,
            idempotency: build_idempotency_settings(idempotency)?,
            warmer: build_warmer_settings(warmer)?,
            articles: build_articles_settings(articles)?,
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

    let graceful_shutdown = positive_duration(
        server
            .graceful_shutdown_seconds
            .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS),
        Duration::from_secs,
        "server.graceful_shutdown_seconds",
    )?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown,
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

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    Ok(DatabaseSettings {
        url: non_blank(database.url),
        max_connections: non_zero_u32(
            database
                .max_connections
                .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
                .into(),
            "database.max_connections",
        )?,
        acquire_timeout: positive_duration(
            database
                .acquire_timeout_ms
                .unwrap_or(DEFAULT_DB_ACQUIRE_TIMEOUT_MS),
            Duration::from_millis,
            "database.acquire_timeout_ms",
        )?,
        statement_timeout: positive_duration(
            database
                .statement_timeout_ms
                .unwrap_or(DEFAULT_DB_STATEMENT_TIMEOUT_MS),
            Duration::from_millis,
            "database.statement_timeout_ms",
        )?,
    })
}

fn build_redis_settings(redis: RawRedisSettings) -> Result<RedisSettings, LoadError> {
    let pool_size = non_zero_u32(
        redis.pool_size.unwrap_or(DEFAULT_REDIS_POOL_SIZE).into(),
        "redis.pool_size",
    )?;
    let pool_size = usize::try_from(pool_size.get())
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            LoadError::invalid("redis.pool_size", "value exceeds supported range")
        })?;

    Ok(RedisSettings {
        url: non_blank(redis.url),
        pool_size,
        timeout: positive_duration(
            redis.timeout_ms.unwrap_or(DEFAULT_REDIS_TIMEOUT_MS),
            Duration::from_millis,
            "redis.timeout_ms",
        )?,
    })
}

fn build_cache_settings(
    cache: RawCacheSettings,
    tier_timeout: Duration,
) -> Result<CacheSettings, LoadError> {
    let local_ttl = positive_duration(
        cache.local_ttl_seconds.unwrap_or(DEFAULT_LOCAL_TTL_SECS),
        Duration::from_secs,
        "cache.local_ttl_seconds",
    )?;
    let sweep_interval = positive_duration(
        cache
            .sweep_interval_seconds
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
        Duration::from_secs,
        "cache.sweep_interval_seconds",
    )?;
    let origin_timeout = positive_duration(
        cache.origin_timeout_ms.unwrap_or(DEFAULT_ORIGIN_TIMEOUT_MS),
        Duration::from_millis,
        "cache.origin_timeout_ms",
    )?;

    let mut namespaces = default_namespaces();
    for raw in cache.namespaces {
        let namespace = build_namespace(raw)?;
        match namespaces
            .iter_mut()
            .find(|existing| existing.name == namespace.name)
        {
            Some(existing) => *existing = namespace,
            None => namespaces.push(namespace),
        }
    }

    Ok(CacheSettings {
        local_ttl,
        sweep_interval,
        tier_timeout,
        origin_timeout,
        namespaces,
    })
}

fn build_namespace(raw: RawNamespaceSettings) -> Result<NamespaceConfig, LoadError> {
    let name = raw.name.trim();
    if name.is_empty() || name.contains(':') {
        return Err(LoadError::invalid(
            "cache.namespaces.name",
            "must be non-empty and must not contain `:`",
        ));
    }
    if raw.fresh_seconds == 0 {
        return Err(LoadError::invalid(
            "cache.namespaces.fresh_seconds",
            format!("`{name}`: must be greater than zero"),
        ));
    }
    if raw.grace_seconds < raw.fresh_seconds {
        return Err(LoadError::invalid(
            "cache.namespaces.grace_seconds",
            format!("`{name}`: must not be shorter than fresh_seconds"),
        ));
    }

    let namespace = NamespaceConfig::new(name, raw.fresh_seconds, raw.grace_seconds);
    let namespace = match raw.revalidate_window_seconds {
        Some(0) | None => namespace,
        Some(window) => namespace.with_revalidate_window(Duration::from_secs(window)),
    };
    Ok(match raw.origin_timeout_ms {
        None => namespace,
        Some(0) => {
            return Err(LoadError::invalid(
                "cache.namespaces.origin_timeout_ms",
                format!("`{name}`: must be greater than zero"),
            ));
        }
        Some(ms) => namespace.with_origin_timeout(Duration::from_millis(ms)),
    })
}

fn build_idempotency_settings(
    idempotency: RawIdempotencySettings,
) -> Result<IdempotencySettings, LoadError> {
    Ok(IdempotencySettings {
        lock_ttl: positive_duration(
            idempotency.lock_ttl_seconds.unwrap_or(DEFAULT_LOCK_TTL_SECS),
            Duration::from_secs,
            "idempotency.lock_ttl_seconds",
        )?,
        mutation_timeout: positive_duration(
            idempotency
                .mutation_timeout_ms
                .unwrap_or(DEFAULT_MUTATION_TIMEOUT_MS),
            Duration::from_millis,
            "idempotency.mutation_timeout_ms",
        )?,
        replay_poll_attempts: idempotency
            .replay_poll_attempts
            .unwrap_or(DEFAULT_REPLAY_POLL_ATTEMPTS),
        replay_poll_interval: positive_duration(
            idempotency
                .replay_poll_interval_ms
                .unwrap_or(DEFAULT_REPLAY_POLL_INTERVAL_MS),
            Duration::from_millis,
            "idempotency.replay_poll_interval_ms",
        )?,
    })
}

fn build_warmer_settings(warmer: RawWarmerSettings) -> Result<WarmerSettings, LoadError> {
    let concurrency = warmer.concurrency.unwrap_or(DEFAULT_WARM_CONCURRENCY);
    let concurrency = NonZeroUsize::new(concurrency)
        .ok_or_else(|| LoadError::invalid("warmer.concurrency", "must be greater than zero"))?;

    let interval = match warmer
        .interval_seconds
        .unwrap_or(DEFAULT_WARM_INTERVAL_SECS)
    {
        0 => None,
        seconds => Some(Duration::from_secs(seconds)),
    };

    Ok(WarmerSettings {
        window_hours: non_zero_u32(
            warmer
                .window_hours
                .unwrap_or(DEFAULT_WARM_WINDOW_HOURS)
                .into(),
            "warmer.window_hours",
        )?,
        batch_limit: non_zero_u32(
            warmer.batch_limit.unwrap_or(DEFAULT_WARM_BATCH_LIMIT).into(),
            "warmer.batch_limit",
        )?,
        concurrency,
        interval,
    })
}

fn build_articles_settings(articles: RawArticlesSettings) -> Result<ArticlesSettings, LoadError> {
    Ok(ArticlesSettings {
        page_size: non_zero_u32(
            articles.page_size.unwrap_or(DEFAULT_PAGE_SIZE).into(),
            "articles.page_size",
        )?,
        related_limit: non_zero_u32(
            articles.related_limit.unwrap_or(DEFAULT_RELATED_LIMIT).into(),
            "articles.related_limit",
        )?,
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
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
    acquire_timeout_ms: Option<u64>,
    statement_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRedisSettings {
    url: Option<String>,
    pool_size: Option<u32>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    local_ttl_seconds: Option<u64>,
    sweep_interval_seconds: Option<u64>,
    origin_timeout_ms: Option<u64>,
    namespaces: Vec<RawNamespaceSettings>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawNamespaceSettings {
    name: String,
    fresh_seconds: u64,
    grace_seconds: u64,
    #[serde(default)]
    revalidate_window_seconds: Option<u64>,
    #[serde(default)]
    origin_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawIdempotencySettings {
    lock_ttl_seconds: Option<u64>,
    mutation_timeout_ms: Option<u64>,
    replay_poll_attempts: Option<u32>,
    replay_poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWarmerSettings {
    window_hours: Option<u32>,
    batch_limit: Option<u32>,
    concurrency: Option<usize>,
    interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawArticlesSettings {
    page_size: Option<u32>,
    related_limit: Option<u32>,
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

fn positive_duration(
    value: u64,
    unit: fn(u64) -> Duration,
    key: &'static str,
) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(unit(value))
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
