//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "cms-cache";
const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REFETCH_ON_FOCUS: bool = true;

/// Command-line arguments for the cms-cache binary.
#[derive(Debug, Parser)]
#[command(
    name = "cms-cache",
    version,
    about = "Cached client for the admin content API"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "CMS_CACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print a page of a family's list view.
    List(ListArgs),
    /// Print a family's featured subset.
    Featured(FamilyArgs),
    /// Print a family's category listing.
    Categories(FamilyArgs),
    /// Print one entity.
    Get(EntityArgs),
    /// Create an entity from a JSON body.
    Create(CreateArgs),
    /// Update an entity from a JSON body.
    Update(UpdateArgs),
    /// Delete an entity.
    Delete(EntityArgs),
    /// Follow a view and print every change until interrupted.
    Watch(WatchArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the backend base URL.
    #[arg(long = "base-url", value_name = "URL", global = true)]
    pub base_url: Option<String>,

    /// Bearer token sent with every request.
    #[arg(
        long = "token",
        env = "CMS_CACHE_TOKEN",
        hide_env_values = true,
        value_name = "TOKEN",
        global = true
    )]
    pub token: Option<String>,

    /// Override the request timeout.
    #[arg(long = "timeout-seconds", value_name = "SECONDS", global = true)]
    pub timeout_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override how long fetched data stays fresh.
    #[arg(long = "stale-after-seconds", value_name = "SECONDS", global = true)]
    pub stale_after_seconds: Option<u64>,

    /// Override the background refetch interval (0 disables it).
    #[arg(long = "refetch-interval-ms", value_name = "MILLIS", global = true)]
    pub refetch_interval_ms: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct FamilyArgs {
    /// Content family, e.g. `news` or `facilities`.
    #[arg(value_name = "FAMILY")]
    pub family: String,
}

#[derive(Debug, Args, Default, Clone)]
pub struct QueryArgs {
    #[arg(long, value_name = "N")]
    pub page: Option<u32>,

    #[arg(long = "per-page", value_name = "N")]
    pub per_page: Option<u32>,

    /// Additional list parameter, repeatable.
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, String)>,
}

#[derive(Debug, Args, Clone)]
pub struct ListArgs {
    #[arg(value_name = "FAMILY")]
    pub family: String,

    #[command(flatten)]
    pub query: QueryArgs,
}

#[derive(Debug, Args, Clone)]
pub struct EntityArgs {
    #[arg(value_name = "FAMILY")]
    pub family: String,

    #[arg(value_name = "ID")]
    pub id: String,
}

#[derive(Debug, Args, Default, Clone)]
pub struct BodyArgs {
    /// Inline JSON body.
    #[arg(long = "data", value_name = "JSON", conflicts_with = "file")]
    pub data: Option<String>,

    /// Read the JSON body from a file.
    #[arg(long = "file", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct CreateArgs {
    #[arg(value_name = "FAMILY")]
    pub family: String,

    #[command(flatten)]
    pub body: BodyArgs,
}

#[derive(Debug, Args, Clone)]
pub struct UpdateArgs {
    #[arg(value_name = "FAMILY")]
    pub family: String,

    #[arg(value_name = "ID")]
    pub id: String,

    #[command(flatten)]
    pub body: BodyArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WatchView {
    List,
    Featured,
    Categories,
    Detail,
}

#[derive(Debug, Args, Clone)]
pub struct WatchArgs {
    #[arg(value_name = "FAMILY")]
    pub family: String,

    #[arg(long, value_enum, default_value_t = WatchView::List)]
    pub view: WatchView,

    /// Entity id, required for the detail view.
    #[arg(long, value_name = "ID", required_if_eq("view", "detail"))]
    pub id: Option<String>,

    #[command(flatten)]
    pub query: QueryArgs,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api: ApiSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: Url,
    pub token: Option<String>,
    pub timeout: Duration,
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
pub struct CacheSettings {
    pub stale_after_secs: Option<u64>,
    pub refetch_on_focus: bool,
    pub refetch_interval_ms: u64,
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

    builder = builder.add_source(Environment::with_prefix("CMS_CACHE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    api: RawApiSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(url) = overrides.base_url.as_ref() {
            self.api.base_url = Some(url.clone());
        }
        if let Some(token) = overrides.token.as_ref() {
            self.api.token = Some(token.clone());
        }
        if let Some(seconds) = overrides.timeout_seconds {
            self.api.timeout_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(seconds) = overrides.stale_after_seconds {
            self.cache.stale_after_secs = Some(seconds);
        }
        if let Some(interval) = overrides.refetch_interval_ms {
            self.cache.refetch_interval_ms = Some(interval);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            api,
            logging,
            cache,
        } = raw;

        Ok(Self {
            api: build_api_settings(api)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache),
        })
    }
}

fn build_api_settings(api: RawApiSettings) -> Result<ApiSettings, LoadError> {
    let candidate = api.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let base_url = Url::parse(&candidate)
        .map_err(|err| LoadError::invalid("api.base_url", format!("`{candidate}`: {err}")))?;
    if !matches!(base_url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "api.base_url",
            format!("unsupported scheme `{}`", base_url.scheme()),
        ));
    }

    let token = api
        .token
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());

    let timeout = non_zero_seconds(
        api.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS),
        "api.timeout_seconds",
    )?;

    Ok(ApiSettings {
        base_url,
        token,
        timeout,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::WARN,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> CacheSettings {
    CacheSettings {
        stale_after_secs: cache.stale_after_secs,
        refetch_on_focus: cache.refetch_on_focus.unwrap_or(DEFAULT_REFETCH_ON_FOCUS),
        refetch_interval_ms: cache.refetch_interval_ms.unwrap_or(0),
    }
}

fn non_zero_seconds(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawApiSettings {
    base_url: Option<String>,
    token: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    stale_after_secs: Option<u64>,
    refetch_on_focus: Option<bool>,
    refetch_interval_ms: Option<u64>,
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
