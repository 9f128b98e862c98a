use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub source: SourceConfig,
    pub warehouse: WarehouseConfig,
    pub sync: SyncConfig,
    pub refresh: RefreshConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Connection details for the source CRM (spec.md §6.1).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    pub app_id: String,
    pub api_key: String,
    pub rate_limit_per_sec: f64,
    pub rate_limit_burst: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub url: String,
}

/// Tuning knobs for the full-sync orchestrator (spec.md §5, §4.4).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub page_size: u32,
    pub batch_size_establishment: usize,
    pub batch_size_student: usize,
    pub batch_size_vespa_score: usize,
    pub batch_size_question_response: usize,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub interval_secs: u64,
    pub checkpoint_dir: String,
    pub report_dir: String,
}

/// Bearer token guarding the manual single-establishment refresh endpoint
/// (spec.md §4.6, §6.3).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub bearer_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// Command line arguments for configuration overrides.
#[derive(Parser, Debug, Clone)]
#[command(name = "vespa-sync")]
#[command(version, about = "VESPA Sync & Statistics Pipeline")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Warehouse database URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub warehouse_url: Option<String>,

    /// Source CRM base URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub source_base_url: Option<String>,

    /// Source CRM app id (overrides config file)
    #[arg(long, value_name = "ID")]
    pub source_app_id: Option<String>,

    /// Source CRM api key (overrides config file)
    #[arg(long, value_name = "KEY")]
    pub source_api_key: Option<String>,

    /// Refresh endpoint bearer token (overrides config file)
    #[arg(long, value_name = "TOKEN")]
    pub refresh_bearer_token: Option<String>,

    /// Logging level (overrides config file, e.g., "info,vespa_sync=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Full-sync interval (overrides config file, e.g., "6h", "30m")
    #[arg(long, value_name = "DURATION")]
    pub sync_interval_secs: Option<String>,

    /// Run a single full sync in the foreground and exit instead of starting
    /// the scheduled loop and HTTP server.
    #[arg(long)]
    pub once: bool,
}

impl Config {
    /// Load configuration with command line, environment variable, and file
    /// support.
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with APP_)
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<(Self, CommandLineArgs), anyhow::Error> {
        // Best-effort: a missing .env is normal in production, where the
        // real environment is set by the deployment, not a file.
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("No .env file loaded: {}", e);
        }

        let cli_args = CommandLineArgs::parse();

        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(&cli_args);
        config.validate()?;

        Ok((config, cli_args))
    }

    /// Apply environment variable overrides.
    ///
    /// Supported environment variables:
    /// - APP_SERVER_HOST / APP_SERVER_PORT
    /// - APP_WAREHOUSE_URL
    /// - APP_SOURCE_BASE_URL / APP_SOURCE_APP_ID / APP_SOURCE_API_KEY
    /// - APP_SYNC_RATE_LIMIT_PER_SEC
    /// - APP_SYNC_BATCH_SIZE_ESTABLISHMENT / _STUDENT / _VESPA_SCORE / _QUESTION_RESPONSE
    /// - APP_SYNC_INTERVAL_SECS (accepts "6h", "30m", or plain seconds)
    /// - APP_REFRESH_BEARER_TOKEN
    /// - APP_LOG_LEVEL
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("APP_SERVER_HOST") {
            self.server.host = host;
            tracing::info!("Override server.host from env: {}", self.server.host);
        }

        if let Ok(port) = std::env::var("APP_SERVER_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
            tracing::info!("Override server.port from env: {}", self.server.port);
        }

        if let Ok(url) = std::env::var("APP_WAREHOUSE_URL") {
            self.warehouse.url = url;
            tracing::info!("Override warehouse.url from env");
        }

        if let Ok(url) = std::env::var("APP_SOURCE_BASE_URL") {
            self.source.base_url = url;
            tracing::info!("Override source.base_url from env: {}", self.source.base_url);
        }

        if let Ok(app_id) = std::env::var("APP_SOURCE_APP_ID") {
            self.source.app_id = app_id;
            tracing::info!("Override source.app_id from env");
        }

        if let Ok(api_key) = std::env::var("APP_SOURCE_API_KEY") {
            self.source.api_key = api_key;
            tracing::info!("Override source.api_key from env");
        }

        if let Ok(rate) = std::env::var("APP_SYNC_RATE_LIMIT_PER_SEC")
            && let Ok(rate) = rate.parse()
        {
            self.source.rate_limit_per_sec = rate;
            tracing::info!("Override source.rate_limit_per_sec from env: {}", rate);
        }

        if let Ok(val) = std::env::var("APP_SYNC_BATCH_SIZE_ESTABLISHMENT")
            && let Ok(val) = val.parse()
        {
            self.sync.batch_size_establishment = val;
            tracing::info!("Override sync.batch_size_establishment from env: {}", val);
        }

        if let Ok(val) = std::env::var("APP_SYNC_BATCH_SIZE_STUDENT")
            && let Ok(val) = val.parse()
        {
            self.sync.batch_size_student = val;
            tracing::info!("Override sync.batch_size_student from env: {}", val);
        }

        if let Ok(val) = std::env::var("APP_SYNC_BATCH_SIZE_VESPA_SCORE")
            && let Ok(val) = val.parse()
        {
            self.sync.batch_size_vespa_score = val;
            tracing::info!("Override sync.batch_size_vespa_score from env: {}", val);
        }

        if let Ok(val) = std::env::var("APP_SYNC_BATCH_SIZE_QUESTION_RESPONSE")
            && let Ok(val) = val.parse()
        {
            self.sync.batch_size_question_response = val;
            tracing::info!("Override sync.batch_size_question_response from env: {}", val);
        }

        if let Ok(interval) = std::env::var("APP_SYNC_INTERVAL_SECS") {
            match parse_duration_to_secs(&interval) {
                Ok(val) => {
                    self.sync.interval_secs = val;
                    tracing::info!("Override sync.interval_secs from env: {}", val);
                },
                Err(e) => tracing::warn!(
                    "Invalid APP_SYNC_INTERVAL_SECS '{}': {} (keep {})",
                    interval,
                    e,
                    self.sync.interval_secs
                ),
            }
        }

        if let Ok(token) = std::env::var("APP_REFRESH_BEARER_TOKEN") {
            self.refresh.bearer_token = token;
            tracing::info!("Override refresh.bearer_token from env");
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }
    }

    /// Apply command line argument overrides (highest priority).
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
            tracing::info!("Override server.host from CLI: {}", self.server.host);
        }

        if let Some(port) = args.server_port {
            self.server.port = port;
            tracing::info!("Override server.port from CLI: {}", self.server.port);
        }

        if let Some(url) = &args.warehouse_url {
            self.warehouse.url = url.clone();
            tracing::info!("Override warehouse.url from CLI");
        }

        if let Some(url) = &args.source_base_url {
            self.source.base_url = url.clone();
            tracing::info!("Override source.base_url from CLI: {}", self.source.base_url);
        }

        if let Some(app_id) = &args.source_app_id {
            self.source.app_id = app_id.clone();
            tracing::info!("Override source.app_id from CLI");
        }

        if let Some(api_key) = &args.source_api_key {
            self.source.api_key = api_key.clone();
            tracing::info!("Override source.api_key from CLI");
        }

        if let Some(token) = &args.refresh_bearer_token {
            self.refresh.bearer_token = token.clone();
            tracing::info!("Override refresh.bearer_token from CLI");
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }

        if let Some(interval) = &args.sync_interval_secs {
            match parse_duration_to_secs(interval) {
                Ok(val) => {
                    self.sync.interval_secs = val;
                    tracing::info!("Override sync.interval_secs from CLI: {}", val);
                },
                Err(e) => tracing::warn!(
                    "Invalid --sync-interval-secs '{}': {} (keep {})",
                    interval,
                    e,
                    self.sync.interval_secs
                ),
            }
        }
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }
        if self.warehouse.url.is_empty() {
            anyhow::bail!("Warehouse URL cannot be empty");
        }
        if self.source.base_url.is_empty() {
            anyhow::bail!("Source base URL cannot be empty");
        }
        if self.sync.interval_secs == 0 {
            anyhow::bail!("sync.interval_secs must be > 0");
        }
        if self.refresh.bearer_token.is_empty() {
            tracing::warn!("refresh.bearer_token is empty; the refresh endpoint accepts any bearer value");
        }
        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            app_id: String::new(),
            api_key: String::new(),
            rate_limit_per_sec: 5.0,
            rate_limit_burst: 10.0,
        }
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self { url: "postgres://localhost/vespa_sync".to_string() }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 500,
            batch_size_establishment: 100,
            batch_size_student: 200,
            batch_size_vespa_score: 200,
            batch_size_question_response: 300,
            interval_secs: 6 * 60 * 60,
            checkpoint_dir: "./checkpoints".to_string(),
            report_dir: "./reports".to_string(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { bearer_token: String::new() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info,vespa_sync=debug".to_string(), file: Some("logs/vespa-sync.log".to_string()) }
    }
}

fn parse_duration_to_secs(input: &str) -> Result<u64, String> {
    if let Ok(val) = input.parse::<u64>() {
        return Ok(val);
    }

    let s = input.trim().to_lowercase();
    let (num_str, unit) = s.split_at(s.chars().take_while(|c| c.is_ascii_digit()).count());
    if num_str.is_empty() || unit.is_empty() {
        return Err("missing number or unit".into());
    }
    let n: u64 = num_str.parse().map_err(|_| "invalid number".to_string())?;
    match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => Ok(n),
        "m" | "min" | "mins" | "minute" | "minutes" => Ok(n * 60),
        "h" | "hr" | "hour" | "hours" => Ok(n * 60 * 60),
        "d" | "day" | "days" => Ok(n * 60 * 60 * 24),
        _ => Err(format!("unsupported unit: {}", unit)),
    }
}

fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = u64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a number of seconds or a string like '30s', '5m', '6h'")
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v)
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if v >= 0 { Ok(v as u64) } else { Err(E::custom("negative not allowed")) }
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(v).map_err(E::custom)
        }
        fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(&v).map_err(E::custom)
        }
    }
    deserializer.deserialize_any(Visitor)
}
