//! Gateway configuration module
//!
//! Handles loading and parsing of gateway configuration from files and environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::crypto::XorKey;
use crate::resolver::BreakerSettings;

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Address the gateway listens on
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Gateway TCP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Idle read timeout for persistent Bishop sessions, in seconds
    #[serde(default = "default_ping_cycle")]
    pub ping_cycle_secs: u64,

    /// Longest a Bishop session may stay open, in seconds
    #[serde(default = "default_bishop_session_max")]
    pub bishop_session_max_secs: u64,

    /// Internal network mask, informational
    #[serde(default = "default_internal_ip_mask")]
    pub internal_ip_mask: String,

    /// Address advertised to the relay, informational
    #[serde(default = "default_local_ip")]
    pub local_ip: String,

    /// Accept every login when no database is configured
    #[serde(default)]
    pub dev_mode: bool,

    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Key resolution tuning
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Account database
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Management API
    #[serde(default)]
    pub api: ApiConfig,
}

/// Key resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Fast-path budget before the interim ack is sent
    #[serde(default = "default_fast_deadline")]
    pub fast_deadline_ms: u64,

    /// Slow-path budget, measured from submission to the search pool and
    /// including any wait for a free search slot
    #[serde(default = "default_slow_deadline")]
    pub slow_deadline_ms: u64,

    /// Failed searches before an identity's breaker opens
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,

    #[serde(default = "default_breaker_cooldown")]
    pub breaker_cooldown_secs: u64,

    /// Slow searches allowed per minute across all identities (0 = unlimited)
    #[serde(default = "default_global_attempts")]
    pub global_attempts_per_minute: u32,

    /// Concurrent slow searches
    #[serde(default = "default_max_concurrent_searches")]
    pub max_concurrent_searches: usize,

    /// Candidate keys tried per slow search
    #[serde(default = "default_max_candidates")]
    pub max_candidates: u64,

    /// JSON file the key cache is loaded from and saved to
    #[serde(default)]
    pub learned_keys_path: Option<PathBuf>,

    /// Historically observed keys, as 32-character hex strings
    #[serde(default = "default_static_keys")]
    pub static_keys: Vec<String>,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Use MySQL; otherwise an in-memory store is used
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_db_host")]
    pub host: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    /// Database name
    #[serde(default = "default_db_name")]
    pub name: String,

    #[serde(default = "default_db_user")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Maximum connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Budget for one account check
    #[serde(default = "default_query_timeout")]
    pub query_timeout_ms: u64,
}

/// Management API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_ping_cycle() -> u64 {
    30
}

fn default_bishop_session_max() -> u64 {
    30 * 60
}

fn default_internal_ip_mask() -> String {
    "127.0.0.1".to_string()
}

fn default_local_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_fast_deadline() -> u64 {
    2000
}

fn default_slow_deadline() -> u64 {
    15000
}

fn default_breaker_threshold() -> u32 {
    1
}

fn default_breaker_cooldown() -> u64 {
    30
}

fn default_global_attempts() -> u32 {
    5
}

fn default_max_concurrent_searches() -> usize {
    2
}

fn default_max_candidates() -> u64 {
    1_000_000
}

fn default_static_keys() -> Vec<String> {
    vec!["AD692BA79D670C500EA5AEC317FBA5AD".to_string()]
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    3306
}

fn default_db_name() -> String {
    "paysys".to_string()
}

fn default_db_user() -> String {
    "root".to_string()
}

fn default_pool_size() -> u32 {
    5
}

fn default_query_timeout() -> u64 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_api_port() -> u16 {
    8080
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            fast_deadline_ms: default_fast_deadline(),
            slow_deadline_ms: default_slow_deadline(),
            breaker_threshold: default_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown(),
            global_attempts_per_minute: default_global_attempts(),
            max_concurrent_searches: default_max_concurrent_searches(),
            max_candidates: default_max_candidates(),
            learned_keys_path: None,
            static_keys: default_static_keys(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_db_host(),
            port: default_db_port(),
            name: default_db_name(),
            user: default_db_user(),
            password: String::new(),
            pool_size: default_pool_size(),
            query_timeout_ms: default_query_timeout(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            port: default_api_port(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/paysys.toml"),
            bind_address: default_bind_address(),
            port: default_port(),
            ping_cycle_secs: default_ping_cycle(),
            bishop_session_max_secs: default_bishop_session_max(),
            internal_ip_mask: default_internal_ip_mask(),
            local_ip: default_local_ip(),
            dev_mode: false,
            log_format: default_log_format(),
            resolver: ResolverConfig::default(),
            database: DatabaseConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl ResolverConfig {
    pub fn fast_deadline(&self) -> Duration {
        Duration::from_millis(self.fast_deadline_ms)
    }

    pub fn slow_deadline(&self) -> Duration {
        Duration::from_millis(self.slow_deadline_ms)
    }

    pub fn breaker_settings(&self) -> BreakerSettings {
        BreakerSettings {
            threshold: self.breaker_threshold.max(1),
            cooldown: Duration::from_secs(self.breaker_cooldown_secs),
            global_limit: self.global_attempts_per_minute,
            global_window: Duration::from_secs(60),
        }
    }

    /// Parse the configured static keys
    pub fn parsed_static_keys(&self) -> Result<Vec<XorKey>> {
        self.static_keys
            .iter()
            .map(|hex| {
                hex.parse::<XorKey>()
                    .with_context(|| format!("Invalid static key: {}", hex))
            })
            .collect()
    }
}

impl DatabaseConfig {
    /// Get the database connection URL
    pub fn url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

impl GatewayConfig {
    /// Load configuration from file and environment variables
    pub async fn load() -> Result<Self> {
        // Determine config path from environment or use default
        let config_path = env::var("PAYSYS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/paysys.toml"));

        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| {
                    format!("Failed to read config file: {}", config_path.display())
                })?;

            Self::from_toml(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            Self::default()
        };

        config.config_path = config_path;

        // Override with environment variables
        config.apply_env_overrides();

        config.validate()?;

        Ok(config)
    }

    /// Parse a TOML document; missing fields take their defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("PAYSYS_BIND_ADDRESS") {
            self.bind_address = val;
        }
        if let Ok(val) = env::var("PAYSYS_PORT") {
            if let Ok(port) = val.parse() {
                self.port = port;
            }
        }
        if let Ok(val) = env::var("PAYSYS_PING_CYCLE") {
            if let Ok(secs) = val.parse() {
                self.ping_cycle_secs = secs;
            }
        }
        if let Ok(val) = env::var("PAYSYS_BISHOP_SESSION_MAX") {
            if let Ok(secs) = val.parse() {
                self.bishop_session_max_secs = secs;
            }
        }
        if let Ok(val) = env::var("PAYSYS_DEV_MODE") {
            self.dev_mode = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(val) = env::var("PAYSYS_LOG_FORMAT") {
            self.log_format = val;
        }
        if let Ok(val) = env::var("PAYSYS_FAST_DEADLINE_MS") {
            if let Ok(ms) = val.parse() {
                self.resolver.fast_deadline_ms = ms;
            }
        }
        if let Ok(val) = env::var("PAYSYS_SLOW_DEADLINE_MS") {
            if let Ok(ms) = val.parse() {
                self.resolver.slow_deadline_ms = ms;
            }
        }
        if let Ok(val) = env::var("PAYSYS_LEARNED_KEYS_PATH") {
            self.resolver.learned_keys_path = Some(PathBuf::from(val));
        }
        if let Ok(val) = env::var("PAYSYS_API_PORT") {
            if let Ok(port) = val.parse() {
                self.api.port = port;
            }
        }

        // Database overrides. MYSQL_HOST implies enabled unless
        // PAYSYS_DATABASE_ENABLED says otherwise
        if let Ok(val) = env::var("MYSQL_HOST") {
            self.database.host = val;
            self.database.enabled = true;
        }
        if let Ok(val) = env::var("MYSQL_PORT") {
            if let Ok(port) = val.parse() {
                self.database.port = port;
            }
        }
        if let Ok(val) = env::var("MYSQL_DATABASE") {
            self.database.name = val;
        }
        if let Ok(val) = env::var("MYSQL_USER") {
            self.database.user = val;
        }
        if let Ok(val) = env::var("MYSQL_PASSWORD") {
            self.database.password = val;
        }
        if let Ok(val) = env::var("PAYSYS_DATABASE_ENABLED") {
            self.database.enabled = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.resolver.fast_deadline_ms == 0 {
            anyhow::bail!("Fast deadline must be greater than zero");
        }
        if self.resolver.slow_deadline_ms <= self.resolver.fast_deadline_ms {
            anyhow::bail!("Slow deadline must be greater than the fast deadline");
        }
        if self.resolver.max_concurrent_searches == 0 {
            anyhow::bail!("At least one concurrent search is required");
        }
        if self.api.enabled && self.api.port == self.port {
            anyhow::bail!("API port must be different from the gateway port");
        }
        if self.ping_cycle_secs == 0 {
            anyhow::bail!("Ping cycle must be greater than zero");
        }
        if self.bishop_session_max_secs == 0 {
            anyhow::bail!("Bishop session maximum must be greater than zero");
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            anyhow::bail!("Log format must be \"pretty\" or \"json\"");
        }
        self.resolver.parsed_static_keys()?;
        Ok(())
    }

    /// Address string for the gateway listener
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Address string for the management API listener
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.api.port)
    }

    pub fn bishop_session_max(&self) -> Duration {
        Duration::from_secs(self.bishop_session_max_secs)
    }

    pub fn ping_cycle(&self) -> Duration {
        Duration::from_secs(self.ping_cycle_secs)
    }
}
