use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::alerts::composer::DEFAULT_ROUTE_PATH;
use crate::alerts::dispatcher::DEFAULT_CONCURRENCY;
use crate::alerts::threshold::ThresholdTier;
use crate::alerts::token::{DEFAULT_TOKEN_TTL_SECONDS, MIN_TOKEN_TTL_SECONDS};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub alerts: AlertConfig,
}

impl AppConfig {
    /// Loads `.env` (if present) and reads the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = AppEnvironment::from_str(
            &lookup("APP_ENV").unwrap_or_else(|| "development".to_string()),
        );

        let host = lookup("APP_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = lookup("APP_PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = lookup("APP_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let alerts = AlertConfig::from_lookup(&lookup)?;
        if environment == AppEnvironment::Production && alerts.link_secret.is_none() {
            return Err(ConfigError::MissingLinkSecret);
        }

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            alerts,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Outbound throughput cap shared by the dispatcher's workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_per_interval: u32,
    pub interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_interval: 10,
            interval_ms: 1000,
        }
    }
}

/// Alert pipeline settings.
#[derive(Clone)]
pub struct AlertConfig {
    /// `None` falls back to the development placeholder secret.
    pub link_secret: Option<String>,
    pub default_token_ttl_seconds: i64,
    pub base_url: Option<String>,
    pub route_path: String,
    pub rate_limit: RateLimitConfig,
    pub concurrency: usize,
    pub stop_on_error: bool,
    pub minimum_tier: ThresholdTier,
    pub cycle_cooldown: bool,
    pub release_on_failure: bool,
    /// SQLite ledger file; the in-memory ledger is used when absent.
    pub ledger_path: Option<PathBuf>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            link_secret: None,
            default_token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            base_url: None,
            route_path: DEFAULT_ROUTE_PATH.to_string(),
            rate_limit: RateLimitConfig::default(),
            concurrency: DEFAULT_CONCURRENCY,
            stop_on_error: false,
            minimum_tier: ThresholdTier::Warning,
            cycle_cooldown: true,
            release_on_failure: false,
            ledger_path: None,
        }
    }
}

impl fmt::Debug for AlertConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertConfig")
            .field("link_secret", &self.link_secret.as_ref().map(|_| "<redacted>"))
            .field("default_token_ttl_seconds", &self.default_token_ttl_seconds)
            .field("base_url", &self.base_url)
            .field("route_path", &self.route_path)
            .field("rate_limit", &self.rate_limit)
            .field("concurrency", &self.concurrency)
            .field("stop_on_error", &self.stop_on_error)
            .field("minimum_tier", &self.minimum_tier)
            .field("cycle_cooldown", &self.cycle_cooldown)
            .field("release_on_failure", &self.release_on_failure)
            .field("ledger_path", &self.ledger_path)
            .finish()
    }
}

impl AlertConfig {
    fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let link_secret = non_empty(lookup("ALERT_LINK_SECRET"));
        let default_token_ttl_seconds =
            parse_number::<i64, _>(lookup, "ALERT_TOKEN_TTL_SECONDS")?
                .unwrap_or(defaults.default_token_ttl_seconds)
                .max(MIN_TOKEN_TTL_SECONDS);
        let base_url = non_empty(lookup("ALERT_BASE_URL"));

        let route_path = non_empty(lookup("ALERT_ROUTE_PATH")).unwrap_or(defaults.route_path);
        if !route_path.starts_with('/') {
            return Err(ConfigError::InvalidRoutePath(route_path));
        }

        let max_per_interval = parse_number::<u32, _>(lookup, "ALERT_RATE_LIMIT_MAX")?
            .unwrap_or(defaults.rate_limit.max_per_interval);
        if max_per_interval == 0 {
            return Err(ConfigError::NotPositive("ALERT_RATE_LIMIT_MAX"));
        }
        let interval_ms = parse_number::<u64, _>(lookup, "ALERT_RATE_LIMIT_INTERVAL_MS")?
            .unwrap_or(defaults.rate_limit.interval_ms);
        if interval_ms == 0 {
            return Err(ConfigError::NotPositive("ALERT_RATE_LIMIT_INTERVAL_MS"));
        }

        let concurrency =
            parse_number::<usize, _>(lookup, "ALERT_CONCURRENCY")?.unwrap_or(defaults.concurrency);
        if concurrency == 0 {
            return Err(ConfigError::NotPositive("ALERT_CONCURRENCY"));
        }

        let minimum_tier = match non_empty(lookup("ALERT_MIN_TIER")) {
            Some(raw) => raw
                .parse::<ThresholdTier>()
                .map_err(|_| ConfigError::InvalidTier(raw))?,
            None => defaults.minimum_tier,
        };

        Ok(Self {
            link_secret,
            default_token_ttl_seconds,
            base_url,
            route_path,
            rate_limit: RateLimitConfig {
                max_per_interval,
                interval_ms,
            },
            concurrency,
            stop_on_error: parse_flag(lookup, "ALERT_STOP_ON_ERROR")?
                .unwrap_or(defaults.stop_on_error),
            minimum_tier,
            cycle_cooldown: parse_flag(lookup, "ALERT_CYCLE_COOLDOWN")?
                .unwrap_or(defaults.cycle_cooldown),
            release_on_failure: parse_flag(lookup, "ALERT_RELEASE_ON_FAILURE")?
                .unwrap_or(defaults.release_on_failure),
            ledger_path: non_empty(lookup("ALERT_LEDGER_PATH")).map(PathBuf::from),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn parse_number<T, F>(lookup: &F, variable: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup(variable)) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber {
                variable,
                value: raw,
            }),
        None => Ok(None),
    }
}

fn parse_flag<F>(lookup: &F, variable: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup(variable)) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidFlag {
                variable,
                value: raw,
            }),
        },
        None => Ok(None),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    MissingLinkSecret,
    InvalidRoutePath(String),
    InvalidNumber { variable: &'static str, value: String },
    InvalidFlag { variable: &'static str, value: String },
    NotPositive(&'static str),
    InvalidTier(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::MissingLinkSecret => {
                write!(f, "ALERT_LINK_SECRET must be set in production")
            }
            ConfigError::InvalidRoutePath(path) => {
                write!(f, "ALERT_ROUTE_PATH must start with '/', found '{path}'")
            }
            ConfigError::InvalidNumber { variable, value } => {
                write!(f, "{variable} must be a valid number, found '{value}'")
            }
            ConfigError::InvalidFlag { variable, value } => {
                write!(f, "{variable} must be true or false, found '{value}'")
            }
            ConfigError::NotPositive(variable) => write!(f, "{variable} must be greater than 0"),
            ConfigError::InvalidTier(value) => write!(
                f,
                "ALERT_MIN_TIER must be one of healthy, caution, warning, critical (found '{value}')"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}
