use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use chrono::FixedOffset;

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
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            engine: EngineConfig::load()?,
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

/// Scoring engine knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Civil timezone of the tenant region as whole hours east of UTC.
    /// Defaults to -5 (Guayaquil); the region observes no daylight saving.
    pub utc_offset_hours: i8,
    /// TTL applied to cached evaluation definitions.
    pub definition_cache_ttl_secs: u64,
    /// Events younger than this are held for the next processor sweep.
    pub debounce_secs: i64,
    /// Shorter hold used by replay tooling.
    pub replay_debounce_secs: i64,
    /// Upper bound on fan-out worker threads.
    pub worker_cap: usize,
}

impl EngineConfig {
    fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            utc_offset_hours: parse_env("ENGINE_UTC_OFFSET_HOURS", -5)?,
            definition_cache_ttl_secs: parse_env("ENGINE_CACHE_TTL_SECS", 21_600)?,
            debounce_secs: parse_env("ENGINE_DEBOUNCE_SECS", 120)?,
            replay_debounce_secs: parse_env("ENGINE_REPLAY_DEBOUNCE_SECS", 30)?,
            worker_cap: parse_env("ENGINE_WORKER_CAP", 8)?,
        })
    }

    pub fn civil_timezone(&self) -> FixedOffset {
        let seconds = i32::from(self.utc_offset_hours) * 3600;
        FixedOffset::east_opt(seconds).unwrap_or_else(|| {
            FixedOffset::east_opt(0).expect("zero offset is valid")
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: -5,
            definition_cache_ttl_secs: 21_600,
            debounce_secs: 120,
            replay_debounce_secs: 30,
            worker_cap: 8,
        }
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, fallback: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { var }),
        Err(_) => Ok(fallback),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { var: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { var } => {
                write!(f, "{var} must be a valid number")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidNumber { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
