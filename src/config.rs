use crate::error::{PortalError, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Hosts whose pages are known to need a full render before they are usable.
pub const DEFAULT_DYNAMIC_HOST_HINTS: &[&str] = &[
    "coolmathgames",
    "class-77",
    "itch.io",
    "roblox",
    "miniclip",
    "kongregate",
    "armorgames",
    "scirra",
];

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0 Safari/537.36";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Static fetch configuration
    pub fetch: FetchConfig,
    /// Headless browser configuration
    pub render: RenderConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port for the HTTP server (default: 8080)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Directory holding the front-end files
    pub public_dir: PathBuf,
    /// Allowed CORS origins (comma-separated, empty = localhost only)
    pub cors_origins: Vec<String>,
    /// Upper bound for a whole request in seconds
    pub request_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Timeout for a single static fetch in seconds
    pub timeout: u64,
    /// User agent sent to origins
    pub user_agent: String,
    /// Hostname fragments that select the rendered strategy
    pub dynamic_host_hints: Vec<String>,
    /// Use one strategy for every document, ignoring host hints
    pub force_strategy: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Navigation and quiescence timeout in seconds
    pub timeout: u64,
    /// Extra wait after quiescence in milliseconds
    pub settle_ms: u64,
    /// Chromium binary, auto-detected when unset
    pub chrome_executable: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            server: ServerConfig {
                port: get_env_or("PORT", "8080").parse().map_err(|_| {
                    PortalError::InvalidConfig("PORT must be a valid port number".into())
                })?,
                host: get_env_or("PORTAL_HOST", "0.0.0.0"),
                public_dir: PathBuf::from(get_env_or("PUBLIC_DIR", "public")),
                cors_origins: split_list(&get_env_or("CORS_ORIGINS", "")),
                request_timeout: parse_env("REQUEST_TIMEOUT_SECS", 60)?,
            },
            fetch: FetchConfig {
                timeout: parse_env("FETCH_TIMEOUT_SECS", 20)?,
                user_agent: get_env_or("PORTAL_USER_AGENT", DEFAULT_USER_AGENT),
                dynamic_host_hints: match env::var("DYNAMIC_HOST_HINTS") {
                    Ok(raw) => split_list(&raw),
                    Err(_) => DEFAULT_DYNAMIC_HOST_HINTS
                        .iter()
                        .map(|h| h.to_string())
                        .collect(),
                },
                force_strategy: env::var("FORCE_STRATEGY")
                    .ok()
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty()),
            },
            render: RenderConfig {
                timeout: parse_env("RENDER_TIMEOUT_SECS", 30)?,
                settle_ms: parse_env("RENDER_SETTLE_MS", 500)?,
                chrome_executable: env::var("CHROME_EXECUTABLE")
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }

    /// Get the HTTP server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl RenderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| PortalError::InvalidConfig(format!("{} must be a valid number", key))),
        Err(_) => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
