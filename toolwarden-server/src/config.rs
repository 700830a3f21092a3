// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use crate::tool_registry::ToolRegistryConfig;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Toolwarden Server Configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: HttpServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub registry: RegistrySettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpServerConfig {
    /// HTTP API listen address (e.g., "127.0.0.1:47200")
    #[serde(default = "default_http_addr")]
    pub listen_addr: String,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Path to the SQLite policy database
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// How long SQLite waits on a locked database before failing
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistrySettings {
    /// Seconds a cached tool snapshot stays valid
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Upper bound on a single policy store call, in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Counter janitor period in seconds
    #[serde(default = "default_janitor_interval_secs")]
    pub janitor_interval_secs: u64,

    /// Minute buckets older than this many minutes are evicted
    #[serde(default = "default_minute_retention_mins")]
    pub minute_retention_mins: u64,

    /// Roles assumed for API callers that do not send any
    #[serde(default = "default_roles")]
    pub default_roles: Vec<String>,
}

// Default values
fn default_http_addr() -> String {
    "127.0.0.1:47200".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./toolwarden-data/policy.db")
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_store_timeout_ms() -> u64 {
    5000
}

fn default_janitor_interval_secs() -> u64 {
    60
}

fn default_minute_retention_mins() -> u64 {
    10
}

fn default_roles() -> Vec<String> {
    vec![toolwarden_core::DEFAULT_ROLE.to_string()]
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_http_addr(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            store_timeout_ms: default_store_timeout_ms(),
            janitor_interval_secs: default_janitor_interval_secs(),
            minute_retention_mins: default_minute_retention_mins(),
            default_roles: default_roles(),
        }
    }
}

impl From<&RegistrySettings> for ToolRegistryConfig {
    fn from(settings: &RegistrySettings) -> Self {
        Self {
            cache_validity: Duration::from_secs(settings.cache_ttl_secs),
            store_timeout: Duration::from_millis(settings.store_timeout_ms),
            janitor_interval: Duration::from_secs(settings.janitor_interval_secs),
            minute_retention: Duration::from_secs(
                settings.minute_retention_mins.saturating_mul(60),
            ),
        }
    }
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl ServerConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from environment variables
    ///
    /// Supported environment variables:
    /// - TOOLWARDEN_HTTP_ADDR: HTTP listen address (default: 127.0.0.1:47200)
    /// - TOOLWARDEN_REQUEST_TIMEOUT: Request timeout in seconds (default: 30)
    /// - TOOLWARDEN_DATABASE_PATH: SQLite database path (default: ./toolwarden-data/policy.db)
    /// - TOOLWARDEN_CACHE_TTL_SECS: Tool cache validity (default: 60)
    /// - TOOLWARDEN_STORE_TIMEOUT_MS: Store call timeout (default: 5000)
    /// - TOOLWARDEN_JANITOR_INTERVAL_SECS: Counter sweep period (default: 60)
    /// - TOOLWARDEN_MINUTE_RETENTION_MINS: Minute bucket retention (default: 10)
    /// - TOOLWARDEN_DEFAULT_ROLES: Comma-separated roles for anonymous callers (default: user)
    pub fn from_env() -> Self {
        Self::merge_with_env(Self::default())
    }

    /// Load configuration with priority: env > file > defaults
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let config = if let Some(path) = config_file {
            if path.exists() {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(&path)?
            } else {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
        } else {
            Self::default()
        };

        // Override with environment variables
        Ok(Self::merge_with_env(config))
    }

    /// Overwrite every field whose environment variable is set
    fn merge_with_env(mut config: Self) -> Self {
        if let Ok(addr) = std::env::var("TOOLWARDEN_HTTP_ADDR") {
            config.server.listen_addr = addr;
        }

        if let Some(val) = env_parse("TOOLWARDEN_REQUEST_TIMEOUT") {
            config.server.request_timeout_secs = val;
        }

        if let Ok(path) = std::env::var("TOOLWARDEN_DATABASE_PATH") {
            config.store.database_path = PathBuf::from(path);
        }

        if let Some(val) = env_parse("TOOLWARDEN_CACHE_TTL_SECS") {
            config.registry.cache_ttl_secs = val;
        }

        if let Some(val) = env_parse("TOOLWARDEN_STORE_TIMEOUT_MS") {
            config.registry.store_timeout_ms = val;
        }

        if let Some(val) = env_parse("TOOLWARDEN_JANITOR_INTERVAL_SECS") {
            config.registry.janitor_interval_secs = val;
        }

        if let Some(val) = env_parse("TOOLWARDEN_MINUTE_RETENTION_MINS") {
            config.registry.minute_retention_mins = val;
        }

        if let Ok(roles) = std::env::var("TOOLWARDEN_DEFAULT_ROLES") {
            config.registry.default_roles = roles
                .split(',')
                .map(str::trim)
                .filter(|role| !role.is_empty())
                .map(String::from)
                .collect();
        }

        config
    }

    /// Parse listen address as SocketAddr
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(self.server.listen_addr.parse()?)
    }

    pub fn registry_config(&self) -> ToolRegistryConfig {
        ToolRegistryConfig::from(&self.registry)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        if self.registry.store_timeout_ms == 0 {
            anyhow::bail!("registry.store_timeout_ms must be greater than zero");
        }
        if self.registry.janitor_interval_secs == 0 {
            anyhow::bail!("registry.janitor_interval_secs must be greater than zero");
        }
        if self.registry.default_roles.is_empty() {
            anyhow::bail!("registry.default_roles must name at least one role");
        }

        // Make sure the database directory exists
        if let Some(parent) = self.store.database_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Ok(())
    }
}

fn env_parse(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|val| val.parse().ok())
}
