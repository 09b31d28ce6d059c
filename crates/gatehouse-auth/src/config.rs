use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthorityConfig {
    /// Fast cache (Redis) connection settings
    #[serde(default)]
    pub redis: RedisConfig,
    /// Session validation settings
    #[serde(default)]
    pub session: SessionConfig,
    /// Per-endpoint request quotas
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Identity contact cache used to decorate audit events
    #[serde(default)]
    pub contact_cache: ContactCacheConfig,
    /// Offline geolocation
    #[serde(default)]
    pub geo: GeoConfig,
    /// Security event persistence
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Reverse proxies whose forwarding headers are believed.
    /// Requests from any other peer are keyed by the socket address.
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
}

impl AuthorityConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.redis.enabled {
            if self.redis.url.trim().is_empty() {
                return Err("redis.url must not be empty when redis is enabled".into());
            }
            if self.redis.pool_size == 0 {
                return Err("redis.pool_size must be > 0".into());
            }
        }
        if self.redis.timeout_ms == 0 {
            return Err("redis.timeout_ms must be > 0".into());
        }
        if self.session.lookup_timeout_ms == 0 {
            return Err("session.lookup_timeout_ms must be > 0".into());
        }
        if self.rate_limit.default_window_secs == 0 {
            return Err("rate_limit.default_window_secs must be > 0".into());
        }
        for rule in &self.rate_limit.rules {
            if rule.path_prefix.is_empty() {
                return Err("rate_limit.rules[].path_prefix must not be empty".into());
            }
            if rule.window_secs == Some(0) {
                return Err(format!(
                    "rate_limit rule '{}' has a zero window",
                    rule.path_prefix
                ));
            }
        }
        if self.geo.cache_ttl_secs == 0 {
            return Err("geo.cache_ttl_secs must be > 0".into());
        }
        if self.audit.write_timeout_ms == 0 {
            return Err("audit.write_timeout_ms must be > 0".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }
}

/// Redis configuration for the fast cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (the authority degrades gracefully without it)
    /// Default: false
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection and per-command timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl RedisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Upper bound for one validation (cache + durable fallback)
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
}

fn default_lookup_timeout_ms() -> u64 {
    3000
}

impl SessionConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: default_lookup_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window when no rule matches
    #[serde(default = "default_rate_limit")]
    pub default_limit: u64,

    /// Window length in seconds when no rule matches
    #[serde(default = "default_window_secs")]
    pub default_window_secs: u64,

    /// Endpoint-specific overrides, matched by longest path prefix
    #[serde(default)]
    pub rules: Vec<EndpointRule>,
}

fn default_rate_limit() -> u64 {
    100
}

fn default_window_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_limit: default_rate_limit(),
            default_window_secs: default_window_secs(),
            rules: Vec::new(),
        }
    }
}

/// Quota and authentication requirement for a group of routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointRule {
    pub path_prefix: String,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub window_secs: Option<u64>,
    /// Routes under this prefix skip session validation
    #[serde(default)]
    pub public: bool,
}

/// Resolved policy for one request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePolicy {
    pub limit: u64,
    pub window: Duration,
    pub requires_auth: bool,
}

impl RateLimitConfig {
    /// Picks the longest matching rule for `path`, falling back to the defaults.
    pub fn rule_for(&self, path: &str) -> RoutePolicy {
        let rule = self
            .rules
            .iter()
            .filter(|r| path.starts_with(r.path_prefix.as_str()))
            .max_by_key(|r| r.path_prefix.len());

        RoutePolicy {
            limit: rule.and_then(|r| r.limit).unwrap_or(self.default_limit),
            window: Duration::from_secs(
                rule.and_then(|r| r.window_secs)
                    .unwrap_or(self.default_window_secs),
            ),
            requires_auth: !rule.is_some_and(|r| r.public),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactCacheConfig {
    #[serde(default = "default_contact_cache_enabled")]
    pub enabled: bool,
    /// Maximum number of identities kept; 0 means the default (1000)
    #[serde(default = "default_contact_cache_capacity")]
    pub capacity: usize,
}

fn default_contact_cache_enabled() -> bool {
    true
}

fn default_contact_cache_capacity() -> usize {
    1000
}

impl Default for ContactCacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_contact_cache_enabled(),
            capacity: default_contact_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoConfig {
    /// Path to a GeoLite2/GeoIP2 City database; geolocation is off when unset
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Geolocation cache TTL in seconds
    #[serde(default = "default_geo_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Soft bound on cached addresses; expired entries are purged past it
    #[serde(default = "default_geo_cache_max_entries")]
    pub cache_max_entries: usize,
}

fn default_geo_cache_ttl_secs() -> u64 {
    3600 // 1 hour
}

fn default_geo_cache_max_entries() -> usize {
    10000
}

impl GeoConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            cache_ttl_secs: default_geo_cache_ttl_secs(),
            cache_max_entries: default_geo_cache_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Persist security events to the durable audit log
    #[serde(default = "default_audit_persist")]
    pub persist: bool,

    #[serde(default = "default_audit_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

fn default_audit_persist() -> bool {
    true
}

fn default_audit_write_timeout_ms() -> u64 {
    3000
}

impl AuditConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            persist: default_audit_persist(),
            write_timeout_ms: default_audit_write_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AuthorityConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<AuthorityConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                let default_path = PathBuf::from("gatehouse.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., GATEHOUSE__REDIS__ENABLED=true
        builder = builder.add_source(
            Environment::with_prefix("GATEHOUSE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AuthorityConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
