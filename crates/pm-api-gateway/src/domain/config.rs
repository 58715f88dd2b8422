//! Gateway configuration with validation.
//!
//! Loaded once at process start and immutable afterwards. Every section
//! has serde defaults so a partial JSON document is enough.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::resolver::ResolverPolicy;

/// Environment variable naming the JSON config file
pub const CONFIG_PATH_ENV: &str = "PM_GATEWAY_CONFIG";

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Proxy listener
    pub http: HttpConfig,
    /// Admin server configuration (localhost only by default)
    pub admin: AdminConfig,
    /// Default rate limit policy for routes without an override
    pub rate_limit: RateLimitConfig,
    /// Bucket store bounds
    pub bucket_store: BucketStoreConfig,
    /// Default circuit breaker policy for routes without an override
    pub circuit_breaker: CircuitBreakerConfig,
    /// Timeout configuration
    pub timeouts: TimeoutConfig,
    /// Bearer token verification
    pub identity: IdentityConfig,
    /// Backend routes
    pub routes: Vec<RouteConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            admin: AdminConfig::default(),
            rate_limit: RateLimitConfig::default(),
            bucket_store: BucketStoreConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            timeouts: TimeoutConfig::default(),
            identity: IdentityConfig::default(),
            routes: vec![
                RouteConfig {
                    rate_limit: Some(RateLimitConfig {
                        capacity: 10,
                        refill_per_second: 5.0,
                        enabled: true,
                    }),
                    ..RouteConfig::new("patient-service", "/api/patients", "http://patient-service:4000")
                },
                RouteConfig::new("auth-service", "/auth", "http://auth-service:4005"),
            ],
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load configuration from the environment.
    ///
    /// Reads the file named by `PM_GATEWAY_CONFIG` when set (defaults
    /// otherwise), then applies `PM_HTTP_PORT`, `PM_ADMIN_PORT` and
    /// `PM_JWT_SECRET` overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };

        if let Ok(port) = std::env::var("PM_HTTP_PORT") {
            config.http.port = parse_port("PM_HTTP_PORT", &port)?;
        }
        if let Ok(port) = std::env::var("PM_ADMIN_PORT") {
            config.admin.port = parse_port("PM_ADMIN_PORT", &port)?;
        }
        if let Ok(secret) = std::env::var("PM_JWT_SECRET") {
            if !secret.trim().is_empty() {
                config.identity.jwt_secret = Some(secret);
            }
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admin.enabled && self.http.port == self.admin.port && self.http.port != 0 {
            return Err(ConfigError::DuplicatePorts);
        }

        self.rate_limit.validate()?;
        self.circuit_breaker.validate()?;

        if self.bucket_store.max_keys == 0 {
            return Err(ConfigError::InvalidLimit("bucket_store.max_keys cannot be 0".into()));
        }
        if self.http.max_body_bytes == 0 {
            return Err(ConfigError::InvalidLimit("http.max_body_bytes cannot be 0".into()));
        }

        if self.timeouts.dispatch.is_zero() {
            return Err(ConfigError::InvalidTimeout("dispatch timeout cannot be 0".into()));
        }
        if self.timeouts.verification.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "verification timeout cannot be 0".into(),
            ));
        }
        if self.timeouts.connect.is_zero() {
            return Err(ConfigError::InvalidTimeout("connect timeout cannot be 0".into()));
        }

        let mut ids = HashSet::new();
        for route in &self.routes {
            if !ids.insert(route.id.as_str()) {
                return Err(ConfigError::DuplicateRoute(route.id.clone()));
            }
            route.validate()?;
            if route.resolver == ResolverPolicy::Identity && self.identity.jwt_secret.is_none() {
                return Err(ConfigError::MissingIdentitySecret(route.id.clone()));
            }
        }

        Ok(())
    }

    /// Effective rate limit policy for a route
    pub fn rate_limit_for(&self, route: &RouteConfig) -> RateLimitConfig {
        route.rate_limit.clone().unwrap_or_else(|| self.rate_limit.clone())
    }

    /// Effective circuit breaker policy for a route
    pub fn circuit_breaker_for(&self, route: &RouteConfig) -> CircuitBreakerConfig {
        route
            .circuit_breaker
            .clone()
            .unwrap_or_else(|| self.circuit_breaker.clone())
    }

    /// Effective dispatch timeout for a route
    pub fn timeout_for(&self, route: &RouteConfig) -> Duration {
        route.timeout.unwrap_or(self.timeouts.dispatch)
    }

    /// Get HTTP server bind address
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.host, self.http.port)
    }

    /// Get Admin server bind address
    pub fn admin_addr(&self) -> SocketAddr {
        SocketAddr::new(self.admin.host, self.admin.port)
    }
}

fn parse_port(var: &str, value: &str) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{var} is not a valid port: {value}")))
}

/// Proxy listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address
    pub host: IpAddr,
    /// Port (default: 4004)
    pub port: u16,
    /// Largest request body buffered for forwarding
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 4004,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Admin server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Bind address (localhost only by default for security)
    pub host: IpAddr,
    /// Port (default: 9004)
    pub port: u16,
    /// Enable admin server
    pub enabled: bool,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 9004,
            enabled: true,
        }
    }
}

/// Token bucket policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Bucket capacity (burst size)
    pub capacity: u32,
    /// Tokens added per second
    pub refill_per_second: f64,
    /// Enable rate limiting
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            refill_per_second: 10.0,
            enabled: true,
        }
    }
}

impl RateLimitConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::InvalidRateLimit("capacity cannot be 0".into()));
        }
        if !self.refill_per_second.is_finite() || self.refill_per_second <= 0.0 {
            return Err(ConfigError::InvalidRateLimit(format!(
                "refill_per_second must be positive, got {}",
                self.refill_per_second
            )));
        }
        Ok(())
    }
}

/// Bounds on the per-key bucket store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketStoreConfig {
    /// Maximum buckets held per route
    pub max_keys: usize,
    /// Buckets unseen for this long are evicted
    #[serde(with = "humantime_serde")]
    pub idle_ttl: Duration,
    /// How often the background sweep runs
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for BucketStoreConfig {
    fn default() -> Self {
        Self {
            max_keys: 100_000,
            idle_ttl: Duration::from_secs(600),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Circuit breaker policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable circuit breaker
    pub enabled: bool,
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Cooldown before a half-open trial is allowed
    #[serde(with = "humantime_serde")]
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::InvalidCircuitBreaker(
                "failure_threshold cannot be 0".into(),
            ));
        }
        if self.open_timeout.is_zero() {
            return Err(ConfigError::InvalidCircuitBreaker(
                "open_timeout cannot be 0".into(),
            ));
        }
        Ok(())
    }
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Default backend dispatch timeout
    #[serde(with = "humantime_serde")]
    pub dispatch: Duration,
    /// Upper bound on a single identity verification
    #[serde(with = "humantime_serde")]
    pub verification: Duration,
    /// TCP connect bound for upstream connections; the exchange as a whole
    /// is bounded by the route's dispatch timeout
    #[serde(with = "humantime_serde")]
    pub connect: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            dispatch: Duration::from_secs(10),
            verification: Duration::from_secs(2),
            connect: Duration::from_secs(2),
        }
    }
}

/// Bearer token verification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// HS256 shared secret (also settable via `PM_JWT_SECRET`)
    #[serde(skip_serializing)]
    pub jwt_secret: Option<String>,
    /// Clock skew tolerated when checking `exp`, in seconds
    pub leeway_secs: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            leeway_secs: 30,
        }
    }
}

/// A single backend route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Route identifier, e.g. `patient-service`
    pub id: String,
    /// Human-readable name used in fallback bodies (derived from `id` when absent)
    #[serde(default)]
    pub display_name: Option<String>,
    /// Path prefix this route owns
    pub path_prefix: String,
    /// Upstream base URL
    pub upstream: String,
    /// Remove `path_prefix` before forwarding
    #[serde(default)]
    pub strip_prefix: bool,
    /// Rate-limit identity strategy
    #[serde(default)]
    pub resolver: ResolverPolicy,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    #[serde(default)]
    pub fallback: Option<FallbackConfig>,
    #[serde(default, with = "humantime_serde::option")]
    pub timeout: Option<Duration>,
}

impl RouteConfig {
    /// Route with defaults for everything but the addressing fields
    pub fn new(id: &str, path_prefix: &str, upstream: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: None,
            path_prefix: path_prefix.to_string(),
            upstream: upstream.to_string(),
            strip_prefix: false,
            resolver: ResolverPolicy::default(),
            rate_limit: None,
            circuit_breaker: None,
            fallback: None,
            timeout: None,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::InvalidRoute("route id cannot be empty".into()));
        }
        if !self.path_prefix.starts_with('/') {
            return Err(ConfigError::InvalidRoute(format!(
                "{}: path_prefix must start with '/'",
                self.id
            )));
        }
        if !(self.upstream.starts_with("http://") || self.upstream.starts_with("https://")) {
            return Err(ConfigError::InvalidRoute(format!(
                "{}: upstream must be an http(s) URL",
                self.id
            )));
        }
        if let Some(rate_limit) = &self.rate_limit {
            rate_limit.validate()?;
        }
        if let Some(circuit_breaker) = &self.circuit_breaker {
            circuit_breaker.validate()?;
        }
        if let Some(fallback) = &self.fallback {
            if !(100..=599).contains(&fallback.status) {
                return Err(ConfigError::InvalidRoute(format!(
                    "{}: fallback status {} out of range",
                    self.id, fallback.status
                )));
            }
        }
        if matches!(self.timeout, Some(t) if t.is_zero()) {
            return Err(ConfigError::InvalidTimeout(format!(
                "{}: route timeout cannot be 0",
                self.id
            )));
        }
        Ok(())
    }
}

/// Canned degraded response for a route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Status code (default 503)
    #[serde(default = "default_fallback_status")]
    pub status: u16,
    /// Response body
    pub body: String,
}

fn default_fallback_status() -> u16 {
    503
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Proxy and admin servers share a port
    #[error("duplicate ports configured")]
    DuplicatePorts,
    /// Two routes share an id
    #[error("duplicate route id: {0}")]
    DuplicateRoute(String),
    /// Identity resolver requested without a verification secret
    #[error("route {0} uses the identity resolver but no JWT secret is configured")]
    MissingIdentitySecret(String),
    /// Invalid route definition
    #[error("invalid route: {0}")]
    InvalidRoute(String),
    /// Invalid rate limiting configuration
    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),
    /// Invalid circuit breaker configuration
    #[error("invalid circuit breaker: {0}")]
    InvalidCircuitBreaker(String),
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// Config file could not be read
    #[error("cannot read config: {0}")]
    Io(String),
    /// Config file is not valid JSON for this schema
    #[error("cannot parse config: {0}")]
    Parse(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Humantime serde module for Duration serialization
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_some(&super::format_duration(*d)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| super::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }

    fn format_duration(duration: Duration) -> String {
        if duration.subsec_millis() == 0 {
            format!("{}s", duration.as_secs())
        } else {
            format!("{}ms", duration.as_millis())
        }
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map_err(|_| "invalid minutes")?
                .checked_mul(60)
                .map(Duration::from_secs)
                .ok_or("minutes out of range")
        } else {
            // Try parsing as plain seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
