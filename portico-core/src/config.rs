use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration for the Portico gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Deployment profile; `APP_ENV` overrides the file value.
    #[serde(default)]
    pub profile: Profile,

    /// Listener host.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listener port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// API base path, e.g. `/api/v1`.
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// API version surfaced in envelope metadata and `X-Schema-Version`.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub cors: CorsConfig,

    /// Token-bucket rate limiting; absent = disabled.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub http2: Http2Config,

    #[serde(default)]
    pub ssl: Option<SslConfig>,

    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Optional external pub/sub for multi-process coordination.
    #[serde(default)]
    pub redis: Option<RedisConfig>,

    #[serde(default)]
    pub cache: CacheConfig,

    /// State Broker collaborator endpoint (`KB_STATE_DAEMON_URL`).
    #[serde(default)]
    pub state_daemon_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Dev,
    Preview,
    Prod,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Dev => "dev",
            Profile::Preview => "preview",
            Profile::Prod => "prod",
        }
    }

    fn from_env_value(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "dev" | "development" | "local" => Some(Profile::Dev),
            "preview" | "staging" => Some(Profile::Preview),
            "prod" | "production" => Some(Profile::Prod),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Global per-request timeout (milliseconds); per-route budgets override.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Maximum request body size (bytes).
    #[serde(default = "default_body_limit")]
    pub body_limit: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Defaults to the top-level profile when unset.
    #[serde(default)]
    pub profile: Option<Profile>,

    /// Allowed origins. In dev, empty falls back to the localhost pair.
    #[serde(default)]
    pub origins: Vec<String>,

    #[serde(default)]
    pub allow_credentials: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Bucket capacity (requests per window).
    #[serde(default = "default_rate_limit_max")]
    pub max: u64,

    /// Refill window (milliseconds).
    #[serde(default = "default_rate_limit_window")]
    pub time_window_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default)]
    pub registry: RegistryEventsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEventsConfig {
    /// When set, SSE clients must present this token.
    #[serde(default)]
    pub token: Option<String>,

    /// Header carrying the token as `Bearer <t>`.
    #[serde(default = "default_events_header")]
    pub header_name: String,

    /// Query parameter fallback for EventSource clients.
    #[serde(default = "default_events_query_param")]
    pub query_param: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Http2Config {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub allow_http1: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SslConfig {
    pub key_path: PathBuf,
    pub cert_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Directory scanned by the filesystem discovery provider.
    #[serde(default = "default_plugins_dir")]
    pub dir: PathBuf,

    /// Global capability allow-list, intersected with each manifest's
    /// declared permissions.
    #[serde(default = "default_granted_capabilities")]
    pub granted_capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,

    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Discovery-snapshot TTL (milliseconds). Unset = profile default
    /// (10 minutes in dev, 1 hour in prod).
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

impl GatewayConfig {
    /// Load configuration from a YAML file plus environment variables.
    ///
    /// Environment overrides use the `PORTICO_` prefix with `__` nesting,
    /// e.g. `PORTICO_TIMEOUTS__REQUEST_TIMEOUT_MS=5000`. `APP_ENV` selects
    /// the profile; `KB_STATE_DAEMON_URL` supplies the State Broker URL.
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        let mut figment = Figment::new();

        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        } else {
            for default_path in &["portico.yaml", "/etc/portico/portico.yaml", "config/portico.yaml"]
            {
                if std::path::Path::new(default_path).exists() {
                    figment = figment.merge(Yaml::file(default_path));
                    break;
                }
            }
        }

        figment = figment.merge(Env::prefixed("PORTICO_").split("__"));

        let mut config: Self = figment.extract()?;

        if let Ok(app_env) = std::env::var("APP_ENV")
            && let Some(profile) = Profile::from_env_value(&app_env)
        {
            config.profile = profile;
        }
        if config.state_daemon_url.is_none()
            && let Ok(url) = std::env::var("KB_STATE_DAEMON_URL")
        {
            config.state_daemon_url = Some(url);
        }

        config.base_path = crate::paths::normalize_base_path(&config.base_path);
        Ok(config)
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid listener address: {e}"))
    }

    /// Effective CORS profile: explicit `cors.profile` or the deployment
    /// profile.
    pub fn cors_profile(&self) -> Profile {
        self.cors.profile.unwrap_or(self.profile)
    }

    /// Effective discovery-snapshot TTL in milliseconds.
    pub fn snapshot_ttl_ms(&self) -> u64 {
        self.cache.ttl_ms.unwrap_or(match self.profile {
            Profile::Dev => 10 * 60 * 1000,
            Profile::Preview | Profile::Prod => 60 * 60 * 1000,
        })
    }

    /// Whether internal error messages may be exposed in envelopes.
    pub fn expose_internal_errors(&self) -> bool {
        self.profile == Profile::Dev
    }
}

// Default implementations

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            profile: Profile::Dev,
            host: default_host(),
            port: default_port(),
            base_path: default_base_path(),
            api_version: default_api_version(),
            timeouts: TimeoutConfig::default(),
            cors: CorsConfig::default(),
            rate_limit: None,
            events: EventsConfig::default(),
            http2: Http2Config::default(),
            ssl: None,
            plugins: PluginsConfig::default(),
            redis: None,
            cache: CacheConfig::default(),
            state_daemon_url: None,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout(),
            body_limit: default_body_limit(),
        }
    }
}

impl Default for RegistryEventsConfig {
    fn default() -> Self {
        Self {
            token: None,
            header_name: default_events_header(),
            query_param: default_events_query_param(),
        }
    }
}

impl Default for Http2Config {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_http1: true,
        }
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: default_plugins_dir(),
            granted_capabilities: default_granted_capabilities(),
        }
    }
}

// Serde default functions

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7340
}

fn default_base_path() -> String {
    "/api/v1".to_string()
}

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_body_limit() -> usize {
    1024 * 1024 // 1MB
}

fn default_rate_limit_max() -> u64 {
    120
}

fn default_rate_limit_window() -> u64 {
    60_000
}

fn default_events_header() -> String {
    "authorization".to_string()
}

fn default_events_query_param() -> String {
    "access_token".to_string()
}

fn default_plugins_dir() -> PathBuf {
    PathBuf::from("plugins")
}

fn default_granted_capabilities() -> Vec<String> {
    vec![
        "fs:read".to_string(),
        "net:request".to_string(),
        "state:access".to_string(),
    ]
}

fn default_true() -> bool {
    true
}
