use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub track_server: ServerConfig,
    pub api_server: ServerConfig,
    pub tracking: TrackingConfig,
    pub rate_limit: RateLimitConfig,
    pub ip: IpConfig,
    pub directory_cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Cap configuration for the bounded aggregate structures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    pub map_key_cap: u32,
    pub campaign_key_cap: u32,
    pub unique_hash_cap: u32,
    /// Salt for device hashing. When unset a random salt is generated and
    /// unique counts lose stability across restarts.
    #[serde(skip_serializing, default)]
    pub device_hash_salt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Events admitted per client IP per window.
    pub events: u32,
    pub window_secs: u64,
    /// Size threshold that triggers an eviction sweep of expired windows.
    pub max_tracked_ips: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    None,
    Cloudflare,
    Standard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpConfig {
    pub trusted_proxy_mode: TrustedProxyMode,
    pub num_trusted_proxies: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_entries: u64,
    pub ttl_secs: u64,
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://./pagepulse.db".to_string());
        let max_connections = env_parse("DATABASE_MAX_CONNECTIONS", 5u32);

        let track_host = std::env::var("TRACK_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let track_port = std::env::var("TRACK_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()?;

        let api_host = std::env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let api_port = std::env::var("API_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()?;

        let map_key_cap = env_parse("MAP_KEY_CAP", 25u32);
        // The campaign budget defaults to the map cap.
        let campaign_key_cap = env_parse("CAMPAIGN_KEY_CAP", map_key_cap);
        let unique_hash_cap = env_parse("UNIQUE_HASH_CAP", 2500u32);

        let device_hash_salt = std::env::var("DEVICE_HASH_SALT").ok();
        if device_hash_salt.is_none() {
            tracing::warn!(
                "DEVICE_HASH_SALT not set, using a random salt; unique-visitor counts \
                 will not be stable across restarts"
            );
        }

        let trusted_proxy_mode = match std::env::var("TRUSTED_PROXY_MODE")
            .unwrap_or_else(|_| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "none" => TrustedProxyMode::None,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            "standard" => TrustedProxyMode::Standard,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'none'. \
                     Supported values: none, cloudflare, standard"
                );
                TrustedProxyMode::None
            }
        };

        let num_trusted_proxies = std::env::var("NUM_TRUSTED_PROXIES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok());

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            track_server: ServerConfig {
                host: track_host,
                port: track_port,
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            tracking: TrackingConfig {
                map_key_cap,
                campaign_key_cap,
                unique_hash_cap,
                device_hash_salt,
            },
            rate_limit: RateLimitConfig {
                events: env_parse("RATE_LIMIT_EVENTS", 120u32),
                window_secs: env_parse("RATE_LIMIT_WINDOW_SECS", 600u64),
                max_tracked_ips: env_parse("RATE_LIMIT_MAX_TRACKED_IPS", 100_000usize),
            },
            ip: IpConfig {
                trusted_proxy_mode,
                num_trusted_proxies,
            },
            directory_cache: CacheConfig {
                max_entries: env_parse("DIRECTORY_CACHE_MAX_ENTRIES", 10_000u64),
                ttl_secs: env_parse("DIRECTORY_CACHE_TTL_SECS", 60u64),
            },
        })
    }
}
