use std::env;
use std::time::Duration;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub jwt_audience: Option<String>,
    /// Seconds a resolved bearer token stays cached; 0 disables the cache.
    pub identity_cache_ttl_secs: u64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u32,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    /// Public base URL of the image bucket, used to confirm uploads exist.
    pub image_public_url: Option<String>,
}

fn var_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            database_max_connections: var_or("DATABASE_MAX_CONNECTIONS", 10),
            redis_url: env::var("REDIS_URL")?,
            jwt_secret: env::var("JWT_SECRET")?,
            jwt_issuer: optional_var("JWT_ISSUER"),
            jwt_audience: optional_var("JWT_AUDIENCE"),
            identity_cache_ttl_secs: var_or("IDENTITY_CACHE_TTL", 300),
            rate_limit_window_secs: var_or("RATE_LIMIT_WINDOW", 60),
            rate_limit_requests: var_or("RATE_LIMIT_REQUESTS", 100),
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            server_port: var_or("SERVER_PORT", 3000),
            api_base_uri: env::var("API_BASE_URI").unwrap_or_else(|_| "/api".into()),
            image_public_url: optional_var("IMAGE_PUBLIC_URL"),
        })
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn identity_cache_ttl(&self) -> Option<Duration> {
        (self.identity_cache_ttl_secs > 0).then(|| Duration::from_secs(self.identity_cache_ttl_secs))
    }
}

#[cfg(test)]
impl Config {
    /// Settings for in-process router tests; nothing here is ever dialed.
    pub fn for_tests() -> Self {
        Config {
            database_url: "postgres://localhost/toolkudu_test".into(),
            database_max_connections: 1,
            redis_url: "redis://127.0.0.1/".into(),
            jwt_secret: "test-secret".into(),
            jwt_issuer: None,
            jwt_audience: None,
            identity_cache_ttl_secs: 0,
            rate_limit_window_secs: 60,
            rate_limit_requests: 100,
            server_host: "127.0.0.1".into(),
            server_port: 0,
            api_base_uri: "/api".into(),
            image_public_url: None,
        }
    }
}
