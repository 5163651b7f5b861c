use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub mongo_database: String,
    /// Optional: without Redis the sweepers run without a cross-replica lease.
    pub redis_uri: Option<String>,
    pub jwt_secret: String,
    pub bind_addr: String,
    /// `user:password` expected by the `/metrics` Basic auth guard.
    pub metrics_auth: Option<String>,
    pub sessions: SessionsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    /// Attempts of a conditional session write before the caller gets `Conflict`.
    pub conflict_retries: usize,
    pub sweep_interval_secs: u64,
    pub sweep_batch_size: usize,
    pub retention_interval_secs: u64,
    /// Terminal sessions older than this are deleted by the retention sweep.
    pub retention_days: i64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            conflict_retries: 5,
            sweep_interval_secs: 15,
            sweep_batch_size: 200,
            retention_interval_secs: 6 * 3600,
            retention_days: 365,
        }
    }
}

impl SessionsConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention_interval_secs.max(60))
    }
}

fn setting<T: std::str::FromStr>(
    settings: &config::Config,
    key: &str,
    env_key: &str,
    default: T,
) -> T {
    settings
        .get_string(key)
        .ok()
        .or_else(|| env::var(env_key).ok())
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first (two levels up), then the local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "examprep".to_string());

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .ok()
            .filter(|uri| !uri.trim().is_empty());

        let jwt_secret = match settings
            .get_string("auth.jwt_secret")
            .or_else(|_| env::var("JWT_SECRET"))
        {
            Ok(secret) => secret,
            Err(_) if env == "prod" => {
                return Err(config::ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ))
            }
            Err(_) => {
                eprintln!("WARNING: Using default JWT_SECRET (dev mode only!)");
                "dev-secret-only-for-local-testing".to_string()
            }
        };

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        let metrics_auth = settings
            .get_string("metrics.auth")
            .or_else(|_| env::var("METRICS_AUTH"))
            .ok();

        let defaults = SessionsConfig::default();
        let sessions = SessionsConfig {
            conflict_retries: setting(
                &settings,
                "sessions.conflict_retries",
                "SESSION_CONFLICT_RETRIES",
                defaults.conflict_retries,
            ),
            sweep_interval_secs: setting(
                &settings,
                "sessions.sweep_interval_secs",
                "SWEEP_INTERVAL_SECS",
                defaults.sweep_interval_secs,
            ),
            sweep_batch_size: setting(
                &settings,
                "sessions.sweep_batch_size",
                "SWEEP_BATCH_SIZE",
                defaults.sweep_batch_size,
            ),
            retention_interval_secs: setting(
                &settings,
                "sessions.retention_interval_secs",
                "RETENTION_INTERVAL_SECS",
                defaults.retention_interval_secs,
            ),
            retention_days: setting(
                &settings,
                "sessions.retention_days",
                "RETENTION_DAYS",
                defaults.retention_days,
            ),
        };

        Ok(Config {
            mongo_uri,
            mongo_database,
            redis_uri,
            jwt_secret,
            bind_addr,
            metrics_auth,
            sessions,
        })
    }
}
