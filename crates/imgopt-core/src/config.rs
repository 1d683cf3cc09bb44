//! Configuration module
//!
//! Settings are read once at startup from the process environment (a `.env` file
//! is honoured through `dotenvy`). Values that can be changed later from the admin
//! panel only provide the initial state here; see [`crate::models::AdminSettings`].

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::models::AdminSettings;

const SERVER_PORT: u16 = 8000;
const SESSION_TTL_HOURS: i64 = 8;
const HTTP_CONCURRENCY_LIMIT: usize = 10_000;
const REQUEST_TIMEOUT_SECS: u64 = 60;
const WORKER_PROCESSES: usize = 2;
const THREADS_PER_WORKER: usize = 8;
const RETENTION_DAYS: u32 = 30;
const PURGE_INTERVAL_SECS: u64 = 3600;
const WORKER_POLL_INTERVAL_MS: u64 = 1000;
const BATCH_TIMEOUT_SECS: u64 = 12 * 3600;
const MAX_UPLOAD_SIZE_MB: usize = 50;
const IMAGE_FETCH_TIMEOUT_SECS: u64 = 25;
const IMAGE_MIN_SIDE: u32 = 600;
const JPEG_QUALITY: u8 = 90;
const DEFAULT_ADMIN_PASSWORD: &str = "change-me";

/// Settings for the HTTP surface
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub environment: String,
    pub cors_origins: Vec<String>,
    /// Prefix under which every route is mounted, e.g. `/imgopt`. Empty for root.
    pub base_path: String,
    /// Externally visible origin + base path used to build image URLs.
    pub public_base_url: String,
    pub admin_password: String,
    pub session_ttl_hours: i64,
    pub http_concurrency_limit: usize,
    pub request_timeout_secs: u64,
}

/// Batch processing configuration
#[derive(Clone, Debug)]
pub struct ProcessorConfig {
    pub base: BaseConfig,
    pub storage_root: PathBuf,
    pub max_upload_size_bytes: usize,
    // Initial admin settings
    pub worker_processes: usize,
    pub threads_per_worker: usize,
    pub retention_days: u32,
    pub auto_purge_enabled: bool,
    // Scheduling
    pub purge_interval_secs: u64,
    pub worker_poll_interval_ms: u64,
    pub batch_timeout_secs: u64,
    // Image pipeline
    pub image_fetch_timeout_secs: u64,
    pub image_min_side: u32,
    pub jpeg_quality: u8,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<ProcessorConfig>);

impl Config {
    fn as_processor(&self) -> &ProcessorConfig {
        &self.0
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        let config = ProcessorConfig::from_lookup(|key| env::var(key).ok())?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.as_processor().validate()
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        is_production_env(&self.as_processor().base.environment)
    }

    pub fn server_port(&self) -> u16 {
        self.as_processor().base.server_port
    }

    pub fn environment(&self) -> &str {
        &self.as_processor().base.environment
    }

    pub fn cors_origins(&self) -> &[String] {
        &self.as_processor().base.cors_origins
    }

    pub fn base_path(&self) -> &str {
        &self.as_processor().base.base_path
    }

    pub fn public_base_url(&self) -> &str {
        &self.as_processor().base.public_base_url
    }

    pub fn admin_password(&self) -> &str {
        &self.as_processor().base.admin_password
    }

    pub fn session_ttl_hours(&self) -> i64 {
        self.as_processor().base.session_ttl_hours
    }

    pub fn http_concurrency_limit(&self) -> usize {
        self.as_processor().base.http_concurrency_limit
    }

    pub fn request_timeout_secs(&self) -> u64 {
        self.as_processor().base.request_timeout_secs
    }

    pub fn storage_root(&self) -> &PathBuf {
        &self.as_processor().storage_root
    }

    pub fn max_upload_size_bytes(&self) -> usize {
        self.as_processor().max_upload_size_bytes
    }

    pub fn purge_interval_secs(&self) -> u64 {
        self.as_processor().purge_interval_secs
    }

    pub fn worker_poll_interval_ms(&self) -> u64 {
        self.as_processor().worker_poll_interval_ms
    }

    pub fn batch_timeout_secs(&self) -> u64 {
        self.as_processor().batch_timeout_secs
    }

    pub fn image_fetch_timeout_secs(&self) -> u64 {
        self.as_processor().image_fetch_timeout_secs
    }

    pub fn image_min_side(&self) -> u32 {
        self.as_processor().image_min_side
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.as_processor().jpeg_quality
    }

    /// Admin settings the service starts with when nothing was persisted yet.
    pub fn initial_admin_settings(&self) -> AdminSettings {
        let c = self.as_processor();
        AdminSettings {
            desired_workers: c.worker_processes,
            threads_per_batch: c.threads_per_worker,
            retention_days: c.retention_days,
            auto_purge: c.auto_purge_enabled,
        }
        .sanitized()
    }
}

fn is_production_env(environment: &str) -> bool {
    let env = environment.to_lowercase();
    env == "production" || env == "prod"
}

/// Parse `key` if it is set. An empty value counts as unset; anything else that does
/// not parse is an error naming the key.
fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, anyhow::Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => v
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", key, v, e)),
        _ => Ok(default),
    }
}

fn parse_bool_or<F>(lookup: &F, key: &str, default: bool) -> Result<bool, anyhow::Error>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) if !v.is_empty() => Err(anyhow::anyhow!(
            "{} has an invalid value '{}': expected true or false",
            key,
            v
        )),
        _ => Ok(default),
    }
}

/// Normalise a mount prefix to either `""` or `/segment[/segment…]` without a trailing slash.
pub fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

impl ProcessorConfig {
    /// Build the configuration from an arbitrary key lookup.
    ///
    /// `Config::from_env` passes the process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("ENVIRONMENT")
            .or_else(|| lookup("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());

        let cors_origins_str = lookup("CORS_ORIGINS").unwrap_or_else(|| "*".to_string());
        if is_production_env(&environment) && cors_origins_str.trim() == "*" {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }
        let cors_origins: Vec<String> = cors_origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let server_port = parse_or(&lookup, "PORT", SERVER_PORT)?;
        let base_path = normalize_base_path(&lookup("BASE_PATH").unwrap_or_default());
        let public_base_url = lookup("PUBLIC_BASE_URL")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| format!("http://localhost:{}{}", server_port, base_path));

        let max_upload_size_mb = parse_or(&lookup, "MAX_UPLOAD_SIZE_MB", MAX_UPLOAD_SIZE_MB)?;

        Ok(Self {
            base: BaseConfig {
                server_port,
                environment,
                cors_origins,
                base_path,
                public_base_url,
                admin_password: lookup("ADMIN_PASSWORD")
                    .unwrap_or_else(|| DEFAULT_ADMIN_PASSWORD.to_string()),
                session_ttl_hours: parse_or(&lookup, "SESSION_TTL_HOURS", SESSION_TTL_HOURS)?,
                http_concurrency_limit: parse_or(
                    &lookup,
                    "HTTP_CONCURRENCY_LIMIT",
                    HTTP_CONCURRENCY_LIMIT,
                )?,
                request_timeout_secs: parse_or(&lookup, "REQUEST_TIMEOUT_SECS", REQUEST_TIMEOUT_SECS)?,
            },
            storage_root: PathBuf::from(
                lookup("STORAGE_ROOT").unwrap_or_else(|| "./data".to_string()),
            ),
            max_upload_size_bytes: max_upload_size_mb * 1024 * 1024,
            worker_processes: parse_or(&lookup, "WORKER_PROCESSES", WORKER_PROCESSES)?,
            threads_per_worker: parse_or(&lookup, "THREADS_PER_WORKER", THREADS_PER_WORKER)?,
            retention_days: parse_or(&lookup, "RETENTION_DAYS", RETENTION_DAYS)?,
            auto_purge_enabled: parse_bool_or(&lookup, "AUTO_PURGE_ENABLED", false)?,
            purge_interval_secs: parse_or(&lookup, "PURGE_INTERVAL_SECS", PURGE_INTERVAL_SECS)?,
            worker_poll_interval_ms: parse_or(
                &lookup,
                "WORKER_POLL_INTERVAL_MS",
                WORKER_POLL_INTERVAL_MS,
            )?,
            batch_timeout_secs: parse_or(&lookup, "BATCH_TIMEOUT_SECS", BATCH_TIMEOUT_SECS)?,
            image_fetch_timeout_secs: parse_or(
                &lookup,
                "IMAGE_FETCH_TIMEOUT_SECS",
                IMAGE_FETCH_TIMEOUT_SECS,
            )?,
            image_min_side: parse_or(&lookup, "IMAGE_MIN_SIDE", IMAGE_MIN_SIDE)?,
            jpeg_quality: parse_or(&lookup, "JPEG_QUALITY", JPEG_QUALITY)?,
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.base.admin_password.is_empty() {
            return Err(anyhow::anyhow!("ADMIN_PASSWORD must not be empty"));
        }

        if is_production_env(&self.base.environment)
            && self.base.admin_password == DEFAULT_ADMIN_PASSWORD
        {
            return Err(anyhow::anyhow!(
                "ADMIN_PASSWORD must be changed from its default value in production"
            ));
        }

        if self.base.session_ttl_hours <= 0 {
            return Err(anyhow::anyhow!("SESSION_TTL_HOURS must be positive"));
        }

        if self.max_upload_size_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_UPLOAD_SIZE_MB must be at least 1"));
        }

        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(anyhow::anyhow!("JPEG_QUALITY must be between 1 and 100"));
        }

        if self.image_min_side == 0 {
            return Err(anyhow::anyhow!("IMAGE_MIN_SIDE must be positive"));
        }

        if self.worker_poll_interval_ms == 0 || self.purge_interval_secs == 0 {
            return Err(anyhow::anyhow!(
                "WORKER_POLL_INTERVAL_MS and PURGE_INTERVAL_SECS must be positive"
            ));
        }

        if !self.base.public_base_url.starts_with("http://")
            && !self.base.public_base_url.starts_with("https://")
        {
            return Err(anyhow::anyhow!(
                "PUBLIC_BASE_URL must be an absolute http(s) URL"
            ));
        }

        Ok(())
    }
}
