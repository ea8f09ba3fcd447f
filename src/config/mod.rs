use anyhow::{bail, Context};
use axum::http::StatusCode;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::idgen::DEFAULT_ID_LENGTH;
use crate::shortener::validate_base_url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub redirect_server: ServerConfig,
    /// Public prefix of every short link, e.g. `https://sho.rt`
    pub redirect_base_url: String,
    pub redirect_status: RedirectMode,
    pub short_id_length: usize,
    pub cache: CacheConfig,
    pub analytics: AnalyticsConfig,
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
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

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// 0 disables the redirect read cache
    pub max_entries: u64,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    #[default]
    None,
    Standard,
    Cloudflare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    pub enabled: bool,
    pub geoip_city_db_path: Option<String>,
    pub ip_anonymization: bool,
    pub trusted_proxy_mode: TrustedProxyMode,
    pub trusted_proxies: Vec<IpNet>,
    /// Bound of the queue between redirect handlers and visit processing
    pub visit_queue_capacity: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            geoip_city_db_path: None,
            ip_anonymization: false,
            trusted_proxy_mode: TrustedProxyMode::None,
            trusted_proxies: Vec::new(),
            visit_queue_capacity: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Per-connection outbound message queue
    pub outbound_buffer: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 256,
        }
    }
}

/// HTTP status used for successful redirects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedirectMode {
    MovedPermanently,
    #[default]
    Found,
    SeeOther,
    TemporaryRedirect,
    PermanentRedirect,
}

impl RedirectMode {
    pub fn status_code(self) -> StatusCode {
        match self {
            RedirectMode::MovedPermanently => StatusCode::MOVED_PERMANENTLY,
            RedirectMode::Found => StatusCode::FOUND,
            RedirectMode::SeeOther => StatusCode::SEE_OTHER,
            RedirectMode::TemporaryRedirect => StatusCode::TEMPORARY_REDIRECT,
            RedirectMode::PermanentRedirect => StatusCode::PERMANENT_REDIRECT,
        }
    }
}

impl std::str::FromStr for RedirectMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "301" => Ok(RedirectMode::MovedPermanently),
            "302" => Ok(RedirectMode::Found),
            "303" => Ok(RedirectMode::SeeOther),
            "307" => Ok(RedirectMode::TemporaryRedirect),
            "308" => Ok(RedirectMode::PermanentRedirect),
            other => bail!("unsupported REDIRECT_STATUS '{other}', expected 301, 302, 303, 307 or 308"),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let flag = |key: &str, default: bool| {
            lookup(key)
                .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
                .unwrap_or(default)
        };

        let backend = match var("DATABASE_BACKEND", "sqlite").to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };
        let database_url = var("DATABASE_URL", "sqlite://./linkpulse.db?mode=rwc");
        let max_connections = var("DATABASE_MAX_CONNECTIONS", "10")
            .parse::<u32>()
            .context("DATABASE_MAX_CONNECTIONS must be a positive integer")?;

        let api_port = var("API_PORT", "8080")
            .parse::<u16>()
            .context("API_PORT must be a port number")?;
        let redirect_port = var("REDIRECT_PORT", "3000")
            .parse::<u16>()
            .context("REDIRECT_PORT must be a port number")?;

        let redirect_base_url = var("REDIRECT_BASE_URL", "http://localhost:3000");
        validate_base_url(&redirect_base_url)
            .with_context(|| format!("REDIRECT_BASE_URL '{redirect_base_url}' is not usable"))?;

        let redirect_status = var("REDIRECT_STATUS", "302").parse::<RedirectMode>()?;

        let short_id_length = var("SHORT_ID_LENGTH", &DEFAULT_ID_LENGTH.to_string())
            .parse::<usize>()
            .context("SHORT_ID_LENGTH must be a positive integer")?;
        if short_id_length < DEFAULT_ID_LENGTH {
            bail!("SHORT_ID_LENGTH must be at least {DEFAULT_ID_LENGTH}");
        }

        let trusted_proxy_mode = match var("TRUSTED_PROXY_MODE", "none").to_lowercase().as_str() {
            "none" => TrustedProxyMode::None,
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'none'. Supported values: none, standard, cloudflare"
                );
                TrustedProxyMode::None
            }
        };
        let trusted_proxies = var("TRUSTED_PROXIES", "")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<IpNet>()
                    .with_context(|| format!("TRUSTED_PROXIES entry '{s}' is not a CIDR"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            api_server: ServerConfig {
                host: var("API_HOST", "127.0.0.1"),
                port: api_port,
            },
            redirect_server: ServerConfig {
                host: var("REDIRECT_HOST", "127.0.0.1"),
                port: redirect_port,
            },
            redirect_base_url,
            redirect_status,
            short_id_length,
            cache: CacheConfig {
                max_entries: var("CACHE_MAX_ENTRIES", "10000")
                    .parse()
                    .context("CACHE_MAX_ENTRIES must be an integer")?,
                ttl_secs: var("CACHE_TTL_SECS", "60")
                    .parse()
                    .context("CACHE_TTL_SECS must be an integer")?,
            },
            analytics: AnalyticsConfig {
                enabled: flag("ANALYTICS_ENABLED", true),
                geoip_city_db_path: lookup("GEOIP_CITY_DB_PATH").filter(|p| !p.is_empty()),
                ip_anonymization: flag("ANALYTICS_IP_ANONYMIZATION", false),
                trusted_proxy_mode,
                trusted_proxies,
                visit_queue_capacity: var("VISIT_QUEUE_CAPACITY", "10000")
                    .parse()
                    .context("VISIT_QUEUE_CAPACITY must be an integer")?,
            },
            realtime: RealtimeConfig {
                outbound_buffer: var("REALTIME_OUTBOUND_BUFFER", "256")
                    .parse()
                    .context("REALTIME_OUTBOUND_BUFFER must be an integer")?,
            },
        })
    }
}
