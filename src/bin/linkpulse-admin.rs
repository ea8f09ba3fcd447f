use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use linkpulse::analytics::{Aggregator, Bucket, StatsScope, TimeRange};
use linkpulse::api::{ApiClient, ApiClientError};
use linkpulse::config::Config;
use linkpulse::models::{now_millis, CreateUrlRequest, ShortUrl, UrlPatch};
use linkpulse::shortener::{CreateOptions, Shortener};
use linkpulse::storage;
use std::sync::Arc;
use tracing::warn;

const MILLIS_PER_HOUR: i64 = 60 * 60 * 1000;

#[derive(Parser)]
#[command(name = "linkpulse-admin")]
#[command(about = "LinkPulse short URL management CLI", long_about = None)]
struct Cli {
    /// API server that receives changes (default: http://API_HOST:API_PORT)
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Write changes to the database even when a server is running
    #[arg(long, global = true)]
    direct: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a short URL
    Create {
        /// Destination (absolute http/https URL)
        url: String,
        /// Custom slug instead of a generated id
        #[arg(long)]
        slug: Option<String>,
        /// Owner the URL belongs to
        #[arg(long)]
        owner: Option<String>,
        /// Expire after this many hours
        #[arg(long)]
        expires_in_hours: Option<i64>,
    },
    /// Show one short URL with its counters
    Show { short_id: String },
    /// Stop a short URL from redirecting
    Deactivate { short_id: String },
    /// Re-enable a deactivated short URL
    Reactivate { short_id: String },
    /// Delete a short URL
    Delete { short_id: String },
    /// Print visit stats for a short URL, or for an owner with --owner
    Stats {
        /// Short id, or owner id with --owner
        id: String,
        #[arg(long)]
        owner: bool,
        /// 24h, 7d, 30d or 90d
        #[arg(long, default_value = "7d")]
        range: TimeRange,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let storage = storage::open(&config.database).await?;
    let shortener = Shortener::new(
        Arc::clone(&storage),
        &config.redirect_base_url,
        config.short_id_length,
    )?;
    let api = if cli.direct {
        None
    } else {
        let base_url = cli
            .api_url
            .unwrap_or_else(|| format!("http://{}", config.api_server.addr()));
        Some(ApiClient::new(&base_url)?)
    };
    let admin = Admin { api, shortener };

    match cli.command {
        Commands::Create {
            url,
            slug,
            owner,
            expires_in_hours,
        } => {
            let expires_at = expires_in_hours
                .map(|hours| expiry_after_hours(now_millis(), hours))
                .transpose()?;
            let short_id = admin
                .create(CreateUrlRequest {
                    url,
                    custom_slug: slug,
                    expires_at,
                    owner_id: owner,
                })
                .await?;
            let created = admin.shortener.resolve(&short_id).await?;
            println!("✓ Created {}", admin.shortener.short_url_for(&short_id));
            print_url(&created);
        }
        Commands::Show { short_id } => {
            let url = admin.shortener.resolve(&short_id).await?;
            print_url(&url);
        }
        Commands::Deactivate { short_id } => {
            admin.set_active(&short_id, false).await?;
            println!("✓ Deactivated '{}'", short_id);
        }
        Commands::Reactivate { short_id } => {
            admin.set_active(&short_id, true).await?;
            println!("✓ Reactivated '{}'", short_id);
        }
        Commands::Delete { short_id } => {
            admin.delete(&short_id).await?;
            println!("✓ Deleted '{}'", short_id);
        }
        Commands::Stats { id, owner, range } => {
            let scope = if owner {
                StatsScope::Owner(id)
            } else {
                StatsScope::Url(id)
            };
            let stats = Aggregator::new(storage)
                .query(&scope, range, now_millis())
                .await
                .context("Failed to compute stats")?;

            println!("Time range:      {}", stats.time_range);
            println!("Total visits:    {}", stats.total_visits);
            println!("Unique visitors: {}", stats.unique_visitors);
            print_table("Countries", &stats.countries);
            print_table("Cities", &stats.cities);
            print_table("Browsers", &stats.browsers);
            print_table("Operating systems", &stats.operating_systems);
            print_table("Devices", &stats.devices);
            print_table("Referrers", &stats.referrers);
            print_table("UTM sources", &stats.sources);
            print_table("UTM campaigns", &stats.campaigns);
            println!();
            println!("Daily visits:");
            for day in &stats.time_series {
                println!("  {}  {}", day.date, day.count);
            }
        }
    }

    Ok(())
}

/// Applies changes through the running server when one answers, so its
/// redirect cache drops the old entry at once. With no server listening there
/// is no cache to keep in sync and the database is written directly.
struct Admin {
    api: Option<ApiClient>,
    shortener: Shortener,
}

impl Admin {
    async fn create(&self, request: CreateUrlRequest) -> Result<String> {
        if let Some(api) = &self.api {
            if let Some(created) = reachable(api.create(&request).await)? {
                return Ok(created.short_id);
            }
        }
        let created = self
            .shortener
            .create(
                &request.url,
                CreateOptions {
                    custom_slug: request.custom_slug,
                    expires_at: request.expires_at,
                    owner_id: request.owner_id,
                },
            )
            .await?;
        Ok(created.short_id)
    }

    async fn set_active(&self, short_id: &str, is_active: bool) -> Result<()> {
        let patch = UrlPatch {
            is_active: Some(is_active),
            ..UrlPatch::default()
        };
        if let Some(api) = &self.api {
            if reachable(api.update(short_id, &patch).await)?.is_some() {
                return Ok(());
            }
        }
        self.shortener.update(short_id, patch).await?;
        Ok(())
    }

    async fn delete(&self, short_id: &str) -> Result<()> {
        if let Some(api) = &self.api {
            if reachable(api.delete(short_id).await)?.is_some() {
                return Ok(());
            }
        }
        self.shortener.delete(short_id).await?;
        Ok(())
    }
}

/// `None` when no server is listening, so the caller falls back to the database.
fn reachable<T>(result: Result<T, ApiClientError>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ApiClientError::Unreachable(err)) => {
            warn!(error = %err, "API server not reachable, writing to the database directly");
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

fn expiry_after_hours(now: i64, hours: i64) -> Result<i64> {
    hours
        .checked_mul(MILLIS_PER_HOUR)
        .and_then(|offset| now.checked_add(offset))
        .ok_or_else(|| anyhow!("--expires-in-hours {hours} is out of range"))
}

fn format_time(millis: Option<i64>) -> String {
    millis
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".to_string())
}

fn print_url(url: &ShortUrl) {
    println!("{:<18} {}", "Short id", url.short_id);
    println!("{:<18} {}", "Destination", url.original_url);
    println!("{:<18} {}", "Owner", url.owner_id.as_deref().unwrap_or("-"));
    println!("{:<18} {}", "Active", url.is_active);
    println!("{:<18} {}", "Created", format_time(Some(url.created_at)));
    println!("{:<18} {}", "Expires", format_time(url.expires_at));
    println!("{:<18} {}", "Visits", url.visit_count);
    println!("{:<18} {}", "Last accessed", format_time(url.last_accessed_at));
}

fn print_table(title: &str, buckets: &[Bucket]) {
    if buckets.is_empty() {
        return;
    }
    println!();
    println!("{}:", title);
    println!("{}", "-".repeat(40));
    for bucket in buckets.iter().take(10) {
        println!("  {:<30} {}", bucket.key, bucket.count);
    }
}
