//! Cacher CLI
//!
//! Inspect and maintain the shared cache from a shell.

use anyhow::{Context, Result};
use cacher::{CacheConfig, RedisConfig};
use cacher_cli::{Command, execute};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "cacher")]
#[command(about = "Inspect and maintain the cache", version)]
struct Args {
    /// Redis server holding cached values
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Separate Redis server for stampede locks
    #[arg(long, env = "REDIS_LOCK_URL")]
    redis_lock_url: Option<String>,

    /// Log filter directive
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(&args.log_level, args.json_logs)?;

    let redis = args.redis_config();
    let config = CacheConfig::from_env();
    info!(
        redis_url = %redis.url,
        key_prefix = %config.key_prefix,
        environment = %config.environment,
        "Connecting to cache"
    );

    let cache = cacher::connect(&redis, config)
        .await
        .with_context(|| format!("failed to connect to {}", redis.url))?;

    execute(&cache, args.command, &mut std::io::stdout()).await
}

impl Args {
    fn redis_config(&self) -> RedisConfig {
        RedisConfig {
            url: self.redis_url.clone(),
            lock_url: self.redis_lock_url.clone(),
        }
    }
}

fn init_tracing(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_new(level).context("invalid LOG_LEVEL")?;
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so command output stays pipeable
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}
