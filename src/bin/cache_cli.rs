//! Operator CLI for a shared cache.
//!
//! Connects straight to the Redis store and uses the library's key layout.
//! Log output goes to stderr and is controlled by `RUST_LOG` (default `warn`).

use clap::Parser;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use tiered_cache::cli::{parse_value, Cli, CliCommand};
use tiered_cache::{CacheConfig, CacheOptions, CacheService, HealthState, StorageType};

fn options(segment: Option<String>, ttl: Option<u64>) -> CacheOptions {
    let mut options = CacheOptions::new();
    if let Some(segment) = segment {
        options = options.segment(segment);
    }
    if let Some(ttl) = ttl {
        options = options.ttl(Duration::from_secs(ttl));
    }
    options
}

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();

    let config = CacheConfig::new()
        .storage_type(StorageType::Remote)
        .remote_url(args.remote_url.as_str())
        .key_prefix(args.prefix.as_str())
        .operation_timeout(Duration::from_secs(args.timeout))
        .health_check_interval(Duration::ZERO)
        .metrics_flush_interval(Duration::ZERO)
        .build();

    let cache: CacheService<serde_json::Value> = match CacheService::new(config).await {
        Ok(cache) => cache,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    // the service starts degraded instead of failing
    if cache.health() == HealthState::Degraded && !matches!(args.command, CliCommand::Health) {
        eprintln!("Failed to connect to {}", args.remote_url);
        std::process::exit(1);
    }

    match args.command {
        CliCommand::Get { key, segment } => {
            let result = cache.get_with(&key, &options(segment, None)).await;
            if let Some(value) = result.value {
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
        }
        CliCommand::Set {
            key,
            value,
            ttl,
            segment,
        } => {
            cache
                .set_with(&key, parse_value(&value), &options(segment, ttl))
                .await?;
            println!("OK");
        }
        CliCommand::Invalidate { key, segment } => {
            if cache.invalidate(&key, segment.as_deref()).await {
                println!("OK");
            } else {
                println!("(not found)");
            }
        }
        CliCommand::Clear { segment } => {
            cache.clear(segment.as_deref()).await;
            println!("OK");
        }
        CliCommand::Keys { segment } => {
            for key in cache.keys(segment.as_deref()).await {
                println!("{}", key);
            }
        }
        CliCommand::Health => {
            println!("{}", cache.health());
        }
    }

    cache.destroy();
    Ok(())
}
