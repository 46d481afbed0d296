//! Command-line interface definitions.
//!
//! This module defines the operator CLI (`cache-cli`) using clap. The CLI
//! talks to the shared Redis store directly and uses the same key layout as
//! the library, so it can inspect and invalidate what running services cache.

use clap::{Parser, Subcommand};

/// Inspect and manage a shared cache.
#[derive(Parser, Debug)]
#[command(name = "cache-cli")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Redis URL of the shared store.
    #[arg(
        long,
        env = "CACHE_REMOTE_URL",
        default_value = "redis://127.0.0.1:6379"
    )]
    pub remote_url: String,

    /// Prefix prepended to every key.
    #[arg(long, env = "CACHE_KEY_PREFIX", default_value = "app:")]
    pub prefix: String,

    /// Per-command timeout in seconds.
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,

    /// The command to execute.
    #[command(subcommand)]
    pub command: CliCommand,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Get a value by key.
    ///
    /// Prints the stored JSON, or nothing when the key is absent.
    Get {
        key: String,
        #[arg(long)]
        segment: Option<String>,
    },

    /// Store a value.
    ///
    /// The value is parsed as JSON; anything that is not valid JSON is
    /// stored as a string.
    Set {
        key: String,
        value: String,
        /// Time to live in seconds.
        #[arg(long)]
        ttl: Option<u64>,
        #[arg(long)]
        segment: Option<String>,
    },

    /// Remove a key.
    Invalidate {
        key: String,
        #[arg(long)]
        segment: Option<String>,
    },

    /// Remove every key under the prefix, or one segment.
    Clear {
        #[arg(long)]
        segment: Option<String>,
    },

    /// List stored keys.
    Keys {
        #[arg(long)]
        segment: Option<String>,
    },

    /// Check that the store is reachable.
    Health,
}

/// Interpret a command-line value as JSON, falling back to a plain string.
pub fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}
