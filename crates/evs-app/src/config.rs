//! Boundary-only configuration loading from environment variables.
//!
//! This module is not a CLI: it only knows how to turn a process's
//! environment into a [`StoreConfig`]. Anything that wants flags, config
//! files, or subcommands builds that on top of this.

use std::env;

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, Secret};
use tracing::debug;

/// Topic naming the in-memory backend for `INFRASTRUCTURE_FACTORY`.
pub const INFRASTRUCTURE_MEMORY: &str = "infrastructure:memory";
/// Topic naming the SQLite backend for `INFRASTRUCTURE_FACTORY`.
pub const INFRASTRUCTURE_SQLITE: &str = "infrastructure:sqlite";
/// Sentinel `SQLITE_DBNAME` value requesting a private in-memory database
/// even when the SQLite backend is selected.
pub const SQLITE_DBNAME_MEMORY_SENTINEL: &str = ":memory:";

/// Which [`evs_store_core::Recorder`] implementation to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    /// Non-persistent, in-process storage.
    Memory,
    /// Durable, single-file SQLite storage at the given path, or an
    /// in-memory SQLite database if the path is the
    /// [`SQLITE_DBNAME_MEMORY_SENTINEL`].
    Sqlite(String),
}

/// Everything needed to build an [`crate::Application`] from the process
/// environment, with no persistence logic of its own.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    backend: BackendKind,
    compressor_topic: Option<String>,
    cipher_topic: Option<String>,
    cipher_key: Option<Secret<String>>,
    notification_page_size: usize,
    snapshot_frequency: Option<u64>,
}

const DEFAULT_NOTIFICATION_PAGE_SIZE: usize = 100;

impl StoreConfig {
    /// Load configuration from the process environment.
    ///
    /// # Environment variables
    ///
    /// - `INFRASTRUCTURE_FACTORY` – `"infrastructure:memory"` (default) or
    ///   `"infrastructure:sqlite"`; any `POSTGRES_*`-backed topic is
    ///   rejected as out of scope for this workspace
    /// - `SQLITE_DBNAME` – file path for the SQLite backend, or `":memory:"`
    ///   for a private in-memory database (required when
    ///   `INFRASTRUCTURE_FACTORY=infrastructure:sqlite`)
    /// - `COMPRESSOR_TOPIC` – e.g. `"compressor:deflate"`; unset disables
    ///   compression
    /// - `CIPHER_TOPIC` – e.g. `"cipher:aes256gcm"`; unset disables
    ///   encryption
    /// - `CIPHER_KEY` – base64-encoded key, required when `CIPHER_TOPIC`
    ///   names a real cipher
    /// - `NOTIFICATION_PAGE_SIZE` – page size for the notification log
    ///   reader (default 100)
    /// - `SNAPSHOT_FREQUENCY` – snapshot every this many committed
    ///   versions; unset disables snapshotting
    pub fn from_env() -> Result<Self> {
        let factory = env::var("INFRASTRUCTURE_FACTORY").unwrap_or_else(|_| INFRASTRUCTURE_MEMORY.to_string());
        let backend = match factory.as_str() {
            INFRASTRUCTURE_MEMORY => BackendKind::Memory,
            INFRASTRUCTURE_SQLITE => {
                let dbname = env::var("SQLITE_DBNAME")
                    .context("SQLITE_DBNAME required when INFRASTRUCTURE_FACTORY=infrastructure:sqlite")?;
                BackendKind::Sqlite(dbname)
            }
            other if other.starts_with("infrastructure:postgres") => {
                anyhow::bail!("INFRASTRUCTURE_FACTORY {other:?} names a Postgres backend, which is out of scope for this workspace")
            }
            other => anyhow::bail!("unknown INFRASTRUCTURE_FACTORY {other:?}"),
        };

        let compressor_topic = env::var("COMPRESSOR_TOPIC").ok();
        let cipher_topic = env::var("CIPHER_TOPIC").ok();
        let cipher_key = env::var("CIPHER_KEY").ok().map(Secret::new);

        if cipher_topic.is_some() && cipher_key.is_none() {
            anyhow::bail!("CIPHER_KEY required when CIPHER_TOPIC is set");
        }

        let notification_page_size = env::var("NOTIFICATION_PAGE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_NOTIFICATION_PAGE_SIZE);

        let snapshot_frequency = env::var("SNAPSHOT_FREQUENCY").ok().and_then(|v| v.parse().ok());

        debug!(backend = ?backend, "loaded store configuration");

        Ok(Self {
            backend,
            compressor_topic,
            cipher_topic,
            cipher_key,
            notification_page_size,
            snapshot_frequency,
        })
    }

    /// Which backend to build.
    pub fn backend(&self) -> &BackendKind {
        &self.backend
    }

    /// The `COMPRESSOR_TOPIC` value, if set.
    pub fn compressor_topic(&self) -> Option<&str> {
        self.compressor_topic.as_deref()
    }

    /// The `CIPHER_TOPIC` value, if set.
    pub fn cipher_topic(&self) -> Option<&str> {
        self.cipher_topic.as_deref()
    }

    /// The `CIPHER_KEY` value, exposed only at the point of use.
    pub fn cipher_key(&self) -> Option<&str> {
        self.cipher_key.as_ref().map(|s| s.expose_secret().as_str())
    }

    /// Page size for the notification log reader.
    pub fn notification_page_size(&self) -> usize {
        self.notification_page_size
    }

    /// Snapshot frequency, if configured.
    pub fn snapshot_frequency(&self) -> Option<u64> {
        self.snapshot_frequency
    }
}
