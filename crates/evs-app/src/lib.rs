#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **evs-app** – wires the mapper, recorder, event store, and repository
//! layers together from environment configuration behind a single
//! [`Application`] facade.
//!
//! ```rust,no_run
//! # async fn example() -> anyhow::Result<()> {
//! let config = evs_app::StoreConfig::from_env()?;
//! let app = evs_app::Application::from_config(&config).await?;
//! let _reader = app.log();
//! # Ok(())
//! # }
//! ```

pub mod config;

pub use config::{BackendKind, StoreConfig};

use std::sync::Arc;

use evs_eventstore::{EventStore, NotificationLogReader};
use evs_mapper::Mapper;
use evs_repository::Repository;
use evs_store_core::Recorder;
use evs_store_memory::MemoryRecorder;
use evs_store_sqlite::SqliteRecorder;
use evs_transcoder::JsonTranscoder;
use evs_types::{Aggregate, EventSourcingError, NotificationId, Version};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

/// Shared runtime state: a recorder and the mapper pipeline configured
/// for it, from which any number of per-aggregate [`Repository`]
/// instances and one [`NotificationLogReader`] are built.
pub struct Application {
    mapper: Arc<Mapper<JsonTranscoder>>,
    recorder: Arc<dyn Recorder>,
    notification_page_size: usize,
    snapshot_frequency: Option<Version>,
}

impl Application {
    /// Build the recorder and mapper pipeline described by `config`.
    pub async fn from_config(config: &StoreConfig) -> anyhow::Result<Self> {
        let recorder: Arc<dyn Recorder> = match config.backend() {
            BackendKind::Memory => {
                info!("using in-memory recorder");
                Arc::new(MemoryRecorder::new())
            }
            BackendKind::Sqlite(path) => {
                info!(path, "opening sqlite recorder");
                Arc::new(SqliteRecorder::open(path).await?)
            }
        };

        let compressor = evs_compressor::resolve(config.compressor_topic())?;
        let cipher = evs_cipher::resolve(config.cipher_topic(), config.cipher_key())?;

        let mapper = Mapper::plain().with_compressor(compressor).with_cipher(cipher);

        Ok(Self {
            mapper: Arc::new(mapper),
            recorder,
            notification_page_size: config.notification_page_size(),
            snapshot_frequency: config.snapshot_frequency(),
        })
    }

    /// Build an `Application` directly from an already-constructed
    /// recorder and mapper, bypassing environment parsing. Useful for
    /// tests and for embedding into a larger program's own wiring.
    pub fn new(
        mapper: Mapper<JsonTranscoder>,
        recorder: Arc<dyn Recorder>,
        notification_page_size: usize,
        snapshot_frequency: Option<Version>,
    ) -> Self {
        Self {
            mapper: Arc::new(mapper),
            recorder,
            notification_page_size,
            snapshot_frequency,
        }
    }

    /// Build a [`Repository`] for aggregate type `A`, sharing this
    /// application's mapper and recorder. Cheap – only clones two `Arc`s.
    pub fn repository<A>(&self, snapshot_topic: impl Into<String>) -> Repository<A, JsonTranscoder>
    where
        A: Aggregate + Serialize + DeserializeOwned,
    {
        let event_store = EventStore::from_shared(self.mapper.clone(), self.recorder.clone());
        let repository = Repository::new(event_store, snapshot_topic);
        match self.snapshot_frequency {
            Some(frequency) => repository.with_snapshot_frequency(frequency),
            None => repository,
        }
    }

    /// Build a [`NotificationLogReader`] over this application's
    /// recorder, using the configured page size.
    pub fn log(&self) -> NotificationLogReader {
        NotificationLogReader::new(self.recorder.clone(), self.notification_page_size)
    }

    /// Persist `aggregate`'s pending events through `repository`. A thin
    /// facade method so callers touch `Application` for the whole
    /// save/load/subscribe surface rather than reaching into the
    /// repository layer directly.
    pub async fn save<A>(
        &self,
        repository: &Repository<A, JsonTranscoder>,
        aggregate: &mut A,
    ) -> Result<Vec<NotificationId>, EventSourcingError>
    where
        A: Aggregate + Serialize + DeserializeOwned,
    {
        repository.save(aggregate).await
    }
}
