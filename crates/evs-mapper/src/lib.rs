#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **evs-mapper** – binds event metadata and processed payload state into
//! [`StoredEvent`]s and back.
//!
//! `from_domain` runs the forward pipeline (transcode → optional compress →
//! optional encrypt); `to_domain` reverses it and applies the registered
//! upcaster chain before final decode. Topic resolution (`topic →
//! constructor`) is deterministic and side-effect free: it only consults the
//! in-memory registry built at construction time.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use evs_compressor::Compressor;
use evs_cipher::Cipher;
use evs_transcoder::{JsonTranscoder, Transcoder};
use evs_types::{DomainEvent, EventPayload, EventSourcingError, StoredEvent};
use serde::{Deserialize, Serialize};

/// A pure transform from an older on-disk payload shape to the next schema
/// version. Registered per topic, keyed by the version it upgrades *from*.
pub type UpcastFn = fn(serde_json::Value) -> serde_json::Value;

/// Everything the mapper needs to know about one topic's schema evolution.
#[derive(Default)]
struct TopicRegistration {
    /// Upcasters keyed by the schema version they transform away from.
    upcasters: HashMap<u16, UpcastFn>,
}

/// Envelope written into `StoredEvent::state` before compression/encryption.
/// Carries the event's timestamp and schema version alongside the raw
/// payload, since the stored-record schema itself has no timestamp column
/// (spec §3/§6) — it travels through the pipeline as part of the state
/// bytes instead.
#[derive(Serialize, Deserialize)]
struct Envelope<P> {
    schema_version: u16,
    timestamp: DateTime<Utc>,
    payload: P,
}

/// Binds [`DomainEvent`]s to [`StoredEvent`]s and back.
pub struct Mapper<T: Transcoder = JsonTranscoder> {
    transcoder: T,
    compressor: Option<Box<dyn Compressor>>,
    cipher: Option<Box<dyn Cipher>>,
    registrations: HashMap<String, TopicRegistration>,
}

impl Mapper<JsonTranscoder> {
    /// A mapper with no compression or encryption, suitable for tests and
    /// for deployments that don't need the optional pipeline stages.
    pub fn plain() -> Self {
        Self::new(JsonTranscoder)
    }
}

impl<T: Transcoder> Mapper<T> {
    /// Build a mapper around a transcoder, with no compressor or cipher
    /// configured yet.
    pub fn new(transcoder: T) -> Self {
        Self {
            transcoder,
            compressor: None,
            cipher: None,
            registrations: HashMap::new(),
        }
    }

    /// Attach a compressor stage.
    pub fn with_compressor(mut self, compressor: Box<dyn Compressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    /// Attach a cipher stage.
    pub fn with_cipher(mut self, cipher: Box<dyn Cipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Register an upcaster for `topic`, transforming payloads stored at
    /// schema version `from_version` up to `from_version + 1`. Chain
    /// multiple calls to cover more than one historical version.
    pub fn register_upcaster(&mut self, topic: impl Into<String>, from_version: u16, upcast: UpcastFn) {
        self.registrations
            .entry(topic.into())
            .or_default()
            .upcasters
            .insert(from_version, upcast);
    }

    /// Derive a [`StoredEvent`] from a domain event: transcode → optional
    /// compress → optional encrypt.
    pub fn from_domain<E: EventPayload>(
        &self,
        event: &DomainEvent<E>,
    ) -> Result<StoredEvent, EventSourcingError> {
        evs_types::validate_version(event.originator_version)?;

        let envelope = Envelope {
            schema_version: event.payload.schema_version(),
            timestamp: event.timestamp,
            payload: &event.payload,
        };

        let mut bytes = self.transcoder.encode(&envelope)?;
        if let Some(compressor) = &self.compressor {
            bytes = compressor.compress(&bytes)?;
        }
        if let Some(cipher) = &self.cipher {
            bytes = cipher.encrypt(&bytes)?;
        }

        Ok(StoredEvent {
            originator_id: event.originator_id,
            originator_version: event.originator_version,
            topic: event.topic().to_string(),
            state: bytes,
        })
    }

    /// Reverse a [`StoredEvent`] back into a domain event: optional decrypt
    /// → optional decompress → decode, passing the decoded payload through
    /// the upcaster chain first if it was stored at an older schema
    /// version than the current code.
    pub fn to_domain<E: EventPayload>(
        &self,
        stored: &StoredEvent,
    ) -> Result<DomainEvent<E>, EventSourcingError> {
        let mut bytes = stored.state.clone();
        if let Some(cipher) = &self.cipher {
            bytes = cipher.decrypt(&bytes)?;
        }
        if let Some(compressor) = &self.compressor {
            bytes = compressor.decompress(&bytes)?;
        }

        let envelope: Envelope<serde_json::Value> = self.transcoder.decode(&bytes)?;
        let payload_value = self.upcast(&stored.topic, envelope.schema_version, envelope.payload)?;

        let payload: E = serde_json::from_value(payload_value)
            .map_err(|e| EventSourcingError::Transcoding(e.to_string()))?;

        Ok(DomainEvent {
            originator_id: stored.originator_id,
            originator_version: stored.originator_version,
            timestamp: envelope.timestamp,
            payload,
        })
    }

    /// Run the forward pipeline (transcode → optional compress → optional
    /// encrypt) over an arbitrary serializable value, with no envelope and
    /// no upcasting. Used for snapshot state, which has no event-specific
    /// metadata of its own.
    pub fn encode_state<S: Serialize>(&self, value: &S) -> Result<Vec<u8>, EventSourcingError> {
        let mut bytes = self.transcoder.encode(value)?;
        if let Some(compressor) = &self.compressor {
            bytes = compressor.compress(&bytes)?;
        }
        if let Some(cipher) = &self.cipher {
            bytes = cipher.encrypt(&bytes)?;
        }
        Ok(bytes)
    }

    /// Reverse [`Mapper::encode_state`].
    pub fn decode_state<S: serde::de::DeserializeOwned>(
        &self,
        bytes: &[u8],
    ) -> Result<S, EventSourcingError> {
        let mut bytes = bytes.to_vec();
        if let Some(cipher) = &self.cipher {
            bytes = cipher.decrypt(&bytes)?;
        }
        if let Some(compressor) = &self.compressor {
            bytes = compressor.decompress(&bytes)?;
        }
        self.transcoder.decode(&bytes)
    }

    fn upcast(
        &self,
        topic: &str,
        stored_version: u16,
        mut value: serde_json::Value,
    ) -> Result<serde_json::Value, EventSourcingError> {
        let Some(registration) = self.registrations.get(topic) else {
            // No upcasters registered at all for this topic is fine – it
            // just means the topic has never changed shape.
            return Ok(value);
        };

        let mut version = stored_version;
        // Walk forward one version at a time so a payload two schema
        // versions behind gets both transforms applied in order.
        while let Some(upcast) = registration.upcasters.get(&version) {
            value = upcast(value);
            version += 1;
        }
        Ok(value)
    }
}
