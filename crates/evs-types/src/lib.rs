#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **evs-types** – Core data model for the event-sourcing persistence core.
//!
//! This crate defines the contracts that sit between domain code and the
//! storage layer: the shape of a domain event, the aggregate contract it
//! must satisfy to be replayed, and the backend-agnostic stored-record types
//! (`StoredEvent`, `Notification`, `Snapshot`) that the recorder persists.
//! It deliberately knows nothing about encoding, compression, encryption, or
//! any concrete database – those live in sibling crates that depend on this
//! one.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

//─────────────────────────────
//  Core identifiers
//─────────────────────────────

/// Stable identifier of an aggregate across its whole lifetime.
pub type OriginatorId = Uuid;

/// Per-aggregate monotonic event sequence number. Starts at 1.
pub type Version = u64;

/// Globally dense, monotonic identifier assigned to a [`Notification`].
pub type NotificationId = u64;

/// Validate a version per I1 / the "Version 0 or negative" boundary in the
/// spec: zero is never a valid `originator_version`.
pub fn validate_version(version: Version) -> Result<(), EventSourcingError> {
    if version == 0 {
        return Err(EventSourcingError::Programming(
            "originator_version must be >= 1".to_string(),
        ));
    }
    Ok(())
}

//─────────────────────────────
//  Error taxonomy
//─────────────────────────────

/// Errors raised by the event-sourcing core, grouped by kind rather than by
/// originating crate so callers can pattern-match on "what kind of problem
/// is this" regardless of which layer raised it.
#[derive(Debug, thiserror::Error)]
pub enum EventSourcingError {
    /// Optimistic concurrency violation: an event collided with an existing
    /// `(originator_id, originator_version)`. Not fatal – the caller may
    /// reload and retry.
    #[error("conflict appending to aggregate {originator_id} at version {originator_version}")]
    Conflict {
        /// Aggregate the conflicting append targeted.
        originator_id: OriginatorId,
        /// Version that was already occupied.
        originator_version: Version,
    },

    /// No events (and no snapshot) exist for the requested aggregate id, or
    /// the requested version exceeds stored history.
    #[error("no events found for aggregate {0}")]
    NotFound(OriginatorId),

    /// Unknown type or malformed payload at encode/decode time.
    #[error("transcoding failed: {0}")]
    Transcoding(String),

    /// Ciphertext tampering, decompression failure, checksum mismatch, or
    /// other corrupted-record condition.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// Underlying storage backend I/O failure. Retryable-ness is
    /// backend-specific; the core never retries implicitly.
    #[error("persistence backend failure: {0}")]
    Persistence(String),

    /// Contract violation: empty batch, non-monotonic versions within a
    /// batch, unregistered topic, etc. Always a bug in the caller.
    #[error("programming error: {0}")]
    Programming(String),
}

//─────────────────────────────
//  Domain events
//─────────────────────────────

/// Marker implemented by event payload types.
///
/// `topic` is an instance method rather than an associated constant because
/// a single aggregate's event type is typically an enum with one variant per
/// "kind"; each variant carries its own stable `"<namespace>:<name>"` topic.
pub trait EventPayload:
    Serialize + DeserializeOwned + Clone + fmt::Debug + PartialEq + Send + Sync + 'static
{
    /// Stable, location-independent topic for this event's kind.
    fn topic(&self) -> &'static str;

    /// Schema version of the *current* code's shape for this event's kind.
    /// Bump this when a payload's fields change in a way that needs an
    /// upcaster; defaults to 1 for event kinds that have never changed.
    fn schema_version(&self) -> u16 {
        1
    }
}

/// An immutable fact about an aggregate: essential metadata plus a
/// kind-specific payload. Two events with the same `(originator_id,
/// originator_version)` are forbidden (I1) – the recorder enforces this.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(bound = "E: EventPayload")]
pub struct DomainEvent<E: EventPayload> {
    /// Aggregate this event belongs to.
    pub originator_id: OriginatorId,
    /// Position of this event within the aggregate's history.
    pub originator_version: Version,
    /// Wall-clock time the event was triggered.
    pub timestamp: DateTime<Utc>,
    /// Event-kind-specific payload.
    pub payload: E,
}

impl<E: EventPayload> DomainEvent<E> {
    /// Stable topic string for this event, delegated to the payload.
    pub fn topic(&self) -> &'static str {
        self.payload.topic()
    }
}

//─────────────────────────────
//  Aggregates
//─────────────────────────────

/// Contract an aggregate must satisfy to be persisted and reconstituted by
/// the store. Business logic (command validation, invariants beyond
/// ordering) is an external collaborator's concern; this trait only covers
/// what the append/replay protocol needs.
pub trait Aggregate: Sized + Send + Sync + Clone + fmt::Debug {
    /// The event-kind enum/struct this aggregate kind is built from.
    type Event: EventPayload;

    /// Stable aggregate identifier.
    fn id(&self) -> OriginatorId;

    /// Version of the last event applied (I3).
    fn version(&self) -> Version;

    /// Timestamp of the creation event.
    fn created_on(&self) -> DateTime<Utc>;

    /// Timestamp of the most recently applied event.
    fn modified_on(&self) -> DateTime<Utc>;

    /// Fold a single event onto prior state. `state = None` is only valid
    /// for the creation event (`event.originator_version == 1`); any other
    /// combination is a [`EventSourcingError::Programming`] bug in the
    /// caller, not a recoverable condition.
    fn mutate(
        state: Option<Self>,
        event: &DomainEvent<Self::Event>,
    ) -> Result<Self, EventSourcingError>;

    /// Pending (uncommitted) events recorded since the aggregate was loaded
    /// or created, in application order.
    fn pending_events(&self) -> &[DomainEvent<Self::Event>];

    /// Drain and empty the pending-event buffer (I4). Events returned here
    /// are already applied to `self`'s state; the caller is handing them to
    /// the store for durability, not replaying them again.
    fn collect_pending_events(&mut self) -> Vec<DomainEvent<Self::Event>>;
}

/// Bookkeeping every aggregate needs: identity, version, timestamps, and the
/// pending-event buffer. Concrete aggregates embed this by composition
/// (spec §9: "replace class inheritance with a capability set") and
/// delegate the bookkeeping half of [`Aggregate`] to it, implementing only
/// `mutate` themselves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(bound = "E: EventPayload")]
pub struct AggregateRoot<E: EventPayload> {
    id: OriginatorId,
    version: Version,
    created_on: DateTime<Utc>,
    modified_on: DateTime<Utc>,
    #[serde(skip)]
    pending: Vec<DomainEvent<E>>,
}

impl<E: EventPayload> AggregateRoot<E> {
    /// Build the root from the creation event (`originator_version == 1`).
    /// Returns a [`EventSourcingError::Programming`] error if the event's
    /// version is not 1.
    pub fn new(created: DomainEvent<E>) -> Result<Self, EventSourcingError> {
        if created.originator_version != 1 {
            return Err(EventSourcingError::Programming(format!(
                "creation event must have originator_version 1, got {}",
                created.originator_version
            )));
        }
        Ok(Self {
            id: created.originator_id,
            version: 1,
            created_on: created.timestamp,
            modified_on: created.timestamp,
            pending: vec![created],
        })
    }

    /// Reconstruct the root's bookkeeping from an already-applied event
    /// during replay (no pending buffer entry, since replayed events are
    /// historical, not newly triggered).
    pub fn apply_replayed(&mut self, event: &DomainEvent<E>) -> Result<(), EventSourcingError> {
        self.expect_next_version(event.originator_version)?;
        self.version = event.originator_version;
        self.modified_on = event.timestamp;
        Ok(())
    }

    /// Record a newly triggered event: bump version, update `modified_on`,
    /// and append to the pending buffer. Returns the event so callers can
    /// also fold it into their own state in the same call.
    pub fn trigger(&mut self, payload: E, timestamp: DateTime<Utc>) -> DomainEvent<E> {
        self.version += 1;
        self.modified_on = timestamp;
        let event = DomainEvent {
            originator_id: self.id,
            originator_version: self.version,
            timestamp,
            payload,
        };
        self.pending.push(event.clone());
        event
    }

    fn expect_next_version(&self, version: Version) -> Result<(), EventSourcingError> {
        let expected = self.version + 1;
        if version != expected {
            return Err(EventSourcingError::Programming(format!(
                "non-monotonic replay for aggregate {}: expected version {expected}, got {version}",
                self.id
            )));
        }
        Ok(())
    }

    /// See [`Aggregate::id`].
    pub fn id(&self) -> OriginatorId {
        self.id
    }
    /// See [`Aggregate::version`].
    pub fn version(&self) -> Version {
        self.version
    }
    /// See [`Aggregate::created_on`].
    pub fn created_on(&self) -> DateTime<Utc> {
        self.created_on
    }
    /// See [`Aggregate::modified_on`].
    pub fn modified_on(&self) -> DateTime<Utc> {
        self.modified_on
    }
    /// See [`Aggregate::pending_events`].
    pub fn pending_events(&self) -> &[DomainEvent<E>] {
        &self.pending
    }
    /// See [`Aggregate::collect_pending_events`].
    pub fn collect_pending_events(&mut self) -> Vec<DomainEvent<E>> {
        std::mem::take(&mut self.pending)
    }
}

//─────────────────────────────
//  Stored records
//─────────────────────────────

/// The recorder-level record: metadata plus the post-pipeline payload
/// bytes. Primary key is `(originator_id, originator_version)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredEvent {
    /// Aggregate this record belongs to.
    pub originator_id: OriginatorId,
    /// Position within the aggregate's history.
    pub originator_version: Version,
    /// Location-independent name identifying the event kind.
    pub topic: String,
    /// Opaque bytes: transcoded, optionally compressed, optionally
    /// encrypted payload. Fixed once encoded (I5).
    pub state: Vec<u8>,
}

/// A [`StoredEvent`] augmented with a globally monotonic, gap-free id,
/// assigned in commit order (I2).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    /// Globally dense, monotonic identifier.
    pub id: NotificationId,
    /// Aggregate this record belongs to.
    pub originator_id: OriginatorId,
    /// Position within the aggregate's history.
    pub originator_version: Version,
    /// Location-independent name identifying the event kind.
    pub topic: String,
    /// Opaque, pipeline-processed payload bytes.
    pub state: Vec<u8>,
}

impl Notification {
    /// View this notification as a [`StoredEvent`], discarding the
    /// notification id.
    pub fn as_stored_event(&self) -> StoredEvent {
        StoredEvent {
            originator_id: self.originator_id,
            originator_version: self.originator_version,
            topic: self.topic.clone(),
            state: self.state.clone(),
        }
    }
}

/// Same physical shape as [`StoredEvent`] but stored in a separate logical
/// stream: `state` encodes an aggregate's full state at `originator_version`
/// rather than a single event's payload.
pub type Snapshot = StoredEvent;
