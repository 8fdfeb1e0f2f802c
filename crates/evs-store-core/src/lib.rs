#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **evs-store-core** – the durability and ordering nucleus.
//!
//! This crate defines the [`Recorder`] trait: the contract every storage
//! driver (in-memory, SQLite, ...) must satisfy to provide per-aggregate
//! ordering, optimistic-concurrency append, and a gapless global
//! notification sequence. It ships no concrete backend – those live in
//! sibling `evs-store-*` crates.

use std::collections::HashMap;

use async_trait::async_trait;
use evs_types::{EventSourcingError, Notification, NotificationId, OriginatorId, Snapshot, StoredEvent, Version};

//─────────────────────────────
//  Recorder
//─────────────────────────────

/// Durable append/read of event records and snapshots.
///
/// Implementations MUST document and enforce one notification-id assignment
/// strategy from spec §4.5 (a single-writer commit lock or an
/// committed-max-id watermark). Returning a notification with id `k`
/// implies every id `< k` is also readable (I2).
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Atomically append a non-empty batch of events, possibly spanning
    /// more than one aggregate. Either every event becomes visible and
    /// receives a dense, increasing notification id, or none do.
    ///
    /// Rejected with [`EventSourcingError::Conflict`] iff any event in the
    /// batch collides with an existing `(originator_id, originator_version)`
    /// – this is the whole of the optimistic-concurrency protocol. Rejected
    /// with [`EventSourcingError::Programming`] for an empty batch or a
    /// batch containing non-monotonic versions for the same aggregate.
    async fn insert_events(
        &self,
        batch: Vec<StoredEvent>,
    ) -> Result<Vec<NotificationId>, EventSourcingError>;

    /// Events for one aggregate, ordered by `originator_version`.
    ///
    /// `gt`/`lte` bound the version range (exclusive/inclusive); `desc`
    /// reverses order; `limit` caps the result length.
    async fn select_events(
        &self,
        originator_id: OriginatorId,
        gt: Option<Version>,
        lte: Option<Version>,
        desc: bool,
        limit: Option<usize>,
    ) -> Result<Vec<StoredEvent>, EventSourcingError>;

    /// Up to `limit` notifications with `id >= start`, ordered by `id`,
    /// contiguous (no gaps) among the returned items.
    async fn select_notifications(
        &self,
        start: NotificationId,
        limit: usize,
    ) -> Result<Vec<Notification>, EventSourcingError>;

    /// Highest notification id assigned so far, or 0 if none have been.
    async fn max_notification_id(&self) -> Result<NotificationId, EventSourcingError>;

    /// Persist a snapshot. Overwrites any existing snapshot at the same
    /// `(originator_id, originator_version)`.
    async fn insert_snapshot(&self, snapshot: Snapshot) -> Result<(), EventSourcingError>;

    /// Latest snapshot for `originator_id` with `originator_version <= lte`
    /// (or the latest overall if `lte` is `None`).
    async fn select_snapshot(
        &self,
        originator_id: OriginatorId,
        lte: Option<Version>,
    ) -> Result<Option<Snapshot>, EventSourcingError>;
}

/// Reject a batch that is empty or that contains non-monotonic
/// `originator_version`s for the same aggregate, per the
/// [`Recorder::insert_events`] contract. Events for different aggregates
/// may interleave in any order; within one aggregate, versions must
/// strictly increase.
///
/// Every [`Recorder`] implementation must call this before touching storage
/// so the error kind reaching the caller is always `Programming`, never a
/// backend-specific error surfaced by a primary-key violation.
pub fn validate_batch(batch: &[StoredEvent]) -> Result<(), EventSourcingError> {
    if batch.is_empty() {
        return Err(EventSourcingError::Programming(
            "insert_events requires a non-empty batch".to_string(),
        ));
    }

    let mut last_version: HashMap<OriginatorId, Version> = HashMap::new();
    for event in batch {
        if let Some(&previous) = last_version.get(&event.originator_id) {
            if event.originator_version <= previous {
                return Err(EventSourcingError::Programming(format!(
                    "non-monotonic batch for aggregate {}: version {} does not follow {previous}",
                    event.originator_id, event.originator_version
                )));
            }
        }
        last_version.insert(event.originator_id, event.originator_version);
    }

    Ok(())
}

//─────────────────────────────
//  Notification log sections
//─────────────────────────────

/// A contiguous, inclusive, 1-based range of notification ids, e.g.
/// `"1,10"`. Trailing sections may be partial if fewer notifications exist
/// than the range requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionId {
    /// First id in the range (inclusive).
    pub start: NotificationId,
    /// Last id in the range (inclusive).
    pub end: NotificationId,
}

impl SectionId {
    /// Build a section id, rejecting `start == 0` or `start > end`.
    pub fn new(start: NotificationId, end: NotificationId) -> Result<Self, EventSourcingError> {
        if start == 0 {
            return Err(EventSourcingError::Programming(
                "section start must be >= 1".to_string(),
            ));
        }
        if start > end {
            return Err(EventSourcingError::Programming(format!(
                "section start {start} must be <= end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Number of notifications this section requests (not necessarily the
    /// number actually present).
    pub fn requested_len(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    /// Parse the ASCII `"<start>,<end>"` format from spec §6.
    pub fn parse(raw: &str) -> Result<Self, EventSourcingError> {
        let (start_raw, end_raw) = raw.split_once(',').ok_or_else(|| {
            EventSourcingError::Programming(format!("malformed section id {raw:?}"))
        })?;
        let start: NotificationId = start_raw
            .trim()
            .parse()
            .map_err(|_| EventSourcingError::Programming(format!("malformed section id {raw:?}")))?;
        let end: NotificationId = end_raw
            .trim()
            .parse()
            .map_err(|_| EventSourcingError::Programming(format!("malformed section id {raw:?}")))?;
        Self::new(start, end)
    }
}

impl std::fmt::Display for SectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.start, self.end)
    }
}

/// Paged, ordered view of every notification ever committed to a
/// [`Recorder`], addressed by [`SectionId`].
pub struct NotificationLog<'a> {
    recorder: &'a dyn Recorder,
}

impl<'a> NotificationLog<'a> {
    /// Build a log view over `recorder`.
    pub fn new(recorder: &'a dyn Recorder) -> Self {
        Self { recorder }
    }

    /// Fetch one section. Returns fewer than `section.requested_len()`
    /// items (including zero) when the log hasn't reached that far yet –
    /// that is not an error.
    pub async fn section(&self, section: SectionId) -> Result<Vec<Notification>, EventSourcingError> {
        self.recorder
            .select_notifications(section.start, section.requested_len())
            .await
    }

    /// Convenience over [`NotificationLog::section`] taking the raw
    /// `"<start>,<end>"` string form.
    pub async fn section_str(&self, raw: &str) -> Result<Vec<Notification>, EventSourcingError> {
        self.section(SectionId::parse(raw)?).await
    }
}
