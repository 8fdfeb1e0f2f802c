#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **evs-store-memory** – in-memory, non-persistent [`Recorder`]
//! implementation.
//!
//! Fast and simple, suitable for tests and development. All data is lost
//! when the process terminates. Every mutation runs under a single
//! [`tokio::sync::Mutex`], which is how gapless, dense notification ids are
//! guaranteed: only one `insert_events` call can be assigning ids at a time
//! (spec §4.5 strategy (a), single-writer commit lock).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use evs_store_core::{validate_batch, Recorder};
use evs_types::{
    EventSourcingError, Notification, NotificationId, OriginatorId, Snapshot, StoredEvent, Version,
};
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    /// Events for each aggregate, kept sorted by `originator_version`.
    events: HashMap<OriginatorId, Vec<StoredEvent>>,
    /// The full notification sequence, in commit order. `notifications[i]`
    /// has id `i + 1`.
    notifications: Vec<Notification>,
    /// Snapshots for each aggregate, kept sorted by `originator_version`.
    snapshots: HashMap<OriginatorId, Vec<Snapshot>>,
}

impl Inner {
    fn conflicts(&self, batch: &[StoredEvent]) -> Option<(OriginatorId, Version)> {
        for event in batch {
            if let Some(existing) = self.events.get(&event.originator_id) {
                if existing
                    .iter()
                    .any(|e| e.originator_version == event.originator_version)
                {
                    return Some((event.originator_id, event.originator_version));
                }
            }
        }
        None
    }
}

/// An in-memory, non-persistent event store.
///
/// Mirrors the shape of this workspace's other in-memory backends (a single
/// lock guarding plain collections, no background tasks) but enforces the
/// [`Recorder`] contract: per-aggregate optimistic concurrency and a dense,
/// gapless notification sequence spanning every aggregate.
#[derive(Clone)]
pub struct MemoryRecorder {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRecorder {
    /// Creates a new, empty memory recorder.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Current number of stored events across all aggregates.
    pub async fn event_count(&self) -> usize {
        self.inner.lock().await.events.values().map(Vec::len).sum()
    }

    /// Clear all stored events, notifications, and snapshots. Useful for
    /// tests that want a fresh recorder without constructing a new one.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.events.clear();
        inner.notifications.clear();
        inner.snapshots.clear();
    }
}

#[async_trait]
impl Recorder for MemoryRecorder {
    async fn insert_events(
        &self,
        batch: Vec<StoredEvent>,
    ) -> Result<Vec<NotificationId>, EventSourcingError> {
        validate_batch(&batch)?;

        let mut inner = self.inner.lock().await;

        if let Some((originator_id, originator_version)) = inner.conflicts(&batch) {
            return Err(EventSourcingError::Conflict {
                originator_id,
                originator_version,
            });
        }

        let mut ids = Vec::with_capacity(batch.len());
        for event in batch {
            let next_id = inner.notifications.len() as NotificationId + 1;
            let notification = Notification {
                id: next_id,
                originator_id: event.originator_id,
                originator_version: event.originator_version,
                topic: event.topic.clone(),
                state: event.state.clone(),
            };
            inner.notifications.push(notification);
            inner
                .events
                .entry(event.originator_id)
                .or_default()
                .push(event);
            ids.push(next_id);
        }

        for events in inner.events.values_mut() {
            events.sort_by_key(|e| e.originator_version);
        }

        Ok(ids)
    }

    async fn select_events(
        &self,
        originator_id: OriginatorId,
        gt: Option<Version>,
        lte: Option<Version>,
        desc: bool,
        limit: Option<usize>,
    ) -> Result<Vec<StoredEvent>, EventSourcingError> {
        let inner = self.inner.lock().await;
        let Some(events) = inner.events.get(&originator_id) else {
            return Ok(Vec::new());
        };

        let mut selected: Vec<StoredEvent> = events
            .iter()
            .filter(|e| gt.map_or(true, |gt| e.originator_version > gt))
            .filter(|e| lte.map_or(true, |lte| e.originator_version <= lte))
            .cloned()
            .collect();

        if desc {
            selected.reverse();
        }
        if let Some(limit) = limit {
            selected.truncate(limit);
        }
        Ok(selected)
    }

    async fn select_notifications(
        &self,
        start: NotificationId,
        limit: usize,
    ) -> Result<Vec<Notification>, EventSourcingError> {
        if start == 0 {
            return Err(EventSourcingError::Programming(
                "notification ids are 1-based, start must be >= 1".to_string(),
            ));
        }
        let inner = self.inner.lock().await;
        let start_index = (start - 1) as usize;
        Ok(inner
            .notifications
            .iter()
            .skip(start_index)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn max_notification_id(&self) -> Result<NotificationId, EventSourcingError> {
        let inner = self.inner.lock().await;
        Ok(inner.notifications.len() as NotificationId)
    }

    async fn insert_snapshot(&self, snapshot: Snapshot) -> Result<(), EventSourcingError> {
        let mut inner = self.inner.lock().await;
        let entry = inner.snapshots.entry(snapshot.originator_id).or_default();
        entry.retain(|s| s.originator_version != snapshot.originator_version);
        entry.push(snapshot);
        entry.sort_by_key(|s| s.originator_version);
        Ok(())
    }

    async fn select_snapshot(
        &self,
        originator_id: OriginatorId,
        lte: Option<Version>,
    ) -> Result<Option<Snapshot>, EventSourcingError> {
        let inner = self.inner.lock().await;
        let Some(snapshots) = inner.snapshots.get(&originator_id) else {
            return Ok(None);
        };
        Ok(snapshots
            .iter()
            .filter(|s| lte.map_or(true, |lte| s.originator_version <= lte))
            .next_back()
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn event(originator_id: OriginatorId, version: Version) -> StoredEvent {
        StoredEvent {
            originator_id,
            originator_version: version,
            topic: "test:event".to_string(),
            state: vec![version as u8],
        }
    }

    #[tokio::test]
    async fn insert_and_select_events_round_trip() {
        let recorder = MemoryRecorder::new();
        let id = Uuid::new_v4();
        let ids = recorder
            .insert_events(vec![event(id, 1), event(id, 2)])
            .await
            .unwrap();
        assert_eq!(ids, vec![1, 2]);

        let events = recorder
            .select_events(id, None, None, false, None)
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].originator_version, 1);
        assert_eq!(events[1].originator_version, 2);
    }

    #[tokio::test]
    async fn insert_events_rejects_empty_batch() {
        let recorder = MemoryRecorder::new();
        assert!(matches!(
            recorder.insert_events(Vec::new()).await.unwrap_err(),
            EventSourcingError::Programming(_)
        ));
    }

    #[tokio::test]
    async fn insert_events_rejects_non_monotonic_batch() {
        let recorder = MemoryRecorder::new();
        let id = Uuid::new_v4();
        let err = recorder
            .insert_events(vec![event(id, 2), event(id, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, EventSourcingError::Programming(_)));
        assert_eq!(recorder.max_notification_id().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn insert_events_rejects_version_conflict() {
        let recorder = MemoryRecorder::new();
        let id = Uuid::new_v4();
        recorder.insert_events(vec![event(id, 1)]).await.unwrap();

        let err = recorder.insert_events(vec![event(id, 1)]).await.unwrap_err();
        assert!(matches!(err, EventSourcingError::Conflict { .. }));
    }

    #[tokio::test]
    async fn notification_ids_are_dense_across_aggregates() {
        let recorder = MemoryRecorder::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let ids = recorder
            .insert_events(vec![event(a, 1), event(b, 1), event(a, 2)])
            .await
            .unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(recorder.max_notification_id().await.unwrap(), 3);

        let notifications = recorder.select_notifications(1, 10).await.unwrap();
        assert_eq!(notifications.len(), 3);
        assert_eq!(notifications[0].id, 1);
        assert_eq!(notifications[2].id, 3);
    }

    #[tokio::test]
    async fn select_events_applies_version_bounds_and_direction() {
        let recorder = MemoryRecorder::new();
        let id = Uuid::new_v4();
        recorder
            .insert_events(vec![event(id, 1), event(id, 2), event(id, 3)])
            .await
            .unwrap();

        let bounded = recorder
            .select_events(id, Some(1), Some(3), false, None)
            .await
            .unwrap();
        assert_eq!(
            bounded.iter().map(|e| e.originator_version).collect::<Vec<_>>(),
            vec![2, 3]
        );

        let reversed = recorder
            .select_events(id, None, None, true, Some(1))
            .await
            .unwrap();
        assert_eq!(reversed.len(), 1);
        assert_eq!(reversed[0].originator_version, 3);
    }

    #[tokio::test]
    async fn snapshots_round_trip_and_select_latest_at_or_before_version() {
        let recorder = MemoryRecorder::new();
        let id = Uuid::new_v4();

        recorder
            .insert_snapshot(Snapshot {
                originator_id: id,
                originator_version: 5,
                topic: "test:snapshot".to_string(),
                state: vec![5],
            })
            .await
            .unwrap();
        recorder
            .insert_snapshot(Snapshot {
                originator_id: id,
                originator_version: 10,
                topic: "test:snapshot".to_string(),
                state: vec![10],
            })
            .await
            .unwrap();

        let latest = recorder.select_snapshot(id, None).await.unwrap().unwrap();
        assert_eq!(latest.originator_version, 10);

        let bounded = recorder
            .select_snapshot(id, Some(7))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bounded.originator_version, 5);

        assert!(recorder
            .select_snapshot(id, Some(1))
            .await
            .unwrap()
            .is_none());
    }

    proptest::proptest! {
        /// Inserting any sequence of non-empty, independently-versioned
        /// batches leaves the notification log exactly as dense as the
        /// total number of events committed, with ids 1..=total and no gaps.
        #[test]
        fn notification_ids_stay_dense_across_random_batches(
            batch_sizes in proptest::collection::vec(1usize..5, 1..8)
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let outcome: Result<(), proptest::test_runner::TestCaseError> = rt.block_on(async {
                let recorder = MemoryRecorder::new();
                let mut total = 0u64;
                for &size in &batch_sizes {
                    let id = Uuid::new_v4();
                    let batch: Vec<StoredEvent> = (1..=size as u64).map(|v| event(id, v)).collect();
                    recorder.insert_events(batch).await.unwrap();
                    total += size as u64;
                }

                let max_id = recorder.max_notification_id().await.unwrap();
                proptest::prop_assert_eq!(max_id, total);

                let notifications = recorder.select_notifications(1, total as usize).await.unwrap();
                let ids: Vec<u64> = notifications.iter().map(|n| n.id).collect();
                let expected: Vec<u64> = (1..=total).collect();
                proptest::prop_assert_eq!(ids, expected);
                Ok(())
            });
            outcome?;
        }
    }

    #[tokio::test]
    async fn clear_empties_all_state() {
        let recorder = MemoryRecorder::new();
        let id = Uuid::new_v4();
        recorder.insert_events(vec![event(id, 1)]).await.unwrap();
        assert_eq!(recorder.event_count().await, 1);

        recorder.clear().await;
        assert_eq!(recorder.event_count().await, 0);
        assert_eq!(recorder.max_notification_id().await.unwrap(), 0);
    }
}
