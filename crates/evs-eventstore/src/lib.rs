#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **evs-eventstore** – composes the [`Mapper`] and [`Recorder`] into the
//! two public surfaces application code actually calls: `put`/`get` for
//! one aggregate's event stream, and a restartable
//! [`NotificationLogReader`] for cross-aggregate projections.

use std::sync::Arc;

use async_stream::stream;
use evs_mapper::Mapper;
use evs_store_core::Recorder;
use evs_transcoder::{JsonTranscoder, Transcoder};
use evs_types::{DomainEvent, EventPayload, EventSourcingError, NotificationId, OriginatorId, Version};
use futures::stream::BoxStream;

/// Puts and gets events for aggregates, through the configured mapper
/// pipeline, onto a durable [`Recorder`].
///
/// Cheap to clone: both the mapper and the recorder are held behind
/// `Arc`, so an `Application` facade can hand out one `EventStore` per
/// aggregate-type repository without re-parsing cipher/compressor
/// configuration each time.
pub struct EventStore<T: Transcoder = JsonTranscoder> {
    mapper: Arc<Mapper<T>>,
    recorder: Arc<dyn Recorder>,
}

impl<T: Transcoder> Clone for EventStore<T> {
    fn clone(&self) -> Self {
        Self {
            mapper: self.mapper.clone(),
            recorder: self.recorder.clone(),
        }
    }
}

impl EventStore<JsonTranscoder> {
    /// An event store with the plain JSON mapper (no compression or
    /// encryption) over `recorder`.
    pub fn plain(recorder: Arc<dyn Recorder>) -> Self {
        Self::new(Mapper::plain(), recorder)
    }
}

impl<T: Transcoder> EventStore<T> {
    /// Build an event store from a configured mapper and a recorder.
    /// Register any schema upcasters on `mapper` before calling this – the
    /// mapper is moved behind an `Arc` and can no longer be mutated
    /// afterwards.
    pub fn new(mapper: Mapper<T>, recorder: Arc<dyn Recorder>) -> Self {
        Self {
            mapper: Arc::new(mapper),
            recorder,
        }
    }

    /// Build an event store sharing an already-`Arc`'d mapper, e.g. one
    /// built once and reused across several repositories.
    pub fn from_shared(mapper: Arc<Mapper<T>>, recorder: Arc<dyn Recorder>) -> Self {
        Self { mapper, recorder }
    }

    /// Append a batch of domain events, possibly spanning more than one
    /// aggregate, atomically. Returns the notification id assigned to each
    /// event, in the same order as `events`.
    ///
    /// Surfaces [`EventSourcingError::Conflict`] if any event collides with
    /// an already-stored `(originator_id, originator_version)` – the whole
    /// batch is rejected, none of it becomes visible.
    pub async fn put<E: EventPayload>(
        &self,
        events: &[DomainEvent<E>],
    ) -> Result<Vec<NotificationId>, EventSourcingError> {
        if events.is_empty() {
            return Err(EventSourcingError::Programming(
                "put requires a non-empty event batch".to_string(),
            ));
        }
        let batch = events
            .iter()
            .map(|event| self.mapper.from_domain(event))
            .collect::<Result<Vec<_>, _>>()?;
        self.recorder.insert_events(batch).await
    }

    /// Fetch one aggregate's events, optionally bounded by version, in
    /// ascending or descending order.
    pub async fn get<E: EventPayload>(
        &self,
        originator_id: OriginatorId,
        gt: Option<Version>,
        lte: Option<Version>,
        desc: bool,
        limit: Option<usize>,
    ) -> Result<Vec<DomainEvent<E>>, EventSourcingError> {
        let stored = self
            .recorder
            .select_events(originator_id, gt, lte, desc, limit)
            .await?;
        stored.iter().map(|s| self.mapper.to_domain(s)).collect()
    }

    /// Read-only access to the mapper, e.g. to encode/decode snapshot
    /// state through the same pipeline as events.
    pub fn mapper(&self) -> &Mapper<T> {
        &self.mapper
    }

    /// The shared mapper handle, for building another `EventStore` (e.g.
    /// over a different recorder) without re-parsing cipher/compressor
    /// configuration.
    pub fn shared_mapper(&self) -> Arc<Mapper<T>> {
        self.mapper.clone()
    }

    /// Access the underlying recorder directly, e.g. for snapshot storage.
    pub fn recorder(&self) -> &Arc<dyn Recorder> {
        &self.recorder
    }
}

/// Default interval between polls when the notification log has caught up
/// and is waiting for new writes.
pub const DEFAULT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(200);

/// A lazy, restartable stream over the cross-aggregate notification log.
///
/// Reading never blocks on a write in progress; a reader resumes exactly
/// where it left off by restarting from the last notification id it
/// observed, so it tolerates process restarts without external
/// checkpoint storage as long as the caller persists that id itself.
pub struct NotificationLogReader {
    recorder: Arc<dyn Recorder>,
    page_size: usize,
    poll_interval: std::time::Duration,
}

impl NotificationLogReader {
    /// Build a reader over `recorder`, paging `page_size` notifications at
    /// a time and polling every [`DEFAULT_POLL_INTERVAL`] once caught up.
    pub fn new(recorder: Arc<dyn Recorder>, page_size: usize) -> Self {
        Self {
            recorder,
            page_size,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the poll interval used once the reader has caught up to
    /// the end of the log.
    pub fn with_poll_interval(mut self, interval: std::time::Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Stream every notification with `id > after`, forever. The stream
    /// never ends on its own; callers drop it (or select against a
    /// cancellation future) to stop reading.
    pub fn stream_from(self, after: NotificationId) -> BoxStream<'static, Result<evs_types::Notification, EventSourcingError>> {
        let NotificationLogReader {
            recorder,
            page_size,
            poll_interval,
        } = self;

        Box::pin(stream! {
            let mut cursor = after;
            loop {
                let page = match recorder.select_notifications(cursor + 1, page_size).await {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                if page.is_empty() {
                    tokio::time::sleep(poll_interval).await;
                    continue;
                }

                for notification in page {
                    cursor = notification.id;
                    yield Ok(notification);
                }
            }
        })
    }

    /// Fetch one page of notifications starting at `after + 1`, without
    /// entering the infinite poll loop. Useful for batch projections that
    /// want to drive their own scheduling.
    pub async fn read_page(
        &self,
        after: NotificationId,
    ) -> Result<Vec<evs_types::Notification>, EventSourcingError> {
        self.recorder.select_notifications(after + 1, self.page_size).await
    }

    /// The default terminating read: page through every notification with
    /// `id > after` and stop as soon as a page comes back shorter than
    /// `page_size`, i.e. the log has been caught up to. Unlike
    /// [`NotificationLogReader::stream_from`], this never waits for new
    /// writes – it is the "must terminate ... unless configured to poll"
    /// behavior, with `stream_from` as the opt-in polling mode.
    pub async fn drain_from(
        &self,
        after: NotificationId,
    ) -> Result<Vec<evs_types::Notification>, EventSourcingError> {
        let mut cursor = after;
        let mut collected = Vec::new();
        loop {
            let page = self.read_page(cursor).await?;
            let page_len = page.len();
            if let Some(last) = page.last() {
                cursor = last.id;
            }
            collected.extend(page);
            if page_len < self.page_size {
                return Ok(collected);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use evs_store_memory::MemoryRecorder;
    use futures::StreamExt;
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Counted {
        n: u32,
    }

    impl EventPayload for Counted {
        fn topic(&self) -> &'static str {
            "test:counted"
        }
    }

    fn event(originator_id: OriginatorId, version: Version, n: u32) -> DomainEvent<Counted> {
        DomainEvent {
            originator_id,
            originator_version: version,
            timestamp: Utc::now(),
            payload: Counted { n },
        }
    }

    #[tokio::test]
    async fn put_and_get_round_trip_one_aggregate() {
        let recorder: Arc<dyn Recorder> = Arc::new(MemoryRecorder::new());
        let store = EventStore::plain(recorder);
        let id = Uuid::new_v4();

        let events = vec![event(id, 1, 1), event(id, 2, 2)];
        let ids = store.put(&events).await.unwrap();
        assert_eq!(ids, vec![1, 2]);

        let fetched: Vec<DomainEvent<Counted>> = store.get(id, None, None, false, None).await.unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].payload.n, 1);
        assert_eq!(fetched[1].payload.n, 2);
    }

    #[tokio::test]
    async fn put_rejects_empty_batch() {
        let recorder: Arc<dyn Recorder> = Arc::new(MemoryRecorder::new());
        let store = EventStore::plain(recorder);
        let empty: Vec<DomainEvent<Counted>> = Vec::new();
        assert!(store.put(&empty).await.is_err());
    }

    #[tokio::test]
    async fn put_surfaces_conflict_on_version_collision() {
        let recorder: Arc<dyn Recorder> = Arc::new(MemoryRecorder::new());
        let store = EventStore::plain(recorder);
        let id = Uuid::new_v4();

        store.put(&[event(id, 1, 1)]).await.unwrap();
        let err = store.put(&[event(id, 1, 99)]).await.unwrap_err();
        assert!(matches!(err, EventSourcingError::Conflict { .. }));
    }

    #[tokio::test]
    async fn notification_reader_streams_across_aggregates_and_resumes() {
        let recorder: Arc<dyn Recorder> = Arc::new(MemoryRecorder::new());
        let store = EventStore::plain(recorder.clone());

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.put(&[event(a, 1, 1)]).await.unwrap();
        store.put(&[event(b, 1, 2), event(a, 2, 3)]).await.unwrap();

        let reader = NotificationLogReader::new(recorder.clone(), 10);
        let mut stream = reader.stream_from(0);

        let mut seen = Vec::new();
        for _ in 0..3 {
            let notification = stream.next().await.unwrap().unwrap();
            seen.push(notification.id);
        }
        assert_eq!(seen, vec![1, 2, 3]);
        drop(stream);

        // A fresh reader resuming from the last seen id only gets new writes.
        store.put(&[event(a, 3, 4)]).await.unwrap();
        let reader = NotificationLogReader::new(recorder, 10);
        let page = reader.read_page(3).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, 4);
    }

    #[tokio::test]
    async fn drain_from_terminates_once_caught_up() {
        let recorder: Arc<dyn Recorder> = Arc::new(MemoryRecorder::new());
        let store = EventStore::plain(recorder.clone());
        let id = Uuid::new_v4();

        for v in 1..=5u64 {
            store.put(&[event(id, v, v as u32)]).await.unwrap();
        }

        // Page size smaller than the total count, so draining takes more
        // than one `read_page` call but still returns instead of blocking.
        let reader = NotificationLogReader::new(recorder, 2);
        let drained = reader.drain_from(0).await.unwrap();
        assert_eq!(
            drained.iter().map(|n| n.id).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );
    }
}
