#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **evs-repository** – aggregate reconstitution.
//!
//! Loading folds an optional [`Snapshot`](evs_types::Snapshot) and the
//! events committed after it through [`Aggregate::mutate`]; saving appends
//! an aggregate's pending events and, every `snapshot_frequency` versions,
//! persists a fresh snapshot so the next load has less replay to do.

use evs_eventstore::EventStore;
use evs_transcoder::{JsonTranscoder, Transcoder};
use evs_types::{Aggregate, EventSourcingError, NotificationId, OriginatorId, Snapshot, Version};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Reconstitutes and persists aggregates of type `A` on top of an
/// [`EventStore`].
pub struct Repository<A: Aggregate, T: Transcoder = JsonTranscoder> {
    event_store: EventStore<T>,
    /// Topic recorded on snapshot rows, purely informational.
    snapshot_topic: String,
    /// Take a snapshot every this many committed versions. `None` disables
    /// snapshotting entirely.
    snapshot_frequency: Option<Version>,
    _marker: std::marker::PhantomData<A>,
}

impl<A, T> Repository<A, T>
where
    A: Aggregate + Serialize + DeserializeOwned,
    T: Transcoder,
{
    /// Build a repository with no snapshotting.
    pub fn new(event_store: EventStore<T>, snapshot_topic: impl Into<String>) -> Self {
        Self {
            event_store,
            snapshot_topic: snapshot_topic.into(),
            snapshot_frequency: None,
            _marker: std::marker::PhantomData,
        }
    }

    /// Snapshot every `frequency` committed versions (e.g. `10` snapshots
    /// at versions 10, 20, 30, ...). `frequency` of `0` is rejected at
    /// construction time by panicking, since it can never trigger and is
    /// almost certainly a mistake.
    pub fn with_snapshot_frequency(mut self, frequency: Version) -> Self {
        assert!(frequency > 0, "snapshot frequency must be positive");
        self.snapshot_frequency = Some(frequency);
        self
    }

    /// Load an aggregate by id, folding its latest snapshot with
    /// `originator_version <= version` (or the latest snapshot overall if
    /// `version` is `None`) with the events committed since, up to and
    /// including `version`. Passing `None` loads the current state.
    ///
    /// Fails with [`EventSourcingError::NotFound`] if neither a snapshot nor
    /// any events exist for `originator_id` at or below `version`.
    pub async fn load(
        &self,
        originator_id: OriginatorId,
        version: Option<Version>,
    ) -> Result<A, EventSourcingError> {
        let snapshot = self
            .event_store
            .recorder()
            .select_snapshot(originator_id, version)
            .await?;

        let mut state = match &snapshot {
            Some(snapshot) => Some(self.event_store.mapper().decode_state::<A>(&snapshot.state)?),
            None => None,
        };
        let since_version = snapshot.map(|snapshot| snapshot.originator_version);

        let events = self
            .event_store
            .get::<A::Event>(originator_id, since_version, version, false, None)
            .await?;

        if state.is_none() && events.is_empty() {
            return Err(EventSourcingError::NotFound(originator_id));
        }

        for event in &events {
            state = Some(A::mutate(state, event)?);
        }

        state.ok_or(EventSourcingError::NotFound(originator_id))
    }

    /// Persist an aggregate's pending events and clear its pending buffer.
    /// Returns the notification ids assigned to each event, or an empty
    /// vec if there were no pending events to save.
    ///
    /// Every `snapshot_frequency` versions (if configured), a snapshot of
    /// the post-save state is also written.
    pub async fn save(&self, aggregate: &mut A) -> Result<Vec<NotificationId>, EventSourcingError> {
        let pending = aggregate.collect_pending_events();
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let ids = self.event_store.put(&pending).await?;

        if let Some(frequency) = self.snapshot_frequency {
            if aggregate.version() % frequency == 0 {
                self.save_snapshot(aggregate).await?;
            }
        }

        Ok(ids)
    }

    /// Force a snapshot write regardless of `snapshot_frequency`.
    pub async fn save_snapshot(&self, aggregate: &A) -> Result<(), EventSourcingError> {
        let state = self.event_store.mapper().encode_state(aggregate)?;
        self.event_store
            .recorder()
            .insert_snapshot(Snapshot {
                originator_id: aggregate.id(),
                originator_version: aggregate.version(),
                topic: self.snapshot_topic.clone(),
                state,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use evs_store_memory::MemoryRecorder;
    use evs_types::{AggregateRoot, DomainEvent, EventPayload};
    use serde::Deserialize;
    use std::sync::Arc;
    use uuid::Uuid;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    enum CounterEvent {
        Created,
        Incremented { by: u32 },
    }

    impl EventPayload for CounterEvent {
        fn topic(&self) -> &'static str {
            "counter:event"
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Counter {
        root: AggregateRoot<CounterEvent>,
        total: u32,
    }

    impl Aggregate for Counter {
        type Event = CounterEvent;

        fn id(&self) -> OriginatorId {
            self.root.id()
        }
        fn version(&self) -> Version {
            self.root.version()
        }
        fn created_on(&self) -> DateTime<Utc> {
            self.root.created_on()
        }
        fn modified_on(&self) -> DateTime<Utc> {
            self.root.modified_on()
        }

        fn mutate(
            state: Option<Self>,
            event: &DomainEvent<Self::Event>,
        ) -> Result<Self, EventSourcingError> {
            match (state, &event.payload) {
                (None, CounterEvent::Created) => {
                    let mut root = AggregateRoot::new(DomainEvent {
                        originator_id: event.originator_id,
                        originator_version: event.originator_version,
                        timestamp: event.timestamp,
                        payload: event.payload.clone(),
                    })?;
                    root.collect_pending_events();
                    Ok(Self { root, total: 0 })
                }
                (Some(mut counter), CounterEvent::Incremented { by }) => {
                    counter.root.apply_replayed(event)?;
                    counter.total += by;
                    Ok(counter)
                }
                (Some(_), CounterEvent::Created) => Err(EventSourcingError::Programming(
                    "counter already created".to_string(),
                )),
                (None, CounterEvent::Incremented { .. }) => Err(EventSourcingError::Programming(
                    "counter must be created before it can be incremented".to_string(),
                )),
            }
        }

        fn pending_events(&self) -> &[DomainEvent<Self::Event>] {
            self.root.pending_events()
        }

        fn collect_pending_events(&mut self) -> Vec<DomainEvent<Self::Event>> {
            self.root.collect_pending_events()
        }
    }

    impl Counter {
        fn create(id: OriginatorId) -> Result<Self, EventSourcingError> {
            let root = AggregateRoot::new(DomainEvent {
                originator_id: id,
                originator_version: 1,
                timestamp: Utc::now(),
                payload: CounterEvent::Created,
            })?;
            Ok(Self { root, total: 0 })
        }

        fn increment(&mut self, by: u32) {
            self.root.trigger(CounterEvent::Incremented { by }, Utc::now());
            self.total += by;
        }
    }

    fn repository() -> Repository<Counter> {
        let recorder: Arc<dyn evs_store_core::Recorder> = Arc::new(MemoryRecorder::new());
        let event_store = EventStore::plain(recorder);
        Repository::new(event_store, "counter:snapshot").with_snapshot_frequency(2)
    }

    #[tokio::test]
    async fn save_then_load_reconstructs_aggregate() {
        let repo = repository();
        let id = Uuid::new_v4();

        let mut counter = Counter::create(id).unwrap();
        counter.increment(5);
        repo.save(&mut counter).await.unwrap();

        let loaded = repo.load(id, None).await.unwrap();
        assert_eq!(loaded.total, 5);
        assert_eq!(loaded.version(), 2);
    }

    #[tokio::test]
    async fn load_fails_with_not_found_for_unknown_aggregate() {
        let repo = repository();
        let err = repo.load(Uuid::new_v4(), None).await.unwrap_err();
        assert!(matches!(err, EventSourcingError::NotFound(_)));
    }

    #[tokio::test]
    async fn load_at_version_bounds_replay_to_that_point() {
        let repo = repository();
        let id = Uuid::new_v4();

        let mut counter = Counter::create(id).unwrap();
        counter.increment(1);
        counter.increment(10);
        repo.save(&mut counter).await.unwrap();
        assert_eq!(counter.version(), 3);

        let at_version_2 = repo.load(id, Some(2)).await.unwrap();
        assert_eq!(at_version_2.version(), 2);
        assert_eq!(at_version_2.total, 1);

        let current = repo.load(id, None).await.unwrap();
        assert_eq!(current.version(), 3);
        assert_eq!(current.total, 11);
    }

    #[tokio::test]
    async fn snapshot_frequency_shortcuts_replay() {
        let repo = repository();
        let id = Uuid::new_v4();

        let mut counter = Counter::create(id).unwrap();
        counter.increment(1);
        repo.save(&mut counter).await.unwrap();

        // Snapshot should now exist at version 2.
        let snapshot = repo
            .event_store
            .recorder()
            .select_snapshot(id, None)
            .await
            .unwrap();
        assert!(snapshot.is_some());
        assert_eq!(snapshot.unwrap().originator_version, 2);

        counter.increment(10);
        repo.save(&mut counter).await.unwrap();

        let loaded = repo.load(id, None).await.unwrap();
        assert_eq!(loaded.total, 11);
        assert_eq!(loaded.version(), 3);
    }
}
