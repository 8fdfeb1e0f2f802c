#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **evs-store-sqlite** – SQLite-backed [`Recorder`] implementation.
//!
//! Durable, single-file storage via sqlx. Per-aggregate optimistic
//! concurrency is enforced by a primary key on `(originator_id,
//! originator_version)`; the gapless global notification sequence is
//! assigned under an in-process commit lock (spec §4.5 strategy (a)) that
//! serializes `insert_events` transactions so `MAX(notification_id) + 1`
//! is always read and claimed atomically.

use std::path::Path;

use async_trait::async_trait;
use evs_store_core::{validate_batch, Recorder};
use evs_types::{
    EventSourcingError, Notification, NotificationId, OriginatorId, Snapshot, StoredEvent, Version,
};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use uuid::Uuid;

fn persistence_err(e: sqlx::Error) -> EventSourcingError {
    EventSourcingError::Persistence(e.to_string())
}

/// A persistent [`Recorder`] backed by a SQLite database.
pub struct SqliteRecorder {
    pool: SqlitePool,
    /// Serializes `insert_events` so notification-id assignment never races
    /// (spec §4.5 strategy (a)). SQLite only has one writer at a time
    /// anyway, but the explicit lock keeps the read-max/claim-next sequence
    /// atomic even under `busy_timeout` retries.
    commit_lock: Mutex<()>,
}

impl SqliteRecorder {
    /// Opens or creates a SQLite database at `path`, running migrations.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, EventSourcingError> {
        let database_url = format!("sqlite://{}?mode=rwc", path.as_ref().display());
        let pool = SqlitePool::connect(&database_url).await.map_err(persistence_err)?;
        Self::from_pool(pool).await
    }

    /// Opens a private, in-memory SQLite database. Useful for tests.
    pub async fn in_memory() -> Result<Self, EventSourcingError> {
        let pool = SqlitePool::connect("sqlite::memory:").await.map_err(persistence_err)?;
        Self::from_pool(pool).await
    }

    /// Builds a recorder from an existing pool, running migrations.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, EventSourcingError> {
        let recorder = Self {
            pool,
            commit_lock: Mutex::new(()),
        };
        recorder.migrate().await?;
        Ok(recorder)
    }

    async fn migrate(&self) -> Result<(), EventSourcingError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stored_events (
                originator_id BLOB NOT NULL,
                originator_version INTEGER NOT NULL,
                topic TEXT NOT NULL,
                state BLOB NOT NULL,
                notification_id INTEGER NOT NULL UNIQUE,
                PRIMARY KEY (originator_id, originator_version)
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(persistence_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_stored_events_notification_id ON stored_events(notification_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(persistence_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                originator_id BLOB NOT NULL,
                originator_version INTEGER NOT NULL,
                topic TEXT NOT NULL,
                state BLOB NOT NULL,
                PRIMARY KEY (originator_id, originator_version)
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(persistence_err)?;

        Ok(())
    }

    /// Closes the underlying connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Recorder for SqliteRecorder {
    async fn insert_events(
        &self,
        batch: Vec<StoredEvent>,
    ) -> Result<Vec<NotificationId>, EventSourcingError> {
        validate_batch(&batch)?;

        let _guard = self.commit_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(persistence_err)?;

        for event in &batch {
            let exists = sqlx::query(
                "SELECT 1 FROM stored_events WHERE originator_id = ? AND originator_version = ?",
            )
            .bind(event.originator_id.as_bytes().as_slice())
            .bind(event.originator_version as i64)
            .fetch_optional(&mut *tx)
            .await
            .map_err(persistence_err)?;

            if exists.is_some() {
                tx.rollback().await.map_err(persistence_err)?;
                return Err(EventSourcingError::Conflict {
                    originator_id: event.originator_id,
                    originator_version: event.originator_version,
                });
            }
        }

        let current_max: i64 = sqlx::query("SELECT COALESCE(MAX(notification_id), 0) AS max_id FROM stored_events")
            .fetch_one(&mut *tx)
            .await
            .map_err(persistence_err)?
            .get("max_id");

        let mut next_id = current_max + 1;
        let mut ids = Vec::with_capacity(batch.len());

        for event in &batch {
            sqlx::query(
                r#"
                INSERT INTO stored_events
                    (originator_id, originator_version, topic, state, notification_id)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(event.originator_id.as_bytes().as_slice())
            .bind(event.originator_version as i64)
            .bind(&event.topic)
            .bind(&event.state)
            .bind(next_id)
            .execute(&mut *tx)
            .await
            .map_err(persistence_err)?;

            ids.push(next_id as NotificationId);
            next_id += 1;
        }

        tx.commit().await.map_err(persistence_err)?;
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
        let order = if desc { "DESC" } else { "ASC" };
        let mut sql = String::from(
            "SELECT originator_version, topic, state FROM stored_events WHERE originator_id = ?",
        );
        if gt.is_some() {
            sql.push_str(" AND originator_version > ?");
        }
        if lte.is_some() {
            sql.push_str(" AND originator_version <= ?");
        }
        sql.push_str(&format!(" ORDER BY originator_version {order}"));
        if limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query(&sql).bind(originator_id.as_bytes().as_slice());
        if let Some(gt) = gt {
            query = query.bind(gt as i64);
        }
        if let Some(lte) = lte {
            query = query.bind(lte as i64);
        }
        if let Some(limit) = limit {
            query = query.bind(limit as i64);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(persistence_err)?;
        rows.into_iter()
            .map(|row| {
                Ok(StoredEvent {
                    originator_id,
                    originator_version: row.try_get::<i64, _>("originator_version").map_err(persistence_err)? as Version,
                    topic: row.try_get("topic").map_err(persistence_err)?,
                    state: row.try_get("state").map_err(persistence_err)?,
                })
            })
            .collect()
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

        let rows = sqlx::query(
            r#"
            SELECT notification_id, originator_id, originator_version, topic, state
            FROM stored_events
            WHERE notification_id >= ?
            ORDER BY notification_id ASC
            LIMIT ?
            "#,
        )
        .bind(start as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence_err)?;

        rows.into_iter()
            .map(|row| {
                let id_bytes: Vec<u8> = row.try_get("originator_id").map_err(persistence_err)?;
                let originator_id = Uuid::from_slice(&id_bytes)
                    .map_err(|e| EventSourcingError::Persistence(format!("corrupt originator_id: {e}")))?;
                Ok(Notification {
                    id: row.try_get::<i64, _>("notification_id").map_err(persistence_err)? as NotificationId,
                    originator_id,
                    originator_version: row.try_get::<i64, _>("originator_version").map_err(persistence_err)? as Version,
                    topic: row.try_get("topic").map_err(persistence_err)?,
                    state: row.try_get("state").map_err(persistence_err)?,
                })
            })
            .collect()
    }

    async fn max_notification_id(&self) -> Result<NotificationId, EventSourcingError> {
        let max_id: i64 = sqlx::query("SELECT COALESCE(MAX(notification_id), 0) AS max_id FROM stored_events")
            .fetch_one(&self.pool)
            .await
            .map_err(persistence_err)?
            .get("max_id");
        Ok(max_id as NotificationId)
    }

    async fn insert_snapshot(&self, snapshot: Snapshot) -> Result<(), EventSourcingError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO snapshots (originator_id, originator_version, topic, state)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(snapshot.originator_id.as_bytes().as_slice())
        .bind(snapshot.originator_version as i64)
        .bind(&snapshot.topic)
        .bind(&snapshot.state)
        .execute(&self.pool)
        .await
        .map_err(persistence_err)?;
        Ok(())
    }

    async fn select_snapshot(
        &self,
        originator_id: OriginatorId,
        lte: Option<Version>,
    ) -> Result<Option<Snapshot>, EventSourcingError> {
        let mut sql = String::from(
            "SELECT originator_version, topic, state FROM snapshots WHERE originator_id = ?",
        );
        if lte.is_some() {
            sql.push_str(" AND originator_version <= ?");
        }
        sql.push_str(" ORDER BY originator_version DESC LIMIT 1");

        let mut query = sqlx::query(&sql).bind(originator_id.as_bytes().as_slice());
        if let Some(lte) = lte {
            query = query.bind(lte as i64);
        }

        let row = query.fetch_optional(&self.pool).await.map_err(persistence_err)?;
        row.map(|row| {
            Ok(Snapshot {
                originator_id,
                originator_version: row.try_get::<i64, _>("originator_version").map_err(persistence_err)? as Version,
                topic: row.try_get("topic").map_err(persistence_err)?,
                state: row.try_get("state").map_err(persistence_err)?,
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
        let recorder = SqliteRecorder::in_memory().await.unwrap();
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
    async fn insert_events_rejects_non_monotonic_batch() {
        let recorder = SqliteRecorder::in_memory().await.unwrap();
        let id = Uuid::new_v4();
        let err = recorder
            .insert_events(vec![event(id, 1), event(id, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, EventSourcingError::Programming(_)));
        assert_eq!(recorder.max_notification_id().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn insert_events_rejects_version_conflict() {
        let recorder = SqliteRecorder::in_memory().await.unwrap();
        let id = Uuid::new_v4();
        recorder.insert_events(vec![event(id, 1)]).await.unwrap();

        let err = recorder.insert_events(vec![event(id, 1)]).await.unwrap_err();
        assert!(matches!(err, EventSourcingError::Conflict { .. }));

        // The failed batch must not have left a notification id committed.
        assert_eq!(recorder.max_notification_id().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn notification_ids_are_dense_across_aggregates() {
        let recorder = SqliteRecorder::in_memory().await.unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let ids = recorder
            .insert_events(vec![event(a, 1), event(b, 1), event(a, 2)])
            .await
            .unwrap();
        assert_eq!(ids, vec![1, 2, 3]);

        let notifications = recorder.select_notifications(1, 10).await.unwrap();
        assert_eq!(notifications.len(), 3);
        assert_eq!(notifications[0].id, 1);
        assert_eq!(notifications[2].id, 3);
    }

    #[tokio::test]
    async fn select_events_applies_version_bounds_and_direction() {
        let recorder = SqliteRecorder::in_memory().await.unwrap();
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
        let recorder = SqliteRecorder::in_memory().await.unwrap();
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

        let bounded = recorder.select_snapshot(id, Some(7)).await.unwrap().unwrap();
        assert_eq!(bounded.originator_version, 5);

        assert!(recorder.select_snapshot(id, Some(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn data_persists_across_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("events.db");
        let id = Uuid::new_v4();

        {
            let recorder = SqliteRecorder::open(&db_path).await.unwrap();
            recorder.insert_events(vec![event(id, 1)]).await.unwrap();
            recorder.close().await;
        }
        {
            let recorder = SqliteRecorder::open(&db_path).await.unwrap();
            let events = recorder
                .select_events(id, None, None, false, None)
                .await
                .unwrap();
            assert_eq!(events.len(), 1);
        }
    }
}
