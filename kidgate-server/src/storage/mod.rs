pub mod models;
pub mod schema;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use models::{BlockedApp, Device, NewBlockedApp, NewDevice, NewScreenTimeRule, NewUsageEntry, ScreenTimeRule, UsageEntry};
use tracing::trace;

use crate::ingest::AcceptedEntry;

/// Structured error type for all storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A Diesel ORM error (query failure, constraint violation, etc.)
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Failed to acquire or build a connection from the pool.
    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A `spawn_blocking` task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A database migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),
}

/// Outcome of an idempotent device registration.
#[derive(Debug)]
pub enum RegisterOutcome {
    Created(Device),
    AlreadyRegistered(Device),
}

impl RegisterOutcome {
    pub fn device(&self) -> &Device {
        match self {
            RegisterOutcome::Created(d) | RegisterOutcome::AlreadyRegistered(d) => d,
        }
    }
}

/// Outcome of an idempotent block request.
#[derive(Debug)]
pub enum BlockOutcome {
    Blocked(BlockedApp),
    AlreadyBlocked(BlockedApp),
}

#[derive(Clone)]
pub struct Store {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Store {
    pub async fn connect_sqlite(path: &str) -> Result<Self, StorageError> {
        let url = path.to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder().max_size(8).build(manager)?;

        // Run pending Diesel migrations on startup (auto-init empty DBs)
        {
            let pool_clone = pool.clone();
            tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
                const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
                let mut conn = pool_clone.get()?;
                configure_sqlite_conn(&mut conn)?;
                conn.run_pending_migrations(MIGRATIONS)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
                Ok(())
            })
            .await??;
        }

        Ok(Store { pool })
    }

    /// Idempotent registration keyed on `(parent, identifier)`. A device
    /// retrying registration gets `AlreadyRegistered` back, never an error.
    pub async fn register_device(
        &self,
        parent: &str,
        identifier: &str,
        nickname: Option<&str>,
    ) -> Result<RegisterOutcome, StorageError> {
        use schema::devices::dsl as d;
        let pool = self.pool.clone();
        let parent_owned = parent.to_string();
        let identifier_owned = identifier.to_string();
        let nickname_owned = nickname.map(|s| s.to_string());
        tokio::task::spawn_blocking(move || -> Result<RegisterOutcome, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| {
                let existing = d::devices
                    .filter(d::parent_id.eq(&parent_owned))
                    .filter(d::identifier.eq(&identifier_owned))
                    .first::<Device>(conn)
                    .optional()?;
                if let Some(dev) = existing {
                    return Ok(RegisterOutcome::AlreadyRegistered(dev));
                }
                let new_device = NewDevice {
                    parent_id: &parent_owned,
                    identifier: &identifier_owned,
                    nickname: nickname_owned.as_deref(),
                };
                let created: Device = diesel::insert_into(d::devices)
                    .values(&new_device)
                    .get_result(conn)?;
                Ok(RegisterOutcome::Created(created))
            })
        })
        .await?
    }

    /// Resolve a device scoped to its owning parent. Every other operation
    /// goes through this lookup so one parent can never reach another's data.
    pub async fn find_device(
        &self,
        parent: &str,
        identifier: &str,
    ) -> Result<Option<Device>, StorageError> {
        use schema::devices::dsl as d;
        let pool = self.pool.clone();
        let parent_owned = parent.to_string();
        let identifier_owned = identifier.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Device>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(d::devices
                .filter(d::parent_id.eq(&parent_owned))
                .filter(d::identifier.eq(&identifier_owned))
                .first::<Device>(&mut conn)
                .optional()?)
        })
        .await?
    }

    /// Persist a batch of accepted entries and touch `last_sync`, in one
    /// immediate transaction. The write lock serializes concurrent syncs of
    /// the same device. `last_sync` is updated even for an empty batch since
    /// device contact still happened.
    pub async fn record_sync(
        &self,
        device_pk: i32,
        entries: Vec<AcceptedEntry>,
    ) -> Result<(), StorageError> {
        use schema::devices::dsl as d;
        use schema::usage_entries;
        let pool = self.pool.clone();
        trace!(device_pk, entries = entries.len(), "record_sync starting");
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| {
                for e in &entries {
                    let row = NewUsageEntry {
                        device_id: device_pk,
                        app_name: &e.app_name,
                        start_time: e.start_time,
                        end_time: e.end_time,
                        duration_secs: e.duration_secs,
                    };
                    diesel::insert_into(usage_entries::table)
                        .values(&row)
                        .execute(conn)?;
                }
                let now = Utc::now().naive_utc();
                diesel::update(d::devices.filter(d::id.eq(device_pk)))
                    .set(d::last_sync.eq(Some(now)))
                    .execute(conn)?;
                Ok(())
            })
        })
        .await?
    }

    /// Total seconds per app over all stored entries, largest first.
    pub async fn per_app_totals(
        &self,
        device_pk: i32,
    ) -> Result<Vec<(String, i64)>, StorageError> {
        use diesel::dsl::sum;
        use schema::usage_entries::dsl as ue;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<(String, i64)>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let rows: Vec<(String, Option<i64>)> = ue::usage_entries
                .filter(ue::device_id.eq(device_pk))
                .group_by(ue::app_name)
                .select((ue::app_name, sum(ue::duration_secs)))
                .load(&mut conn)?;
            let mut totals: Vec<(String, i64)> = rows
                .into_iter()
                .map(|(app, total)| (app, total.unwrap_or(0)))
                .collect();
            totals.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            Ok(totals)
        })
        .await?
    }

    /// Total seconds per calendar date of `start_time` (UTC), chronological.
    pub async fn per_day_totals(
        &self,
        device_pk: i32,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<(NaiveDate, i64)>, StorageError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<(NaiveDate, i64)>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let rows = query_entries(&mut conn, device_pk, from, to)?;
            let mut by_day = std::collections::BTreeMap::<NaiveDate, i64>::new();
            for e in rows {
                *by_day.entry(e.start_time.date()).or_insert(0) += e.duration_secs as i64;
            }
            Ok(by_day.into_iter().collect())
        })
        .await?
    }

    /// Full detail log for exports, ordered by start time.
    pub async fn list_entries(
        &self,
        device_pk: i32,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<UsageEntry>, StorageError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<UsageEntry>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            query_entries(&mut conn, device_pk, from, to)
        })
        .await?
    }

    /// Upsert the single rule row for a device. Only provided fields are
    /// overwritten; omitted ones keep their stored value. Runs in an
    /// immediate transaction so concurrent upserts for one device serialize
    /// instead of racing the get-or-create.
    pub async fn upsert_rule(
        &self,
        device_pk: i32,
        daily_limit_minutes: Option<i32>,
        bedtime_start: Option<NaiveTime>,
        bedtime_end: Option<NaiveTime>,
        default_limit: i32,
    ) -> Result<ScreenTimeRule, StorageError> {
        use schema::screen_time_rules::dsl as r;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<ScreenTimeRule, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| {
                diesel::insert_into(r::screen_time_rules)
                    .values(&NewScreenTimeRule {
                        device_id: device_pk,
                        daily_limit_minutes: daily_limit_minutes.unwrap_or(default_limit),
                    })
                    .on_conflict_do_nothing()
                    .execute(conn)?;
                if let Some(limit) = daily_limit_minutes {
                    diesel::update(r::screen_time_rules.filter(r::device_id.eq(device_pk)))
                        .set(r::daily_limit_minutes.eq(limit))
                        .execute(conn)?;
                }
                if let Some(start) = bedtime_start {
                    diesel::update(r::screen_time_rules.filter(r::device_id.eq(device_pk)))
                        .set(r::bedtime_start.eq(Some(start)))
                        .execute(conn)?;
                }
                if let Some(end) = bedtime_end {
                    diesel::update(r::screen_time_rules.filter(r::device_id.eq(device_pk)))
                        .set(r::bedtime_end.eq(Some(end)))
                        .execute(conn)?;
                }
                Ok(r::screen_time_rules
                    .filter(r::device_id.eq(device_pk))
                    .first::<ScreenTimeRule>(conn)?)
            })
        })
        .await?
    }

    pub async fn get_rule(&self, device_pk: i32) -> Result<Option<ScreenTimeRule>, StorageError> {
        use schema::screen_time_rules::dsl as r;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<ScreenTimeRule>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(r::screen_time_rules
                .filter(r::device_id.eq(device_pk))
                .first::<ScreenTimeRule>(&mut conn)
                .optional()?)
        })
        .await?
    }

    /// Idempotent block: an existing active row for `(device, app_name)`
    /// short-circuits without creating a duplicate.
    pub async fn block_app(
        &self,
        device_pk: i32,
        app_name: &str,
        package_name: Option<&str>,
        blocked_by: &str,
        note: Option<&str>,
    ) -> Result<BlockOutcome, StorageError> {
        use schema::blocked_apps::dsl as b;
        let pool = self.pool.clone();
        let app_owned = app_name.to_string();
        let package_owned = package_name.map(|s| s.to_string());
        let by_owned = blocked_by.to_string();
        let note_owned = note.map(|s| s.to_string());
        tokio::task::spawn_blocking(move || -> Result<BlockOutcome, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| {
                let existing = b::blocked_apps
                    .filter(b::device_id.eq(device_pk))
                    .filter(b::app_name.eq(&app_owned))
                    .filter(b::is_active.eq(true))
                    .first::<BlockedApp>(conn)
                    .optional()?;
                if let Some(row) = existing {
                    return Ok(BlockOutcome::AlreadyBlocked(row));
                }
                let new_row = NewBlockedApp {
                    device_id: device_pk,
                    app_name: &app_owned,
                    package_name: package_owned.as_deref(),
                    is_active: true,
                    note: note_owned.as_deref(),
                    blocked_by: &by_owned,
                    blocked_at: Utc::now().naive_utc(),
                };
                let created: BlockedApp = diesel::insert_into(b::blocked_apps)
                    .values(&new_row)
                    .get_result(conn)?;
                Ok(BlockOutcome::Blocked(created))
            })
        })
        .await?
    }

    /// Soft-deactivate all active rows matching `(device, app_name)` and
    /// return how many changed. Zero means the app wasn't blocked; the
    /// audit trail (who blocked, when) stays in place either way.
    pub async fn unblock_app(
        &self,
        device_pk: i32,
        app_name: &str,
    ) -> Result<usize, StorageError> {
        use schema::blocked_apps::dsl as b;
        let pool = self.pool.clone();
        let app_owned = app_name.to_string();
        tokio::task::spawn_blocking(move || -> Result<usize, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let changed = diesel::update(
                b::blocked_apps
                    .filter(b::device_id.eq(device_pk))
                    .filter(b::app_name.eq(&app_owned))
                    .filter(b::is_active.eq(true)),
            )
            .set(b::is_active.eq(false))
            .execute(&mut conn)?;
            Ok(changed)
        })
        .await?
    }

    /// Active block set for the device poller. Stamps `last_synced` on the
    /// returned rows in the same transaction, mirroring that the device has
    /// now seen them.
    pub async fn poll_blocked(&self, device_pk: i32) -> Result<Vec<BlockedApp>, StorageError> {
        use schema::blocked_apps::dsl as b;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<BlockedApp>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| {
                let rows = b::blocked_apps
                    .filter(b::device_id.eq(device_pk))
                    .filter(b::is_active.eq(true))
                    .order(b::blocked_at.asc())
                    .load::<BlockedApp>(conn)?;
                let now = Utc::now().naive_utc();
                diesel::update(
                    b::blocked_apps
                        .filter(b::device_id.eq(device_pk))
                        .filter(b::is_active.eq(true)),
                )
                .set(b::last_synced.eq(Some(now)))
                .execute(conn)?;
                Ok(rows)
            })
        })
        .await?
    }
}

fn query_entries(
    conn: &mut SqliteConnection,
    device_pk: i32,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Vec<UsageEntry>, StorageError> {
    use schema::usage_entries::dsl as ue;
    let mut query = ue::usage_entries
        .filter(ue::device_id.eq(device_pk))
        .into_boxed();
    if let Some(from) = from {
        query = query.filter(ue::start_time.ge(day_floor(from)));
    }
    if let Some(to) = to {
        query = query.filter(ue::start_time.lt(day_floor(to)));
    }
    Ok(query
        .order(ue::start_time.asc())
        .load::<UsageEntry>(conn)?)
}

fn day_floor(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

fn configure_sqlite_conn(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    // Enable WAL for better read/write concurrency and set a busy timeout
    // Ignore the result rows; Diesel's execute is fine for PRAGMAs
    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous=NORMAL;").execute(conn)?;
    diesel::sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    diesel::sql_query("PRAGMA foreign_keys=ON;").execute(conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    async fn temp_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = Store::connect_sqlite(path.to_str().unwrap())
            .await
            .unwrap();
        (store, dir)
    }

    fn accepted(app: &str, hour: u32, secs: i32) -> AcceptedEntry {
        let start = NaiveDate::from_ymd_opt(2025, 5, 31)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap();
        AcceptedEntry {
            app_name: app.to_string(),
            start_time: start,
            end_time: start + chrono::Duration::seconds(secs as i64),
            duration_secs: secs,
        }
    }

    #[tokio::test]
    async fn empty_sync_batch_still_touches_last_sync() {
        let (store, _dir) = temp_store().await;
        store.register_device("p1", "tablet-1", None).await.unwrap();
        let device = store.find_device("p1", "tablet-1").await.unwrap().unwrap();
        assert!(device.last_sync.is_none());

        // Device contact with zero valid entries still counts as a sync.
        store.record_sync(device.id, Vec::new()).await.unwrap();
        let device = store.find_device("p1", "tablet-1").await.unwrap().unwrap();
        assert!(device.last_sync.is_some());
    }

    #[tokio::test]
    async fn record_sync_persists_entries_and_last_sync_together() {
        let (store, _dir) = temp_store().await;
        store.register_device("p1", "tablet-1", None).await.unwrap();
        let device = store.find_device("p1", "tablet-1").await.unwrap().unwrap();

        store
            .record_sync(device.id, vec![accepted("chrome", 10, 300), accepted("maps", 11, 60)])
            .await
            .unwrap();

        let entries = store.list_entries(device.id, None, None).await.unwrap();
        assert_eq!(entries.len(), 2);
        let device = store.find_device("p1", "tablet-1").await.unwrap().unwrap();
        assert!(device.last_sync.is_some());
    }
}
