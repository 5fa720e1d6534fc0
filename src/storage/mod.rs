//! SQLite storage layer -- pool, schema, and all persistence queries.

pub mod schema;

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::model::{Collection, NotifySettings, Run, Schedule, TestDefinition, TestResult};
use crate::recurrence::{RecurrenceRule, TimeOfDay, WeekdaySpec};

/// Connection pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("bad timestamp '{}'", s))?
        .with_timezone(&Utc))
}

fn parse_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("bad id '{}'", s))
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Raw schedule row before the recurrence rule is validated.
struct ScheduleRow {
    id: String,
    owner_id: String,
    name: String,
    collection_id: String,
    kind: String,
    minute_interval: Option<i64>,
    hour_interval: Option<i64>,
    time_of_day: Option<String>,
    weekday: Option<String>,
    active: bool,
    notify_enabled: bool,
    notify_recipient: Option<String>,
    last_run: Option<String>,
    created_at: String,
}

const SCHEDULE_COLS: &str = "id, owner_id, name, collection_id, kind, minute_interval, \
     hour_interval, time_of_day, weekday, active, notify_enabled, notify_recipient, \
     last_run, created_at";

fn schedule_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduleRow> {
    Ok(ScheduleRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        collection_id: row.get(3)?,
        kind: row.get(4)?,
        minute_interval: row.get(5)?,
        hour_interval: row.get(6)?,
        time_of_day: row.get(7)?,
        weekday: row.get(8)?,
        active: row.get::<_, i64>(9)? != 0,
        notify_enabled: row.get::<_, i64>(10)? != 0,
        notify_recipient: row.get(11)?,
        last_run: row.get(12)?,
        created_at: row.get(13)?,
    })
}

impl ScheduleRow {
    fn into_schedule(self) -> Result<Schedule> {
        let time_of_day = self
            .time_of_day
            .as_deref()
            .map(str::parse::<TimeOfDay>)
            .transpose()?;
        let weekday = self
            .weekday
            .as_deref()
            .map(WeekdaySpec::parse)
            .transpose()?;
        let rule = RecurrenceRule::from_parts(
            &self.kind,
            self.minute_interval.map(|v| v as u32),
            self.hour_interval.map(|v| v as u32),
            time_of_day,
            weekday,
            self.active,
        )
        .with_context(|| format!("corrupt recurrence for schedule {}", self.id))?;

        Ok(Schedule {
            id: parse_id(&self.id)?,
            owner_id: self.owner_id,
            name: self.name,
            collection_id: parse_id(&self.collection_id)?,
            rule,
            notify: NotifySettings {
                enabled: self.notify_enabled,
                recipient: self.notify_recipient,
            },
            last_run: self.last_run.as_deref().map(parse_ts).transpose()?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

/// All persistence operations, shared by the runner, scheduler, API, and CLI.
#[derive(Clone)]
pub struct Store {
    pool: Pool,
}

impl Store {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn open(path: &str) -> Result<Self> {
        Ok(Self::new(open_pool(path)?))
    }

    // ---- collections ----

    pub fn insert_collection(&self, collection: &Collection) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO collections (id, owner_id, name, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                collection.id.to_string(),
                collection.owner_id,
                collection.name,
                collection.description,
                ts(collection.created_at),
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                anyhow!("collection '{}' already exists for this owner", collection.name)
            } else {
                anyhow::Error::new(e).context("failed to insert collection")
            }
        })?;
        Ok(())
    }

    pub fn get_collection(&self, id: Uuid) -> Result<Option<Collection>> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT id, owner_id, name, description, created_at
                 FROM collections WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, owner_id, name, description, created_at)| {
            Ok(Collection {
                id: parse_id(&id)?,
                owner_id,
                name,
                description,
                created_at: parse_ts(&created_at)?,
            })
        })
        .transpose()
    }

    pub fn list_collections(&self, owner_id: Option<&str>) -> Result<Vec<Collection>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, owner_id, name, description, created_at FROM collections
             WHERE (?1 IS NULL OR owner_id = ?1) ORDER BY name",
        )?;
        let rows = stmt.query_map(params![owner_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut collections = Vec::new();
        for r in rows {
            let (id, owner_id, name, description, created_at) = r?;
            collections.push(Collection {
                id: parse_id(&id)?,
                owner_id,
                name,
                description,
                created_at: parse_ts(&created_at)?,
            });
        }
        Ok(collections)
    }

    pub fn delete_collection(&self, id: Uuid) -> Result<bool> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "DELETE FROM collections WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(changed > 0)
    }

    // ---- tests ----

    pub fn insert_test(&self, test: &TestDefinition) -> Result<()> {
        let conn = self.pool.get()?;
        let headers_json = serde_json::to_string(&test.headers)?;
        conn.execute(
            "INSERT INTO tests (id, collection_id, name, method, url, headers_json,
                                body, expected_status, position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                test.id.to_string(),
                test.collection_id.to_string(),
                test.name,
                test.method,
                test.url,
                headers_json,
                test.body,
                test.expected_status.map(i64::from),
                test.position,
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                anyhow!("test '{}' already exists in this collection", test.name)
            } else {
                anyhow::Error::new(e).context("failed to insert test")
            }
        })?;
        Ok(())
    }

    /// Tests of a collection in stable display order.
    pub fn tests_for_collection(&self, collection_id: Uuid) -> Result<Vec<TestDefinition>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, collection_id, name, method, url, headers_json, body,
                    expected_status, position
             FROM tests WHERE collection_id = ?1 ORDER BY position, name",
        )?;
        let rows = stmt.query_map(params![collection_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<i64>>(7)?,
                row.get::<_, i64>(8)?,
            ))
        })?;

        let mut tests = Vec::new();
        for r in rows {
            let (id, collection_id, name, method, url, headers_json, body, expected, position) = r?;
            let headers: HashMap<String, String> = serde_json::from_str(&headers_json)
                .with_context(|| format!("corrupt headers for test {}", id))?;
            tests.push(TestDefinition {
                id: parse_id(&id)?,
                collection_id: parse_id(&collection_id)?,
                name,
                method,
                url,
                headers,
                body,
                expected_status: expected.map(|v| v as u16),
                position,
            });
        }
        Ok(tests)
    }

    pub fn delete_test(&self, id: Uuid) -> Result<bool> {
        let conn = self.pool.get()?;
        let changed = conn.execute("DELETE FROM tests WHERE id = ?1", params![id.to_string()])?;
        Ok(changed > 0)
    }

    // ---- schedules ----

    pub fn insert_schedule(&self, schedule: &Schedule) -> Result<()> {
        let conn = self.pool.get()?;
        let spec = schedule.rule.to_spec();
        conn.execute(
            "INSERT INTO schedules (id, owner_id, name, collection_id, kind,
                 minute_interval, hour_interval, time_of_day, weekday, active,
                 notify_enabled, notify_recipient, last_run, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                schedule.id.to_string(),
                schedule.owner_id,
                schedule.name,
                schedule.collection_id.to_string(),
                spec.kind,
                spec.minute_interval.map(i64::from),
                spec.hour_interval.map(i64::from),
                spec.time_of_day.map(|t| t.to_string()),
                spec.weekday,
                schedule.rule.active as i64,
                schedule.notify.enabled as i64,
                schedule.notify.recipient,
                schedule.last_run.map(ts),
                ts(schedule.created_at),
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                anyhow!("schedule '{}' already exists for this owner", schedule.name)
            } else {
                anyhow::Error::new(e).context("failed to insert schedule")
            }
        })?;
        Ok(())
    }

    /// Full-row update driven by a user edit. `last_run` is deliberately not
    /// written here; only the dispatcher moves it.
    pub fn update_schedule(&self, schedule: &Schedule) -> Result<()> {
        let conn = self.pool.get()?;
        let spec = schedule.rule.to_spec();
        let changed = conn
            .execute(
                "UPDATE schedules SET name = ?2, collection_id = ?3, kind = ?4,
                     minute_interval = ?5, hour_interval = ?6, time_of_day = ?7,
                     weekday = ?8, active = ?9, notify_enabled = ?10,
                     notify_recipient = ?11
                 WHERE id = ?1",
                params![
                    schedule.id.to_string(),
                    schedule.name,
                    schedule.collection_id.to_string(),
                    spec.kind,
                    spec.minute_interval.map(i64::from),
                    spec.hour_interval.map(i64::from),
                    spec.time_of_day.map(|t| t.to_string()),
                    spec.weekday,
                    schedule.rule.active as i64,
                    schedule.notify.enabled as i64,
                    schedule.notify.recipient,
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    anyhow!("schedule '{}' already exists for this owner", schedule.name)
                } else {
                    anyhow::Error::new(e).context("failed to update schedule")
                }
            })?;
        if changed == 0 {
            anyhow::bail!("schedule {} not found", schedule.id);
        }
        Ok(())
    }

    pub fn get_schedule(&self, id: Uuid) -> Result<Option<Schedule>> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM schedules WHERE id = ?1", SCHEDULE_COLS),
                params![id.to_string()],
                schedule_row,
            )
            .optional()?;
        row.map(ScheduleRow::into_schedule).transpose()
    }

    pub fn list_schedules(&self, owner_id: Option<&str>) -> Result<Vec<Schedule>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM schedules WHERE (?1 IS NULL OR owner_id = ?1) ORDER BY name",
            SCHEDULE_COLS
        ))?;
        let rows = stmt.query_map(params![owner_id], schedule_row)?;

        let mut schedules = Vec::new();
        for r in rows {
            schedules.push(r?.into_schedule()?);
        }
        Ok(schedules)
    }

    pub fn active_schedules(&self) -> Result<Vec<Schedule>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM schedules WHERE active = 1",
            SCHEDULE_COLS
        ))?;
        let rows = stmt.query_map([], schedule_row)?;

        let mut schedules = Vec::new();
        for r in rows {
            schedules.push(r?.into_schedule()?);
        }
        Ok(schedules)
    }

    pub fn set_schedule_active(&self, id: Uuid, active: bool) -> Result<bool> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE schedules SET active = ?2 WHERE id = ?1",
            params![id.to_string(), active as i64],
        )?;
        Ok(changed > 0)
    }

    /// Dispatcher-only: record the instant a scheduled run was dispatched.
    pub fn set_last_run(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE schedules SET last_run = ?2 WHERE id = ?1",
            params![id.to_string(), ts(at)],
        )?;
        Ok(())
    }

    pub fn delete_schedule(&self, id: Uuid) -> Result<bool> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "DELETE FROM schedules WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(changed > 0)
    }

    // ---- runs and results ----

    pub fn insert_run(&self, run: &Run) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO runs (id, collection_id, schedule_id, owner_id, status,
                 started_at, completed_at, total_tests, success_count,
                 failure_count, total_duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                run.id.to_string(),
                run.collection_id.to_string(),
                run.schedule_id.map(|s| s.to_string()),
                run.owner_id,
                run.status.to_string(),
                ts(run.started_at),
                run.completed_at.map(ts),
                run.total_tests,
                run.success_count,
                run.failure_count,
                run.total_duration_ms,
            ],
        )
        .context("failed to insert run")?;
        Ok(())
    }

    /// Completion is a single UPDATE so no reader can observe `completed`
    /// paired with stale counts.
    pub fn complete_run(
        &self,
        id: Uuid,
        success_count: i64,
        failure_count: i64,
        total_duration_ms: i64,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE runs SET status = 'completed', success_count = ?2,
                 failure_count = ?3, total_duration_ms = ?4, completed_at = ?5
             WHERE id = ?1",
            params![
                id.to_string(),
                success_count,
                failure_count,
                total_duration_ms,
                ts(completed_at),
            ],
        )?;
        Ok(())
    }

    /// Mark runs stuck in `running` longer than the threshold as failed.
    pub fn fail_stale_runs(&self, older_than: Duration, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.pool.get()?;
        let cutoff = ts(now - older_than);
        let changed = conn.execute(
            "UPDATE runs SET status = 'failed', completed_at = ?2
             WHERE status = 'running' AND started_at < ?1",
            params![cutoff, ts(now)],
        )?;
        Ok(changed)
    }

    pub fn get_run(&self, id: Uuid) -> Result<Option<Run>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, collection_id, schedule_id, owner_id, status, started_at,
                    completed_at, total_tests, success_count, failure_count,
                    total_duration_ms
             FROM runs WHERE id = ?1",
        )?;
        let mut runs = Self::collect_runs(&mut stmt, params![id.to_string()])?;
        Ok(runs.pop())
    }

    /// Newest runs first, optionally narrowed to one collection or owner.
    pub fn list_runs(
        &self,
        collection_id: Option<Uuid>,
        owner_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Run>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, collection_id, schedule_id, owner_id, status, started_at,
                    completed_at, total_tests, success_count, failure_count,
                    total_duration_ms
             FROM runs
             WHERE (?1 IS NULL OR collection_id = ?1)
               AND (?2 IS NULL OR owner_id = ?2)
             ORDER BY started_at DESC LIMIT ?3",
        )?;
        Self::collect_runs(
            &mut stmt,
            params![collection_id.map(|c| c.to_string()), owner_id, limit],
        )
    }

    fn collect_runs(
        stmt: &mut rusqlite::Statement<'_>,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Run>> {
        let rows = stmt.query_map(params, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, i64>(7)?,
                row.get::<_, i64>(8)?,
                row.get::<_, i64>(9)?,
                row.get::<_, i64>(10)?,
            ))
        })?;

        let mut runs = Vec::new();
        for r in rows {
            let (
                id,
                collection_id,
                schedule_id,
                owner_id,
                status,
                started_at,
                completed_at,
                total_tests,
                success_count,
                failure_count,
                total_duration_ms,
            ) = r?;
            runs.push(Run {
                id: parse_id(&id)?,
                collection_id: parse_id(&collection_id)?,
                schedule_id: schedule_id.as_deref().map(parse_id).transpose()?,
                owner_id,
                status: status.parse()?,
                started_at: parse_ts(&started_at)?,
                completed_at: completed_at.as_deref().map(parse_ts).transpose()?,
                total_tests,
                success_count,
                failure_count,
                total_duration_ms,
            });
        }
        Ok(runs)
    }

    pub fn insert_result(&self, result: &TestResult) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO results (id, run_id, test_id, status_code, duration_ms,
                 error, response_body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                result.id.to_string(),
                result.run_id.to_string(),
                result.test_id.to_string(),
                i64::from(result.status_code),
                result.duration_ms,
                result.error,
                result.response_body,
            ],
        )
        .context("failed to insert result")?;
        Ok(())
    }

    pub fn results_for_run(&self, run_id: Uuid) -> Result<Vec<TestResult>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, run_id, test_id, status_code, duration_ms, error, response_body
             FROM results WHERE run_id = ?1",
        )?;
        let rows = stmt.query_map(params![run_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut results = Vec::new();
        for r in rows {
            let (id, run_id, test_id, status_code, duration_ms, error, response_body) = r?;
            results.push(TestResult {
                id: parse_id(&id)?,
                run_id: parse_id(&run_id)?,
                test_id: parse_id(&test_id)?,
                status_code: status_code as u16,
                duration_ms,
                error,
                response_body,
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunStatus;
    use crate::recurrence::next_run_after;

    fn test_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = Store::open(path.to_str().unwrap()).unwrap();
        (store, dir)
    }

    fn sample_collection(owner: &str, name: &str) -> Collection {
        Collection {
            id: Uuid::new_v4(),
            owner_id: owner.to_string(),
            name: name.to_string(),
            description: None,
            created_at: Utc::now(),
        }
    }

    fn hourly_schedule(collection_id: Uuid, owner: &str, name: &str) -> Schedule {
        Schedule {
            id: Uuid::new_v4(),
            owner_id: owner.to_string(),
            name: name.to_string(),
            collection_id,
            rule: RecurrenceRule::from_parts("hour", None, Some(2), None, None, true).unwrap(),
            notify: NotifySettings::default(),
            last_run: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn schedule_round_trips_and_computes_next_run() {
        let (store, _dir) = test_store();
        let collection = sample_collection("alice", "smoke");
        store.insert_collection(&collection).unwrap();

        let schedule = hourly_schedule(collection.id, "alice", "every-2h");
        store.insert_schedule(&schedule).unwrap();

        let loaded = store.get_schedule(schedule.id).unwrap().unwrap();
        assert_eq!(loaded.name, "every-2h");
        assert_eq!(loaded.rule, schedule.rule);
        assert_eq!(loaded.last_run, None);

        let now = Utc::now();
        let next = next_run_after(&loaded.rule, loaded.last_run, now).unwrap();
        assert_eq!(next, now + Duration::hours(2));
    }

    #[test]
    fn duplicate_schedule_name_per_owner_is_rejected() {
        let (store, _dir) = test_store();
        let collection = sample_collection("alice", "smoke");
        store.insert_collection(&collection).unwrap();

        store
            .insert_schedule(&hourly_schedule(collection.id, "alice", "nightly"))
            .unwrap();
        let err = store
            .insert_schedule(&hourly_schedule(collection.id, "alice", "nightly"))
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));

        // Same name under a different owner is fine.
        store
            .insert_schedule(&hourly_schedule(collection.id, "bob", "nightly"))
            .unwrap();
    }

    #[test]
    fn active_schedules_filters_disabled() {
        let (store, _dir) = test_store();
        let collection = sample_collection("alice", "smoke");
        store.insert_collection(&collection).unwrap();

        let enabled = hourly_schedule(collection.id, "alice", "on");
        let disabled = hourly_schedule(collection.id, "alice", "off");
        store.insert_schedule(&enabled).unwrap();
        store.insert_schedule(&disabled).unwrap();
        store.set_schedule_active(disabled.id, false).unwrap();

        let active = store.active_schedules().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, enabled.id);
    }

    #[test]
    fn run_completion_is_atomic_with_counts() {
        let (store, _dir) = test_store();
        let collection = sample_collection("alice", "smoke");
        store.insert_collection(&collection).unwrap();

        let run = Run {
            id: Uuid::new_v4(),
            collection_id: collection.id,
            schedule_id: None,
            owner_id: "alice".to_string(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            total_tests: 3,
            success_count: 0,
            failure_count: 0,
            total_duration_ms: 0,
        };
        store.insert_run(&run).unwrap();

        let loaded = store.get_run(run.id).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
        assert_eq!(loaded.success_count + loaded.failure_count, 0);

        store
            .complete_run(run.id, 2, 1, 345, Utc::now())
            .unwrap();
        let loaded = store.get_run(run.id).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Completed);
        assert_eq!(loaded.success_count + loaded.failure_count, loaded.total_tests);
        assert!(loaded.completed_at.is_some());
    }

    #[test]
    fn stale_running_runs_are_failed() {
        let (store, _dir) = test_store();
        let collection = sample_collection("alice", "smoke");
        store.insert_collection(&collection).unwrap();

        let now = Utc::now();
        let stale = Run {
            id: Uuid::new_v4(),
            collection_id: collection.id,
            schedule_id: None,
            owner_id: "alice".to_string(),
            status: RunStatus::Running,
            started_at: now - Duration::hours(3),
            completed_at: None,
            total_tests: 1,
            success_count: 0,
            failure_count: 0,
            total_duration_ms: 0,
        };
        let fresh = Run {
            id: Uuid::new_v4(),
            started_at: now,
            ..stale.clone()
        };
        store.insert_run(&stale).unwrap();
        store.insert_run(&fresh).unwrap();

        let reaped = store.fail_stale_runs(Duration::hours(1), now).unwrap();
        assert_eq!(reaped, 1);
        assert_eq!(
            store.get_run(stale.id).unwrap().unwrap().status,
            RunStatus::Failed
        );
        assert_eq!(
            store.get_run(fresh.id).unwrap().unwrap().status,
            RunStatus::Running
        );
    }
}
