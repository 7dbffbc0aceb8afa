//! SQLite-backed job store (persistence across restarts).

use chrono::{DateTime, SecondsFormat, Utc};
use display_types::{
    JobFilter, JobId, JobPayload, JobRecord, JobState, JobStore, StateTransition, StoreError,
    Transition,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;

/// SQLite-backed job store. All access goes through one connection guarded by a mutex;
/// each transition is a conditional UPDATE on `(id, state, attempt)` inside a transaction.
pub struct SqliteJobStore {
    conn: std::sync::Mutex<Connection>,
}

struct JobRow {
    id: String,
    payload: String,
    priority: i32,
    state: String,
    idempotency_key: Option<String>,
    error: Option<String>,
    attempt: u32,
    created_at: String,
    updated_at: String,
}

const JOB_COLUMNS: &str =
    "id, payload, priority, state, idempotency_key, error, attempt, created_at, updated_at";

fn sql(e: rusqlite::Error) -> StoreError {
    StoreError::Other(e.to_string())
}

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Other(format!("bad timestamp {s}: {e}")))
}

fn parse_state(s: &str) -> Result<JobState, StoreError> {
    s.parse::<JobState>().map_err(StoreError::Other)
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        id: row.get(0)?,
        payload: row.get(1)?,
        priority: row.get(2)?,
        state: row.get(3)?,
        idempotency_key: row.get(4)?,
        error: row.get(5)?,
        attempt: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl SqliteJobStore {
    /// Open (or create) a store at the given path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).map_err(sql)?;
        tracing::debug!(path = %path.as_ref().display(), "opened sqlite job store");
        Self::with_connection(conn)
    }

    /// In-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory().map_err(sql)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                priority INTEGER NOT NULL,
                state TEXT NOT NULL,
                idempotency_key TEXT UNIQUE,
                error TEXT,
                attempt INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS job_history (
                job_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                state TEXT NOT NULL,
                at TEXT NOT NULL,
                attempt INTEGER,
                PRIMARY KEY (job_id, seq),
                FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
            CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_at);
            CREATE INDEX IF NOT EXISTS idx_jobs_updated ON jobs(updated_at);
            "#,
        )
        .map_err(sql)?;

        Ok(Self {
            conn: std::sync::Mutex::new(conn),
        })
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Other(format!("failed to acquire lock: {}", e)))?;
        f(&mut conn)
    }

    fn load_history(conn: &Connection, id: &str) -> Result<Vec<StateTransition>, StoreError> {
        let mut stmt = conn
            .prepare("SELECT state, at, attempt FROM job_history WHERE job_id = ?1 ORDER BY seq")
            .map_err(sql)?;
        let rows = stmt
            .query_map([id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<u32>>(2)?,
                ))
            })
            .map_err(sql)?;
        let mut history = Vec::new();
        for row in rows {
            let (state, at, attempt) = row.map_err(sql)?;
            history.push(StateTransition {
                state: parse_state(&state)?,
                at: parse_ts(&at)?,
                attempt,
            });
        }
        Ok(history)
    }

    fn into_record(conn: &Connection, row: JobRow) -> Result<JobRecord, StoreError> {
        let id: JobId = row
            .id
            .parse()
            .map_err(|e| StoreError::Other(format!("bad job id {}: {}", row.id, e)))?;
        let payload: JobPayload = serde_json::from_str(&row.payload)
            .map_err(|e| StoreError::Other(format!("bad payload for {}: {}", row.id, e)))?;
        let history = Self::load_history(conn, &row.id)?;
        Ok(JobRecord {
            id,
            payload,
            priority: row.priority,
            state: parse_state(&row.state)?,
            idempotency_key: row.idempotency_key,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
            error: row.error,
            attempt: row.attempt,
            history,
        })
    }

    fn load(conn: &Connection, id: JobId) -> Result<JobRecord, StoreError> {
        let sql_text = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
        let row = conn
            .query_row(&sql_text, [id.to_string()], read_row)
            .optional()
            .map_err(sql)?
            .ok_or(StoreError::NotFound(id))?;
        Self::into_record(conn, row)
    }
}

#[async_trait::async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, job: JobRecord) -> Result<JobRecord, StoreError> {
        let payload = serde_json::to_string(&job.payload)
            .map_err(|e| StoreError::Other(e.to_string()))?;
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(sql)?;
            if let Some(ref key) = job.idempotency_key {
                let existing: Option<String> = tx
                    .query_row(
                        "SELECT id FROM jobs WHERE idempotency_key = ?1",
                        [key],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(sql)?;
                if let Some(existing) = existing {
                    let existing = existing
                        .parse()
                        .map_err(|e| StoreError::Other(format!("bad job id {existing}: {e}")))?;
                    return Err(StoreError::Conflict { existing });
                }
            }
            tx.execute(
                "INSERT INTO jobs (id, payload, priority, state, idempotency_key, error, attempt, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    job.id.to_string(),
                    payload,
                    job.priority,
                    job.state.as_str(),
                    job.idempotency_key,
                    job.error,
                    job.attempt,
                    ts(&job.created_at),
                    ts(&job.updated_at),
                ],
            )
            .map_err(sql)?;
            for (seq, h) in job.history.iter().enumerate() {
                tx.execute(
                    "INSERT INTO job_history (job_id, seq, state, at, attempt) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![job.id.to_string(), seq as i64, h.state.as_str(), ts(&h.at), h.attempt],
                )
                .map_err(sql)?;
            }
            tx.commit().map_err(sql)?;
            Ok(())
        })?;
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<JobRecord, StoreError> {
        self.with_conn(|conn| Self::load(conn, id))
    }

    async fn update_state(&self, id: JobId, transition: Transition) -> Result<JobRecord, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(sql)?;
            let mut record = Self::load(&tx, id)?;
            let prev_attempt = record.attempt;
            record.apply(&transition)?;

            let changed = tx
                .execute(
                    "UPDATE jobs SET state = ?1, error = ?2, attempt = ?3, updated_at = ?4 WHERE id = ?5 AND state = ?6 AND attempt = ?7",
                    params![
                        record.state.as_str(),
                        record.error,
                        record.attempt,
                        ts(&record.updated_at),
                        id.to_string(),
                        transition.from.as_str(),
                        prev_attempt,
                    ],
                )
                .map_err(sql)?;
            if changed == 0 {
                let actual = Self::load(&tx, id)?.state;
                return Err(StoreError::StateConflict {
                    id,
                    expected: transition.from,
                    actual,
                });
            }

            let seq = record.history.len() - 1;
            if let Some(last) = record.history.last() {
                tx.execute(
                    "INSERT INTO job_history (job_id, seq, state, at, attempt) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![id.to_string(), seq as i64, last.state.as_str(), ts(&last.at), last.attempt],
                )
                .map_err(sql)?;
            }
            tx.commit().map_err(sql)?;
            Ok(record)
        })
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, StoreError> {
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(ref states) = filter.states {
            if states.is_empty() {
                return Ok(Vec::new());
            }
            let start = args.len();
            let placeholders: Vec<String> = (0..states.len())
                .map(|i| format!("?{}", start + i + 1))
                .collect();
            clauses.push(format!("state IN ({})", placeholders.join(",")));
            args.extend(states.iter().map(|s| s.as_str().to_string()));
        }
        if let Some(since) = filter.updated_since {
            args.push(ts(&since));
            clauses.push(format!("updated_at >= ?{}", args.len()));
        }
        let mut sql_text = format!("SELECT {JOB_COLUMNS} FROM jobs");
        if !clauses.is_empty() {
            sql_text.push_str(" WHERE ");
            sql_text.push_str(&clauses.join(" AND "));
        }
        sql_text.push_str(" ORDER BY created_at ASC, id ASC");
        if let Some(limit) = filter.limit {
            sql_text.push_str(&format!(" LIMIT {}", limit));
        }

        self.with_conn(|conn| {
            let conn: &Connection = conn;
            let rows: Vec<JobRow> = {
                let mut stmt = conn.prepare(&sql_text).map_err(sql)?;
                let mapped = stmt
                    .query_map(rusqlite::params_from_iter(args.iter()), read_row)
                    .map_err(sql)?;
                mapped.collect::<Result<_, _>>().map_err(sql)?
            };
            rows.into_iter()
                .map(|row| Self::into_record(conn, row))
                .collect()
        })
    }

    async fn count_by_state(&self) -> Result<HashMap<JobState, usize>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT state, COUNT(*) FROM jobs GROUP BY state")
                .map_err(sql)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(sql)?;
            let mut counts = HashMap::new();
            for row in rows {
                let (state, n) = row.map_err(sql)?;
                counts.insert(parse_state(&state)?, n as usize);
            }
            Ok(counts)
        })
    }
}
