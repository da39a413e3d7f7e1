#![forbid(unsafe_code)]

use super::super::StoreError;
use rusqlite::{Connection, params};

const SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS store_state (
          singleton INTEGER PRIMARY KEY CHECK(singleton = 1),
          schema_version INTEGER NOT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS jobs (
          id TEXT PRIMARY KEY,
          job_type TEXT NOT NULL,
          params_json TEXT NOT NULL,
          fingerprint TEXT NOT NULL,
          state TEXT NOT NULL,
          worker_id TEXT,
          worker_pid INTEGER,
          last_heartbeat_ms INTEGER,
          progress REAL NOT NULL DEFAULT 0,
          phase TEXT,
          result_json TEXT,
          error_json TEXT,
          requested_pause INTEGER NOT NULL DEFAULT 0,
          requested_stop INTEGER NOT NULL DEFAULT 0,
          tags_json TEXT,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          completed_at_ms INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_jobs_state_created
          ON jobs(state, created_at_ms, id);

        CREATE INDEX IF NOT EXISTS idx_jobs_fingerprint
          ON jobs(fingerprint);

        CREATE TABLE IF NOT EXISTS job_events (
          seq INTEGER PRIMARY KEY AUTOINCREMENT,
          job_id TEXT NOT NULL,
          ts_ms INTEGER NOT NULL,
          kind TEXT NOT NULL,
          message TEXT NOT NULL,
          percent INTEGER,
          meta_json TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_job_events_job_seq
          ON job_events(job_id, seq);

        CREATE TABLE IF NOT EXISTS counters (
          name TEXT PRIMARY KEY,
          value INTEGER NOT NULL
        );
"#;

pub(in crate::store) fn install(conn: &Connection, now_ms: i64) -> Result<(), StoreError> {
    conn.execute_batch(SQL)?;
    conn.execute(
        "INSERT INTO store_state(singleton, schema_version, created_at_ms, updated_at_ms) \
         VALUES (1, ?1, ?2, ?2) \
         ON CONFLICT(singleton) DO UPDATE SET schema_version=excluded.schema_version, updated_at_ms=excluded.updated_at_ms",
        params![super::super::SCHEMA_VERSION, now_ms],
    )?;
    Ok(())
}
