//! Durable history of samples, battery readings and wear events.
//!
//! From the supervisor's point of view recording is fire-and-forget: a
//! failed append is logged and the session carries on.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::{debug, warn};

use crate::report::DailyStats;

/// Errors from the recorder.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// The database directory could not be created.
    #[error("Failed to create directory {}: {source}", path.display())]
    CreateDir {
        /// Directory we tried to create.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// SQLite rejected an operation.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The blocking worker panicked or was cancelled.
    #[error("Recorder worker failed: {0}")]
    Worker(String),
}

/// Append-only sink for monitoring history.
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Store one heart-rate sample.
    async fn append_heart_rate(&self, at: DateTime<Utc>, bpm: u8) -> Result<(), RecorderError>;

    /// Store a free-text event (wear changes, alerts, session ends).
    async fn append_event(&self, at: DateTime<Utc>, text: &str) -> Result<(), RecorderError>;

    /// Store one battery reading.
    async fn append_battery(&self, at: DateTime<Utc>, level: u8) -> Result<(), RecorderError>;
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS heart_rate (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        bpm INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_heart_rate_timestamp ON heart_rate(timestamp);
    CREATE TABLE IF NOT EXISTS wearable_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        event TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS battery_level (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        level INTEGER NOT NULL
    );
";

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// SQLite-backed [`Recorder`].
///
/// Queries run on the blocking pool; the connection is shared behind a mutex.
#[derive(Clone)]
pub struct SqliteRecorder {
    conn: Arc<Mutex<Connection>>,
    path: Option<Arc<PathBuf>>,
}

impl std::fmt::Debug for SqliteRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRecorder")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteRecorder {
    /// Open (creating if needed) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if the directory cannot be created or the
    /// schema cannot be applied.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RecorderError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| RecorderError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(&path)?;
        if let Err(err) =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
        {
            warn!(error = %err, "failed to enable WAL mode");
        }
        conn.execute_batch(SCHEMA)?;
        debug!(path = %path.display(), "recorder opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(Arc::new(path)),
        })
    }

    /// An in-memory database, for tests and dry runs.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Sqlite`] if the schema cannot be applied.
    pub fn in_memory() -> Result<Self, RecorderError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Database file, if not in memory.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref().map(PathBuf::as_path)
    }

    /// Heart-rate statistics for samples in `[from, to)`.
    ///
    /// Returns `None` when the range holds no samples.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if the query fails.
    pub async fn heart_rate_stats(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<DailyStats>, RecorderError> {
        let (from, to) = (timestamp(from), timestamp(to));
        self.run(move |conn| {
            let row = conn
                .query_row(
                    "SELECT COUNT(*), AVG(bpm), MIN(bpm), MAX(bpm)
                     FROM heart_rate WHERE timestamp >= ?1 AND timestamp < ?2",
                    params![from, to],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, Option<f64>>(1)?,
                            row.get::<_, Option<i64>>(2)?,
                            row.get::<_, Option<i64>>(3)?,
                        ))
                    },
                )
                .optional()?;

            Ok(match row {
                Some((count, Some(average), Some(min), Some(max))) if count > 0 => {
                    Some(DailyStats {
                        count: u64::try_from(count).unwrap_or_default(),
                        average,
                        min: u8::try_from(min).unwrap_or(u8::MAX),
                        max: u8::try_from(max).unwrap_or(u8::MAX),
                    })
                }
                _ => None,
            })
        })
        .await
    }

    /// Number of rows in one of the history tables.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] for an unknown table or a failed query.
    pub async fn count(&self, table: &'static str) -> Result<u64, RecorderError> {
        if !matches!(table, "heart_rate" | "wearable_events" | "battery_level") {
            return Err(RecorderError::Worker(format!("unknown table '{table}'")));
        }
        self.run(move |conn| {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?;
            Ok(u64::try_from(n).unwrap_or_default())
        })
        .await
    }

    async fn run<T, F>(&self, task: F) -> Result<T, RecorderError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, RecorderError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            task(&guard)
        })
        .await
        .map_err(|err| RecorderError::Worker(err.to_string()))?
    }
}

#[async_trait]
impl Recorder for SqliteRecorder {
    async fn append_heart_rate(&self, at: DateTime<Utc>, bpm: u8) -> Result<(), RecorderError> {
        let ts = timestamp(at);
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO heart_rate (timestamp, bpm) VALUES (?1, ?2)",
                params![ts, bpm],
            )?;
            Ok(())
        })
        .await
    }

    async fn append_event(&self, at: DateTime<Utc>, text: &str) -> Result<(), RecorderError> {
        let (ts, text) = (timestamp(at), text.to_string());
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO wearable_events (timestamp, event) VALUES (?1, ?2)",
                params![ts, text],
            )?;
            Ok(())
        })
        .await
    }

    async fn append_battery(&self, at: DateTime<Utc>, level: u8) -> Result<(), RecorderError> {
        let ts = timestamp(at);
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO battery_level (timestamp, level) VALUES (?1, ?2)",
                params![ts, level],
            )?;
            Ok(())
        })
        .await
    }
}

/// In-memory recorder that keeps everything it is given.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    heart_rates: Mutex<Vec<(DateTime<Utc>, u8)>>,
    events: Mutex<Vec<(DateTime<Utc>, String)>>,
    batteries: Mutex<Vec<(DateTime<Utc>, u8)>>,
}

impl MemoryRecorder {
    /// Recorded heart-rate values, in order.
    #[must_use]
    pub fn heart_rates(&self) -> Vec<u8> {
        lock(&self.heart_rates).iter().map(|(_, bpm)| *bpm).collect()
    }

    /// Recorded event texts, in order.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        lock(&self.events).iter().map(|(_, text)| text.clone()).collect()
    }

    /// Recorded battery levels, in order.
    #[must_use]
    pub fn battery_levels(&self) -> Vec<u8> {
        lock(&self.batteries).iter().map(|(_, level)| *level).collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Recorder for MemoryRecorder {
    async fn append_heart_rate(&self, at: DateTime<Utc>, bpm: u8) -> Result<(), RecorderError> {
        lock(&self.heart_rates).push((at, bpm));
        Ok(())
    }

    async fn append_event(&self, at: DateTime<Utc>, text: &str) -> Result<(), RecorderError> {
        lock(&self.events).push((at, text.to_string()));
        Ok(())
    }

    async fn append_battery(&self, at: DateTime<Utc>, level: u8) -> Result<(), RecorderError> {
        lock(&self.batteries).push((at, level));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use tempfile::TempDir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_timestamps_are_rfc3339_utc() {
        assert_eq!(timestamp(t0()), "2026-03-01T08:00:00Z");
    }

    #[tokio::test]
    async fn test_open_creates_directory_and_schema() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("health.db");

        let recorder = SqliteRecorder::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(recorder.path(), Some(path.as_path()));
        assert_eq!(recorder.count("heart_rate").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_appends_land_in_their_tables() {
        let recorder = SqliteRecorder::in_memory().unwrap();
        recorder.append_heart_rate(t0(), 72).await.unwrap();
        recorder.append_heart_rate(t0(), 75).await.unwrap();
        recorder.append_event(t0(), "IN_USE -> CHARGING").await.unwrap();
        recorder.append_battery(t0(), 64).await.unwrap();

        assert_eq!(recorder.count("heart_rate").await.unwrap(), 2);
        assert_eq!(recorder.count("wearable_events").await.unwrap(), 1);
        assert_eq!(recorder.count("battery_level").await.unwrap(), 1);
        assert!(recorder.count("sqlite_master").await.is_err());
    }

    #[tokio::test]
    async fn test_stats_cover_half_open_range() {
        let recorder = SqliteRecorder::in_memory().unwrap();
        for (minutes, bpm) in [(0, 60), (30, 70), (60, 81), (24 * 60, 200)] {
            recorder
                .append_heart_rate(t0() + TimeDelta::minutes(minutes), bpm)
                .await
                .unwrap();
        }

        let stats = recorder
            .heart_rate_stats(t0(), t0() + TimeDelta::days(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, 60);
        assert_eq!(stats.max, 81);
        assert!((stats.average - 70.333).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_stats_empty_range_is_none() {
        let recorder = SqliteRecorder::in_memory().unwrap();
        recorder.append_heart_rate(t0(), 60).await.unwrap();
        let stats = recorder
            .heart_rate_stats(t0() + TimeDelta::hours(1), t0() + TimeDelta::hours(2))
            .await
            .unwrap();
        assert!(stats.is_none());
    }

    #[tokio::test]
    async fn test_reopen_keeps_history() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("health.db");
        {
            let recorder = SqliteRecorder::open(&path).unwrap();
            recorder.append_heart_rate(t0(), 66).await.unwrap();
        }
        let recorder = SqliteRecorder::open(&path).unwrap();
        assert_eq!(recorder.count("heart_rate").await.unwrap(), 1);
    }
}
