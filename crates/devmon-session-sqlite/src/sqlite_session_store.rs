//! SqliteSessionStore - SessionStore trait implementation for SQLite

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::path::Path;
use tracing::{debug, info};

use devmon_core::{
    Error, Result,
    session::{
        DailySessionCount, Session, SessionFilter, SessionPage, SessionStatistics,
        SessionStatus, StatisticsFilter,
    },
    session_store::{SessionMetadata, SessionStore},
};

/// Page size used when a listing does not ask for one
pub const DEFAULT_PAGE_SIZE: u32 = 50;

const SESSION_COLUMNS: &str = "id, device_id, session_id, start_time, end_time, duration, \
                               status, metadata, created_at, updated_at";

/// Session store backed by a single SQLite database
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Open (or create) the database at `db_path`
    ///
    /// # Errors
    /// - `Error::Io` if the parent directory cannot be created
    /// - `Error::Database` if the connection or schema setup fails
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(db_path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal),
            )
            .await
            .map_err(|e| Error::Database(format!("Failed to open {}: {}", db_path.display(), e)))?;

        let store = Self::from_pool(pool).await?;
        info!("Session database ready at {}", db_path.display());
        Ok(store)
    }

    /// A private in-memory database, gone when the store is dropped
    pub async fn in_memory() -> Result<Self> {
        // Every connection to :memory: is its own database, so keep exactly one
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(db_error)?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, creating the schema if needed
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        Self::initialize_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS device_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device_id VARCHAR(100) NOT NULL,
                session_id VARCHAR(100) NOT NULL UNIQUE,
                start_time DATETIME NOT NULL,
                end_time DATETIME,
                duration INTEGER,
                status VARCHAR(20) NOT NULL DEFAULT 'running',
                metadata TEXT,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(db_error)?;

        for index in [
            "CREATE INDEX IF NOT EXISTS idx_device_id ON device_sessions(device_id)",
            "CREATE INDEX IF NOT EXISTS idx_status ON device_sessions(status)",
            "CREATE INDEX IF NOT EXISTS idx_start_time ON device_sessions(start_time)",
        ] {
            sqlx::query(index).execute(pool).await.map_err(db_error)?;
        }

        Ok(())
    }

    async fn fetch_session(&self, session_id: &str) -> Result<Option<Session>> {
        let query = format!(
            "SELECT {} FROM device_sessions WHERE session_id = ?",
            SESSION_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(session_from_row).transpose()
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create(
        &self,
        device_id: &str,
        start_time: DateTime<Utc>,
        metadata: Option<SessionMetadata>,
    ) -> Result<Session> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let metadata_json = metadata.as_ref().map(serde_json::to_string).transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO device_sessions
                (device_id, session_id, start_time, status, metadata, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(device_id)
        .bind(&session_id)
        .bind(start_time)
        .bind(SessionStatus::Running.as_str())
        .bind(metadata_json)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        info!("Started session {} for device {}", session_id, device_id);

        Ok(Session {
            id: result.last_insert_rowid(),
            device_id: device_id.to_string(),
            session_id,
            start_time,
            end_time: None,
            duration: None,
            status: SessionStatus::Running,
            metadata,
            created_at: now,
            updated_at: now,
        })
    }

    async fn end(
        &self,
        session_id: &str,
        end_time: DateTime<Utc>,
        metadata: Option<SessionMetadata>,
    ) -> Result<Session> {
        let session = self
            .fetch_session(session_id)
            .await?
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        if !session.is_running() {
            return Err(Error::SessionNotRunning {
                session_id: session_id.to_string(),
            });
        }

        let merged = match (session.metadata.clone(), metadata) {
            (Some(mut existing), Some(update)) => {
                existing.extend(update);
                Some(existing)
            }
            (existing, update) => update.or(existing),
        };

        let mut completed = session.complete(end_time);
        completed.metadata = merged;
        completed.updated_at = Utc::now();
        let metadata_json = completed
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE device_sessions
            SET end_time = ?, duration = ?, status = ?, metadata = ?, updated_at = ?
            WHERE session_id = ? AND status = ?
            "#,
        )
        .bind(end_time)
        .bind(completed.duration)
        .bind(SessionStatus::Completed.as_str())
        .bind(metadata_json)
        .bind(completed.updated_at)
        .bind(session_id)
        .bind(SessionStatus::Running.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        // Someone else completed it between our read and write
        if result.rows_affected() == 0 {
            return Err(Error::SessionNotRunning {
                session_id: session_id.to_string(),
            });
        }

        info!(
            "Ended session {} after {}s",
            session_id,
            completed.duration.unwrap_or_default()
        );
        Ok(completed)
    }

    async fn get_by_id(&self, session_id: &str) -> Result<Session> {
        self.fetch_session(session_id)
            .await?
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    async fn list(&self, filter: &SessionFilter) -> Result<SessionPage> {
        let conditions = Conditions {
            device_id: filter.device_id.as_deref(),
            status: filter.status,
            start_date: filter.start_date,
            end_date: filter.end_date,
        };

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM device_sessions");
        conditions.push_where(&mut count);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

        let mut select = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM device_sessions",
            SESSION_COLUMNS
        ));
        conditions.push_where(&mut select);
        select
            .push(" ORDER BY start_time DESC, id DESC LIMIT ")
            .push_bind(i64::from(filter.limit.unwrap_or(DEFAULT_PAGE_SIZE)))
            .push(" OFFSET ")
            .push_bind(i64::from(filter.offset.unwrap_or(0)));

        let rows = select
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        let sessions = rows.iter().map(session_from_row).collect::<Result<Vec<_>>>()?;

        debug!("Listed {} of {} sessions", sessions.len(), total);
        Ok(SessionPage {
            sessions,
            total: total.max(0) as u64,
        })
    }

    async fn running_sessions(&self, device_id: &str) -> Result<Vec<Session>> {
        let query = format!(
            "SELECT {} FROM device_sessions WHERE device_id = ? AND status = ? \
             ORDER BY start_time DESC, id DESC",
            SESSION_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(device_id)
            .bind(SessionStatus::Running.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.iter().map(session_from_row).collect()
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM device_sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() > 0 {
            info!("Deleted session {}", session_id);
        }
        Ok(())
    }

    async fn statistics(&self, filter: &StatisticsFilter) -> Result<SessionStatistics> {
        let conditions = Conditions {
            device_id: filter.device_id.as_deref(),
            status: None,
            start_date: filter.start_date,
            end_date: filter.end_date,
        };

        let mut totals = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT
                COUNT(*) AS total_sessions,
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed_sessions,
                COALESCE(SUM(CASE WHEN status = 'running' THEN 1 ELSE 0 END), 0) AS running_sessions,
                COALESCE(SUM(duration), 0) AS total_duration,
                COALESCE(AVG(CASE WHEN status = 'completed' THEN duration END), 0.0) AS avg_duration,
                COALESCE(MAX(CASE WHEN status = 'completed' THEN duration END), 0) AS max_duration,
                COALESCE(MIN(CASE WHEN status = 'completed' AND duration > 0 THEN duration END), 0) AS min_duration
            FROM device_sessions
            "#,
        );
        conditions.push_where(&mut totals);
        let row = totals
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

        let mut daily = QueryBuilder::<Sqlite>::new(
            "SELECT DATE(start_time) AS date, COUNT(*) AS count, \
             COALESCE(SUM(duration), 0) AS total_duration FROM device_sessions",
        );
        conditions.push_where(&mut daily);
        daily.push(" GROUP BY DATE(start_time) ORDER BY date");
        let daily_rows = daily
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        let daily_distribution = daily_rows
            .iter()
            .map(|row| {
                let date: String = row.try_get("date").map_err(db_error)?;
                let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                    .map_err(|e| Error::Database(format!("Bad session date '{}': {}", date, e)))?;
                Ok(DailySessionCount {
                    date,
                    count: row.try_get::<i64, _>("count").map_err(db_error)?.max(0) as u64,
                    total_duration: row.try_get("total_duration").map_err(db_error)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(SessionStatistics {
            total_sessions: row.try_get::<i64, _>("total_sessions").map_err(db_error)?.max(0)
                as u64,
            completed_sessions: row
                .try_get::<i64, _>("completed_sessions")
                .map_err(db_error)?
                .max(0) as u64,
            running_sessions: row
                .try_get::<i64, _>("running_sessions")
                .map_err(db_error)?
                .max(0) as u64,
            total_duration: row.try_get("total_duration").map_err(db_error)?,
            avg_duration: row.try_get("avg_duration").map_err(db_error)?,
            max_duration: row.try_get("max_duration").map_err(db_error)?,
            min_duration: row.try_get("min_duration").map_err(db_error)?,
            daily_distribution,
        })
    }
}

/// WHERE clause shared by listing, counting and statistics
struct Conditions<'a> {
    device_id: Option<&'a str>,
    status: Option<SessionStatus>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
}

impl<'a> Conditions<'a> {
    fn push_where(&self, builder: &mut QueryBuilder<'a, Sqlite>) {
        builder.push(" WHERE 1=1");
        if let Some(device_id) = self.device_id {
            builder.push(" AND device_id = ").push_bind(device_id);
        }
        if let Some(status) = self.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(start) = self.start_date {
            builder
                .push(" AND DATE(start_time) >= ")
                .push_bind(start.format("%Y-%m-%d").to_string());
        }
        if let Some(end) = self.end_date {
            builder
                .push(" AND DATE(start_time) <= ")
                .push_bind(end.format("%Y-%m-%d").to_string());
        }
    }
}

fn db_error(e: sqlx::Error) -> Error {
    Error::Database(e.to_string())
}

fn session_from_row(row: &SqliteRow) -> Result<Session> {
    let status: String = row.try_get("status").map_err(db_error)?;
    let metadata: Option<String> = row.try_get("metadata").map_err(db_error)?;
    let metadata = metadata
        .filter(|m| !m.is_empty())
        .map(|m| serde_json::from_str::<SessionMetadata>(&m))
        .transpose()?;

    Ok(Session {
        id: row.try_get("id").map_err(db_error)?,
        device_id: row.try_get("device_id").map_err(db_error)?,
        session_id: row.try_get("session_id").map_err(db_error)?,
        start_time: row.try_get("start_time").map_err(db_error)?,
        end_time: row.try_get("end_time").map_err(db_error)?,
        duration: row.try_get("duration").map_err(db_error)?,
        status: status.parse()?,
        metadata,
        created_at: row.try_get("created_at").map_err(db_error)?,
        updated_at: row.try_get("updated_at").map_err(db_error)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn metadata(value: serde_json::Value) -> SessionMetadata {
        value.as_object().cloned().unwrap()
    }

    async fn store() -> SqliteSessionStore {
        SqliteSessionStore::in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = store().await;
        let created = store
            .create("dev-1", t0(), Some(metadata(json!({"operator": "amy"}))))
            .await
            .unwrap();

        assert!(created.id > 0);
        assert!(uuid::Uuid::parse_str(&created.session_id).is_ok());
        assert!(created.is_running());

        let fetched = store.get_by_id(&created.session_id).await.unwrap();
        assert_eq!(fetched.device_id, "dev-1");
        assert_eq!(fetched.start_time, t0());
        assert_eq!(fetched.end_time, None);
        assert_eq!(fetched.duration, None);
        assert_eq!(fetched.status, SessionStatus::Running);
        assert_eq!(fetched.metadata.unwrap()["operator"], "amy");
    }

    #[tokio::test]
    async fn test_get_unknown_session() {
        let err = store().await.get_by_id("nope").await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(id) if id == "nope"));
    }

    #[tokio::test]
    async fn test_end_computes_duration_and_merges_metadata() {
        let store = store().await;
        let created = store
            .create("dev-1", t0(), Some(metadata(json!({"a": 1, "b": 1}))))
            .await
            .unwrap();

        let ended = store
            .end(
                &created.session_id,
                t0() + Duration::seconds(125),
                Some(metadata(json!({"b": 2, "c": 3}))),
            )
            .await
            .unwrap();

        assert_eq!(ended.status, SessionStatus::Completed);
        assert_eq!(ended.duration, Some(125));

        let fetched = store.get_by_id(&created.session_id).await.unwrap();
        assert_eq!(fetched.status, SessionStatus::Completed);
        assert_eq!(fetched.end_time, Some(t0() + Duration::seconds(125)));
        assert_eq!(fetched.duration, Some(125));
        assert!(fetched.validate().is_ok());
        assert_eq!(
            serde_json::Value::Object(fetched.metadata.unwrap()),
            json!({"a": 1, "b": 2, "c": 3})
        );
    }

    #[tokio::test]
    async fn test_end_keeps_metadata_when_none_given() {
        let store = store().await;
        let created = store
            .create("dev-1", t0(), Some(metadata(json!({"a": 1}))))
            .await
            .unwrap();
        store
            .end(&created.session_id, t0() + Duration::seconds(1), None)
            .await
            .unwrap();

        let fetched = store.get_by_id(&created.session_id).await.unwrap();
        assert_eq!(fetched.metadata.unwrap()["a"], 1);
    }

    #[tokio::test]
    async fn test_end_twice_is_rejected() {
        let store = store().await;
        let created = store.create("dev-1", t0(), None).await.unwrap();
        store
            .end(&created.session_id, t0() + Duration::seconds(10), None)
            .await
            .unwrap();

        let err = store
            .end(&created.session_id, t0() + Duration::seconds(20), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionNotRunning { .. }));

        let err = store.end("missing", t0(), None).await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_list_filters_and_paginates() {
        let store = store().await;
        let day = Duration::days(1);
        let a = store.create("dev-1", t0(), None).await.unwrap();
        let b = store.create("dev-1", t0() + day, None).await.unwrap();
        let c = store.create("dev-2", t0() + day * 2, None).await.unwrap();
        store
            .end(&a.session_id, t0() + Duration::minutes(5), None)
            .await
            .unwrap();

        let page = store.list(&SessionFilter::default()).await.unwrap();
        assert_eq!(page.total, 3);
        let ids: Vec<_> = page.sessions.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec![c.session_id.as_str(), b.session_id.as_str(), a.session_id.as_str()]);

        let page = store
            .list(&SessionFilter {
                device_id: Some("dev-1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 2);

        let page = store
            .list(&SessionFilter {
                status: Some(SessionStatus::Completed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.sessions[0].session_id, a.session_id);

        let page = store
            .list(&SessionFilter {
                start_date: NaiveDate::from_ymd_opt(2024, 3, 2),
                end_date: NaiveDate::from_ymd_opt(2024, 3, 2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.sessions[0].session_id, b.session_id);

        let page = store
            .list(&SessionFilter {
                limit: Some(1),
                offset: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.sessions.len(), 1);
        assert_eq!(page.sessions[0].session_id, b.session_id);
    }

    #[tokio::test]
    async fn test_running_sessions_newest_first() {
        let store = store().await;
        let older = store.create("dev-1", t0(), None).await.unwrap();
        let newer = store
            .create("dev-1", t0() + Duration::hours(1), None)
            .await
            .unwrap();
        let done = store
            .create("dev-1", t0() + Duration::hours(2), None)
            .await
            .unwrap();
        store
            .end(&done.session_id, t0() + Duration::hours(3), None)
            .await
            .unwrap();
        store.create("dev-2", t0(), None).await.unwrap();

        let running = store.running_sessions("dev-1").await.unwrap();
        let ids: Vec<_> = running.iter().map(|s| s.session_id.clone()).collect();
        assert_eq!(ids, vec![newer.session_id, older.session_id]);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = store().await;
        let created = store.create("dev-1", t0(), None).await.unwrap();

        store.delete(&created.session_id).await.unwrap();
        assert!(matches!(
            store.get_by_id(&created.session_id).await,
            Err(Error::SessionNotFound(_))
        ));

        // Unknown ids are fine
        store.delete(&created.session_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_statistics() {
        let store = store().await;
        let s1 = store.create("dev-1", t0(), None).await.unwrap();
        let s2 = store
            .create("dev-1", t0() + Duration::hours(2), None)
            .await
            .unwrap();
        let s3 = store
            .create("dev-1", t0() + Duration::days(1), None)
            .await
            .unwrap();
        store.create("dev-1", t0() + Duration::days(1), None).await.unwrap();
        store.create("dev-2", t0(), None).await.unwrap();

        store
            .end(&s1.session_id, t0() + Duration::seconds(60), None)
            .await
            .unwrap();
        store
            .end(&s2.session_id, t0() + Duration::hours(2) + Duration::seconds(180), None)
            .await
            .unwrap();
        store
            .end(&s3.session_id, t0() + Duration::days(1), None)
            .await
            .unwrap();

        let stats = store
            .statistics(&StatisticsFilter {
                device_id: Some("dev-1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(stats.total_sessions, 4);
        assert_eq!(stats.completed_sessions, 3);
        assert_eq!(stats.running_sessions, 1);
        assert_eq!(stats.total_duration, 240);
        assert_eq!(stats.avg_duration, 80.0);
        assert_eq!(stats.max_duration, 180);
        // Zero-length sessions are ignored for the minimum
        assert_eq!(stats.min_duration, 60);

        assert_eq!(
            stats.daily_distribution,
            vec![
                DailySessionCount {
                    date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                    count: 2,
                    total_duration: 240,
                },
                DailySessionCount {
                    date: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
                    count: 2,
                    total_duration: 0,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_statistics_on_empty_store() {
        let stats = store()
            .await
            .statistics(&StatisticsFilter::default())
            .await
            .unwrap();
        assert_eq!(stats, SessionStatistics::default());
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sessions.db");

        let created = {
            let store = SqliteSessionStore::new(&path).await.unwrap();
            store.create("dev-1", t0(), None).await.unwrap()
        };

        let reopened = SqliteSessionStore::new(&path).await.unwrap();
        let fetched = reopened.get_by_id(&created.session_id).await.unwrap();
        assert_eq!(fetched.device_id, "dev-1");
    }
}
