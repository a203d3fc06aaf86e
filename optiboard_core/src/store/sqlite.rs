//! SQLite-backed DashboardDb implementation.
//!
//! Persists encrypted API keys and the mirrored optimization-result cache in
//! a single WAL-mode SQLite file. The unique index on
//! `(user_id, operation_id)` is what makes concurrent syncs of the same
//! operation safe.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error as CoreError, Result as CoreResult};
use crate::models::{RunStatus, UserId};
use crate::store::models::{ApiKeyRecord, ResultQuery, ResultRecord, ResultStats};
use crate::store::traits::DashboardDb;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

/// A durable, file-backed DashboardDb in a single SQLite file (WAL mode).
#[derive(Clone)]
pub struct SqliteDashboardDb {
    pool: SqlitePool,
}

impl SqliteDashboardDb {
    /// Create (or open) the store at the given file path.
    ///
    /// Creates the file and parent directories if they don't exist and runs
    /// the schema migration on startup.
    pub async fn new(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::backend("sqlite_dashboard_db", e))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path.display()))
            .map_err(|e| CoreError::backend("sqlite_dashboard_db", e))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(|e| CoreError::backend("sqlite_dashboard_db", e))?;

        Self::migrate(pool).await
    }

    /// In-memory store for tests and local development.
    pub async fn in_memory() -> CoreResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| CoreError::backend("sqlite_dashboard_db", e))?;

        // A single connection so every caller sees the same in-memory db.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .map_err(|e| CoreError::backend("sqlite_dashboard_db", e))?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> CoreResult<Self> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| CoreError::backend("sqlite_dashboard_db_migration", e))?;
        Ok(Self { pool })
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS api_keys (
    key_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    key_prefix TEXT NOT NULL,
    ciphertext TEXT NOT NULL,
    active INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    last_used_at TEXT
);

CREATE INDEX IF NOT EXISTS api_keys_user_idx ON api_keys(user_id);

CREATE TABLE IF NOT EXISTS optimization_results (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    operation_id TEXT NOT NULL,
    problem_id TEXT,
    best_solution TEXT,
    optimal_value REAL,
    strategy_used TEXT,
    evaluations_used INTEGER,
    convergence_history TEXT,
    execution_time_seconds REAL,
    iterations INTEGER,
    status TEXT NOT NULL,
    success INTEGER NOT NULL,
    error_message TEXT,
    learning_enabled INTEGER NOT NULL,
    learning_evaluations INTEGER,
    config TEXT,
    insights TEXT,
    domain TEXT,
    created_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS opt_results_user_operation
  ON optimization_results(user_id, operation_id);

CREATE INDEX IF NOT EXISTS opt_results_user_created
  ON optimization_results(user_id, created_at);
"#;

// ── Helpers ─────────────────────────────────────────────────────

fn db_err(e: sqlx::Error) -> CoreError {
    CoreError::backend("sqlite_dashboard_db", e)
}

fn parse_user_id(s: &str) -> UserId {
    UserId(Uuid::parse_str(s).unwrap_or(Uuid::nil()))
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    s.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now())
}

fn parse_json_opt(s: Option<String>) -> Option<serde_json::Value> {
    s.and_then(|s| serde_json::from_str(&s).ok())
}

fn json_opt_string(v: &Option<serde_json::Value>) -> Option<String> {
    v.as_ref().map(|v| v.to_string())
}

fn row_to_api_key(r: &SqliteRow) -> ApiKeyRecord {
    let key_id_str: String = r.get("key_id");
    let user_id_str: String = r.get("user_id");
    let created_at_str: String = r.get("created_at");
    let last_used_at_str: Option<String> = r.get("last_used_at");

    ApiKeyRecord {
        key_id: Uuid::parse_str(&key_id_str).unwrap_or(Uuid::nil()),
        user_id: parse_user_id(&user_id_str),
        name: r.get("name"),
        key_prefix: r.get("key_prefix"),
        ciphertext: r.get("ciphertext"),
        active: r.get("active"),
        created_at: parse_dt(&created_at_str),
        last_used_at: last_used_at_str.as_deref().map(parse_dt),
    }
}

fn row_to_result(r: &SqliteRow) -> ResultRecord {
    let id_str: String = r.get("id");
    let user_id_str: String = r.get("user_id");
    let status_str: String = r.get("status");
    let created_at_str: String = r.get("created_at");
    let completed_at_str: Option<String> = r.get("completed_at");

    ResultRecord {
        id: Uuid::parse_str(&id_str).unwrap_or(Uuid::nil()),
        user_id: parse_user_id(&user_id_str),
        operation_id: r.get("operation_id"),
        problem_id: r.get("problem_id"),
        best_solution: parse_json_opt(r.get("best_solution")),
        optimal_value: r.get("optimal_value"),
        strategy_used: r.get("strategy_used"),
        evaluations_used: r.get("evaluations_used"),
        convergence_history: parse_json_opt(r.get("convergence_history")),
        execution_time_seconds: r.get("execution_time_seconds"),
        iterations: r.get("iterations"),
        status: RunStatus::parse_str(&status_str).unwrap_or(RunStatus::Running),
        success: r.get("success"),
        error_message: r.get("error_message"),
        learning_enabled: r.get("learning_enabled"),
        learning_evaluations: r.get("learning_evaluations"),
        config: parse_json_opt(r.get("config")),
        insights: parse_json_opt(r.get("insights")),
        domain: r.get("domain"),
        created_at: parse_dt(&created_at_str),
        completed_at: completed_at_str.as_deref().map(parse_dt),
    }
}

const RESULT_COLUMNS: &str = "id, user_id, operation_id, problem_id, best_solution, optimal_value, \
     strategy_used, evaluations_used, convergence_history, execution_time_seconds, iterations, \
     status, success, error_message, learning_enabled, learning_evaluations, config, insights, \
     domain, created_at, completed_at";

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

/// Bind listing filter values in the same order the WHERE clause names them.
fn bind_filters<'q>(mut q: SqliteQuery<'q>, user_id: UserId, query: &ResultQuery) -> SqliteQuery<'q> {
    q = q.bind(user_id.to_string());
    if let Some(status) = query.status {
        q = q.bind(status.as_str());
    }
    if let Some(strategy) = &query.strategy {
        q = q.bind(strategy.clone());
    }
    if let Some(since) = &query.since {
        q = q.bind(since.to_rfc3339());
    }
    if let Some(until) = &query.until {
        q = q.bind(until.to_rfc3339());
    }
    if let Some(needle) = &query.search {
        q = q.bind(format!("%{needle}%"));
    }
    q
}

// ── DashboardDb impl ────────────────────────────────────────────

#[async_trait]
impl DashboardDb for SqliteDashboardDb {
    async fn insert_api_key(&self, key: &ApiKeyRecord) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO api_keys (key_id, user_id, name, key_prefix, ciphertext, active, created_at, last_used_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(key.key_id.to_string())
        .bind(key.user_id.to_string())
        .bind(&key.name)
        .bind(&key.key_prefix)
        .bind(&key.ciphertext)
        .bind(key.active)
        .bind(key.created_at.to_rfc3339())
        .bind(key.last_used_at.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_api_keys(&self, user_id: UserId) -> CoreResult<Vec<ApiKeyRecord>> {
        let rows = sqlx::query(
            "SELECT key_id, user_id, name, key_prefix, ciphertext, active, created_at, last_used_at
             FROM api_keys WHERE user_id = ?1
             ORDER BY created_at DESC, key_id DESC",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.iter().map(row_to_api_key).collect())
    }

    async fn revoke_api_key(&self, user_id: UserId, key_id: Uuid) -> CoreResult<ApiKeyRecord> {
        let updated =
            sqlx::query("UPDATE api_keys SET active = 0 WHERE user_id = ?1 AND key_id = ?2")
                .bind(user_id.to_string())
                .bind(key_id.to_string())
                .execute(&self.pool)
                .await
                .map_err(db_err)?;

        if updated.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("api key not found: {key_id}")));
        }

        let row = sqlx::query(
            "SELECT key_id, user_id, name, key_prefix, ciphertext, active, created_at, last_used_at
             FROM api_keys WHERE user_id = ?1 AND key_id = ?2",
        )
        .bind(user_id.to_string())
        .bind(key_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row_to_api_key(&row))
    }

    async fn latest_active_api_key(&self, user_id: UserId) -> CoreResult<Option<ApiKeyRecord>> {
        let row = sqlx::query(
            "SELECT key_id, user_id, name, key_prefix, ciphertext, active, created_at, last_used_at
             FROM api_keys WHERE user_id = ?1 AND active = 1
             ORDER BY created_at DESC, key_id DESC
             LIMIT 1",
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|r| row_to_api_key(&r)))
    }

    async fn touch_api_key_last_used(&self, key_id: Uuid, at: DateTime<Utc>) -> CoreResult<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = ?2 WHERE key_id = ?1")
            .bind(key_id.to_string())
            .bind(at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn upsert_result(&self, record: &ResultRecord) -> CoreResult<ResultRecord> {
        // id and created_at belong to the first insert; later syncs only
        // refresh the mirrored fields.
        sqlx::query(
            "INSERT INTO optimization_results
               (id, user_id, operation_id, problem_id, best_solution, optimal_value,
                strategy_used, evaluations_used, convergence_history, execution_time_seconds,
                iterations, status, success, error_message, learning_enabled,
                learning_evaluations, config, insights, domain, created_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)
             ON CONFLICT(user_id, operation_id) DO UPDATE SET
               problem_id = excluded.problem_id,
               best_solution = excluded.best_solution,
               optimal_value = excluded.optimal_value,
               strategy_used = excluded.strategy_used,
               evaluations_used = excluded.evaluations_used,
               convergence_history = excluded.convergence_history,
               execution_time_seconds = excluded.execution_time_seconds,
               iterations = excluded.iterations,
               status = excluded.status,
               success = excluded.success,
               error_message = excluded.error_message,
               learning_enabled = excluded.learning_enabled,
               learning_evaluations = excluded.learning_evaluations,
               config = excluded.config,
               insights = excluded.insights,
               domain = excluded.domain,
               completed_at = excluded.completed_at",
        )
        .bind(record.id.to_string())
        .bind(record.user_id.to_string())
        .bind(&record.operation_id)
        .bind(&record.problem_id)
        .bind(json_opt_string(&record.best_solution))
        .bind(record.optimal_value)
        .bind(&record.strategy_used)
        .bind(record.evaluations_used)
        .bind(json_opt_string(&record.convergence_history))
        .bind(record.execution_time_seconds)
        .bind(record.iterations)
        .bind(record.status.as_str())
        .bind(record.success)
        .bind(&record.error_message)
        .bind(record.learning_enabled)
        .bind(record.learning_evaluations)
        .bind(json_opt_string(&record.config))
        .bind(json_opt_string(&record.insights))
        .bind(&record.domain)
        .bind(record.created_at.to_rfc3339())
        .bind(record.completed_at.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        self.get_result(record.user_id, &record.operation_id)
            .await?
            .ok_or_else(|| {
                CoreError::BackendMessage("upsert did not persist the result row".to_string())
            })
    }

    async fn get_result(
        &self,
        user_id: UserId,
        operation_id: &str,
    ) -> CoreResult<Option<ResultRecord>> {
        let sql = format!(
            "SELECT {RESULT_COLUMNS} FROM optimization_results
             WHERE user_id = ?1 AND operation_id = ?2"
        );
        let row = sqlx::query(&sql)
            .bind(user_id.to_string())
            .bind(operation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(row.map(|r| row_to_result(&r)))
    }

    async fn list_results(
        &self,
        user_id: UserId,
        query: &ResultQuery,
    ) -> CoreResult<(Vec<ResultRecord>, u64)> {
        let query = query.clamped();

        let mut conditions = vec!["user_id = ?1".to_string()];
        let mut next_param = 2;

        if query.status.is_some() {
            conditions.push(format!("status = ?{next_param}"));
            next_param += 1;
        }
        if query.strategy.is_some() {
            conditions.push(format!("strategy_used = ?{next_param}"));
            next_param += 1;
        }
        if query.since.is_some() {
            conditions.push(format!("created_at >= ?{next_param}"));
            next_param += 1;
        }
        if query.until.is_some() {
            conditions.push(format!("created_at <= ?{next_param}"));
            next_param += 1;
        }
        if query.search.is_some() {
            conditions.push(format!("problem_id LIKE ?{next_param}"));
            next_param += 1;
        }

        let where_clause = conditions.join(" AND ");

        let count_sql =
            format!("SELECT COUNT(*) AS n FROM optimization_results WHERE {where_clause}");
        let count_row = bind_filters(sqlx::query(&count_sql), user_id, &query)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        let total: i64 = count_row.get("n");

        // sort_by is a closed enum; only allow-listed column names can appear here.
        let sql = format!(
            "SELECT {RESULT_COLUMNS} FROM optimization_results
             WHERE {where_clause}
             ORDER BY {col} {dir}, id {dir}
             LIMIT ?{lim} OFFSET ?{off}",
            col = query.sort_by.as_column(),
            dir = query.sort_order.as_sql(),
            lim = next_param,
            off = next_param + 1,
        );
        let rows = bind_filters(sqlx::query(&sql), user_id, &query)
            .bind(query.limit as i64)
            .bind(query.offset() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Ok((
            rows.iter().map(row_to_result).collect(),
            total.max(0) as u64,
        ))
    }

    async fn result_stats(&self, user_id: UserId) -> CoreResult<ResultStats> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total,
                    COALESCE(SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END), 0) AS successful,
                    COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed,
                    COALESCE(SUM(CASE WHEN status = 'running' THEN 1 ELSE 0 END), 0) AS running,
                    AVG(execution_time_seconds) AS avg_execution_seconds,
                    AVG(evaluations_used) AS avg_evaluations
             FROM optimization_results WHERE user_id = ?1",
        )
        .bind(user_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let total: i64 = row.get("total");
        let successful: i64 = row.get("successful");
        let failed: i64 = row.get("failed");
        let running: i64 = row.get("running");

        Ok(ResultStats {
            total: total.max(0) as u64,
            successful: successful.max(0) as u64,
            failed: failed.max(0) as u64,
            running: running.max(0) as u64,
            avg_execution_seconds: row.get("avg_execution_seconds"),
            avg_evaluations: row.get("avg_evaluations"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{ResultQuery, SortField, SortOrder};

    fn record(user_id: UserId, operation_id: &str) -> ResultRecord {
        ResultRecord {
            id: Uuid::new_v4(),
            user_id,
            operation_id: operation_id.to_string(),
            problem_id: None,
            best_solution: None,
            optimal_value: None,
            strategy_used: None,
            evaluations_used: None,
            convergence_history: None,
            execution_time_seconds: None,
            iterations: None,
            status: RunStatus::Running,
            success: false,
            error_message: None,
            learning_enabled: false,
            learning_evaluations: None,
            config: None,
            insights: None,
            domain: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn upsert_updates_in_place_instead_of_duplicating() {
        let db = SqliteDashboardDb::in_memory().await.unwrap();
        let user = UserId(Uuid::new_v4());

        let first = db.upsert_result(&record(user, "op_1")).await.unwrap();

        let mut updated = record(user, "op_1");
        updated.status = RunStatus::Completed;
        updated.success = true;
        updated.optimal_value = Some(0.5);
        let second = db.upsert_result(&updated).await.unwrap();

        // Same local row: id and created_at survive the second sync.
        assert_eq!(second.id, first.id);
        assert_eq!(second.status, RunStatus::Completed);
        assert!(second.success);

        let stats = db.result_stats(user).await.unwrap();
        assert_eq!(stats.total, 1);
    }

    #[tokio::test]
    async fn list_filters_sorts_and_paginates() {
        let db = SqliteDashboardDb::in_memory().await.unwrap();
        let user = UserId(Uuid::new_v4());

        for (op, value, strategy) in [
            ("op_a", 3.0, "cma_es"),
            ("op_b", 1.0, "cma_es"),
            ("op_c", 2.0, "bayesian"),
        ] {
            let mut rec = record(user, op);
            rec.optimal_value = Some(value);
            rec.strategy_used = Some(strategy.to_string());
            rec.status = RunStatus::Completed;
            rec.success = true;
            db.upsert_result(&rec).await.unwrap();
        }

        let query = ResultQuery {
            sort_by: SortField::OptimalValue,
            sort_order: SortOrder::Asc,
            ..ResultQuery::default()
        };
        let (items, total) = db.list_results(user, &query).await.unwrap();
        assert_eq!(total, 3);
        let ops: Vec<_> = items.iter().map(|r| r.operation_id.as_str()).collect();
        assert_eq!(ops, vec!["op_b", "op_c", "op_a"]);

        let query = ResultQuery {
            strategy: Some("cma_es".to_string()),
            ..ResultQuery::default()
        };
        let (items, total) = db.list_results(user, &query).await.unwrap();
        assert_eq!(total, 2);
        assert!(items.iter().all(|r| r.strategy_used.as_deref() == Some("cma_es")));

        // An oversized limit is clamped inside the store.
        let query = ResultQuery {
            limit: 500,
            page: 0,
            ..ResultQuery::default()
        };
        let (items, _) = db.list_results(user, &query).await.unwrap();
        assert_eq!(items.len(), 3);
    }

    #[tokio::test]
    async fn search_matches_problem_id() {
        let db = SqliteDashboardDb::in_memory().await.unwrap();
        let user = UserId(Uuid::new_v4());

        let mut rec = record(user, "op_1");
        rec.problem_id = Some("portfolio-rebalance".to_string());
        db.upsert_result(&rec).await.unwrap();
        db.upsert_result(&record(user, "op_2")).await.unwrap();

        let query = ResultQuery {
            search: Some("rebalance".to_string()),
            ..ResultQuery::default()
        };
        let (items, total) = db.list_results(user, &query).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].operation_id, "op_1");
    }

    #[tokio::test]
    async fn stats_cover_the_unfiltered_owner_scope() {
        let db = SqliteDashboardDb::in_memory().await.unwrap();
        let user = UserId(Uuid::new_v4());
        let other = UserId(Uuid::new_v4());

        let mut done = record(user, "op_1");
        done.status = RunStatus::Completed;
        done.success = true;
        done.execution_time_seconds = Some(2.0);
        done.evaluations_used = Some(100);
        db.upsert_result(&done).await.unwrap();

        let mut failed = record(user, "op_2");
        failed.status = RunStatus::Failed;
        failed.execution_time_seconds = Some(4.0);
        failed.evaluations_used = Some(300);
        db.upsert_result(&failed).await.unwrap();

        db.upsert_result(&record(other, "op_1")).await.unwrap();

        let stats = db.result_stats(user).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.running, 0);
        assert_eq!(stats.avg_execution_seconds, Some(3.0));
        assert_eq!(stats.avg_evaluations, Some(200.0));
    }

    #[tokio::test]
    async fn revoking_anothers_key_is_not_found() {
        let db = SqliteDashboardDb::in_memory().await.unwrap();
        let owner = UserId(Uuid::new_v4());
        let stranger = UserId(Uuid::new_v4());

        let key = ApiKeyRecord {
            key_id: Uuid::new_v4(),
            user_id: owner,
            name: "prod".to_string(),
            key_prefix: "ob_01ABCDE".to_string(),
            ciphertext: "aa:bb:cc".to_string(),
            active: true,
            created_at: Utc::now(),
            last_used_at: None,
        };
        db.insert_api_key(&key).await.unwrap();

        let err = db.revoke_api_key(stranger, key.key_id).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));

        let revoked = db.revoke_api_key(owner, key.key_id).await.unwrap();
        assert!(!revoked.active);
        assert!(db.latest_active_api_key(owner).await.unwrap().is_none());
    }
}
