//! PostgreSQL driver on top of `SeaORM` / `SQLx`.
//!
//! Statements are rendered by [`crate::query::sql`] and executed on a
//! [`DatabaseTransaction`]. Tenant bindings use `set_config(key, value, true)`,
//! which PostgreSQL discards at the end of the transaction.
//!
//! The connecting role must not be a superuser and must not carry `BYPASSRLS`,
//! otherwise the engine skips row-level security entirely.

use std::time::Duration;

use async_trait::async_trait;
use sea_orm::sqlx::postgres::PgPoolOptions;
use sea_orm::{
    ConnAcquireErr, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr,
    QueryResult, RuntimeErr, SqlErr, SqlxPostgresConnector, TransactionTrait,
};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{DatabaseConfig, redact_dsn};
use crate::driver::{PoolStats, StoragePool, StorageTransaction};
use crate::error::{DbError, DriverError};
use crate::policy::{IsolationPolicy, PolicyStatus, PolicyStore};
use crate::pool_opts::ApplyPoolOpts;
use crate::query::sql::{BACKEND_PID_SQL, CURRENT_SETTING_SQL, SET_LOCAL_SQL, render};
use crate::query::{Row, Statement, is_valid_setting};

const POLICY_STATUS_SQL: &str = r#"SELECT c.relrowsecurity AS "enabled",
       c.relforcerowsecurity AS "forced",
       EXISTS (
           SELECT 1 FROM pg_policies p
           WHERE p.schemaname = n.nspname
             AND p.tablename = c.relname
             AND p.policyname = $2
       ) AS "present"
FROM pg_class c
JOIN pg_namespace n ON n.oid = c.relnamespace
WHERE c.relname = $1 AND n.nspname = current_schema()"#;

/// Pooled PostgreSQL storage.
#[derive(Clone)]
pub struct PgStorage {
    pool: sea_orm::sqlx::PgPool,
    sea: DatabaseConnection,
}

impl PgStorage {
    /// Open the pool described by `cfg`.
    ///
    /// # Errors
    /// [`DbError::InvalidConfig`] without a DSN, [`DbError::Connect`] when the
    /// server cannot be reached.
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self, DbError> {
        let dsn = cfg
            .dsn
            .as_deref()
            .ok_or_else(|| DbError::InvalidConfig("database.dsn is required".to_owned()))?;
        let pool = PgPoolOptions::new()
            .apply(cfg)
            .connect(dsn)
            .await
            .map_err(|err| DbError::Connect {
                dsn: redact_dsn(dsn),
                source: DriverError::Backend(err.to_string()),
            })?;
        info!(
            dsn = %redact_dsn(dsn),
            max_conns = cfg.max_conns,
            "connected to PostgreSQL"
        );
        Ok(Self::from_sqlx(pool))
    }

    /// Wrap an existing `SQLx` pool.
    #[must_use]
    pub fn from_sqlx(pool: sea_orm::sqlx::PgPool) -> Self {
        let sea = SqlxPostgresConnector::from_sqlx_postgres_pool(pool.clone());
        Self { pool, sea }
    }

    #[must_use]
    pub fn sea(&self) -> &DatabaseConnection {
        &self.sea
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn run_script(&self, table: &str, statements: Vec<String>) -> Result<(), DriverError> {
        let txn = self
            .sea
            .begin()
            .await
            .map_err(|err| classify(&err, Some(table)))?;
        for sql in statements {
            debug!(table, sql = %sql, "executing policy DDL");
            txn.execute(sea_orm::Statement::from_string(DbBackend::Postgres, sql))
                .await
                .map_err(|err| classify(&err, Some(table)))?;
        }
        txn.commit()
            .await
            .map_err(|err| classify(&err, Some(table)))
    }
}

#[async_trait]
impl StoragePool for PgStorage {
    type Tx = PgTx;

    async fn begin(&self, acquire_timeout: Duration) -> Result<PgTx, DriverError> {
        let txn = tokio::time::timeout(acquire_timeout, self.sea.begin())
            .await
            .map_err(|_| DriverError::PoolTimeout(acquire_timeout))?
            .map_err(|err| classify(&err, None))?;

        let pid = txn
            .query_one(sea_orm::Statement::from_string(
                DbBackend::Postgres,
                BACKEND_PID_SQL,
            ))
            .await
            .map_err(|err| classify(&err, None))?
            .and_then(|row| row.try_get::<i32>("", "pid").ok())
            .and_then(|pid| u64::try_from(pid).ok());

        Ok(PgTx { txn, pid })
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: u32::try_from(self.pool.num_idle()).unwrap_or(u32::MAX),
        }
    }
}

/// One PostgreSQL transaction on one pooled connection.
pub struct PgTx {
    txn: DatabaseTransaction,
    pid: Option<u64>,
}

#[async_trait]
impl StorageTransaction for PgTx {
    async fn set_local(&mut self, key: &str, value: &str) -> Result<(), DriverError> {
        if !is_valid_setting(key) {
            return Err(DriverError::InvalidSetting(key.to_owned()));
        }
        self.txn
            .execute(sea_orm::Statement::from_sql_and_values(
                DbBackend::Postgres,
                SET_LOCAL_SQL,
                [sea_orm::Value::from(key), sea_orm::Value::from(value)],
            ))
            .await
            .map_err(|err| match sqlstate(&err).as_deref() {
                Some("42704" | "22023") => DriverError::InvalidSetting(key.to_owned()),
                _ => classify(&err, None),
            })?;
        Ok(())
    }

    async fn current_setting(&mut self, key: &str) -> Result<Option<String>, DriverError> {
        if !is_valid_setting(key) {
            return Err(DriverError::InvalidSetting(key.to_owned()));
        }
        let row = self
            .txn
            .query_one(sea_orm::Statement::from_sql_and_values(
                DbBackend::Postgres,
                CURRENT_SETTING_SQL,
                [sea_orm::Value::from(key)],
            ))
            .await
            .map_err(|err| classify(&err, None))?;
        match row {
            Some(row) => row
                .try_get::<Option<String>>("", "value")
                .map_err(|err| DriverError::Decode(err.to_string())),
            None => Ok(None),
        }
    }

    async fn execute(&mut self, statement: &Statement) -> Result<Vec<Row>, DriverError> {
        let rendered = render(statement).map_err(DriverError::InvalidStatement)?;
        let rows = self
            .txn
            .query_all(sea_orm::Statement::from_sql_and_values(
                DbBackend::Postgres,
                rendered.sql,
                rendered.values,
            ))
            .await
            .map_err(|err| classify(&err, Some(statement.table())))?;
        rows.iter().map(decode_row).collect()
    }

    async fn commit(self) -> Result<(), DriverError> {
        self.txn.commit().await.map_err(|err| classify(&err, None))
    }

    async fn rollback(self) -> Result<(), DriverError> {
        self.txn.rollback().await.map_err(|err| classify(&err, None))
    }

    fn connection_id(&self) -> Option<u64> {
        self.pid
    }
}

#[async_trait]
impl PolicyStore for PgStorage {
    async fn install_policy(&self, policy: &IsolationPolicy) -> Result<(), DriverError> {
        self.run_script(policy.table(), policy.install_statements())
            .await
    }

    async fn drop_policy(&self, policy: &IsolationPolicy) -> Result<(), DriverError> {
        self.run_script(policy.table(), policy.drop_statements())
            .await
    }

    async fn policy_status(&self, policy: &IsolationPolicy) -> Result<PolicyStatus, DriverError> {
        let row = self
            .sea
            .query_one(sea_orm::Statement::from_sql_and_values(
                DbBackend::Postgres,
                POLICY_STATUS_SQL,
                [
                    sea_orm::Value::from(policy.table()),
                    sea_orm::Value::from(policy.name()),
                ],
            ))
            .await
            .map_err(|err| classify(&err, Some(policy.table())))?
            .ok_or_else(|| DriverError::UnknownTable(policy.table().to_owned()))?;
        let flag = |col: &str| {
            row.try_get::<bool>("", col)
                .map_err(|err| DriverError::Decode(err.to_string()))
        };
        Ok(PolicyStatus {
            row_security_enabled: flag("enabled")?,
            forced: flag("forced")?,
            policy_present: flag("present")?,
        })
    }
}

/// Rendered statements return exactly one `jsonb` column.
fn decode_row(row: &QueryResult) -> Result<Row, DriverError> {
    match row.try_get_by_index::<Value>(0) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(DriverError::Decode("row is not a JSON object".to_owned())),
        Err(err) => Err(DriverError::Decode(err.to_string())),
    }
}

fn sqlstate(err: &DbErr) -> Option<String> {
    let (DbErr::Exec(RuntimeErr::SqlxError(inner))
    | DbErr::Query(RuntimeErr::SqlxError(inner))
    | DbErr::Conn(RuntimeErr::SqlxError(inner))) = err
    else {
        return None;
    };
    match inner {
        sea_orm::sqlx::Error::Database(db) => db.code().map(std::borrow::Cow::into_owned),
        _ => None,
    }
}

/// Map an engine error onto the driver seam. Engine text stays in `Backend`.
fn classify(err: &DbErr, table: Option<&str>) -> DriverError {
    let table_name = || table.unwrap_or_default().to_owned();

    if let DbErr::ConnectionAcquire(acquire) = err {
        return if matches!(acquire, ConnAcquireErr::Timeout) {
            DriverError::PoolTimeout(Duration::ZERO)
        } else {
            DriverError::PoolClosed
        };
    }
    if let Some(SqlErr::UniqueConstraintViolation(detail)) = err.sql_err() {
        return DriverError::UniqueViolation {
            table: table_name(),
            detail,
        };
    }
    let code = sqlstate(err);
    // insufficient_privilege is what a failed WITH CHECK reports
    if code.as_deref() == Some("42501") || err.to_string().contains("row-level security") {
        return DriverError::PolicyViolation {
            table: table_name(),
        };
    }
    match code.as_deref() {
        // serialization_failure, deadlock_detected, lock_not_available
        Some("40001" | "40P01" | "55P03") => DriverError::WriteConflict {
            table: table_name(),
        },
        Some("42703") => DriverError::InvalidStatement("unknown column".to_owned()),
        Some("42P01") => DriverError::UnknownTable(table_name()),
        _ => DriverError::Backend(err.to_string()),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn acquire_errors_map_to_pool_errors() {
        assert!(matches!(
            classify(&DbErr::ConnectionAcquire(ConnAcquireErr::Timeout), None),
            DriverError::PoolTimeout(_)
        ));
        assert!(matches!(
            classify(
                &DbErr::ConnectionAcquire(ConnAcquireErr::ConnectionClosed),
                None
            ),
            DriverError::PoolClosed
        ));
    }

    #[test]
    fn policy_rejections_are_recognised_by_message() {
        let err = DbErr::Custom(
            "new row violates row-level security policy for table \"widgets\"".to_owned(),
        );
        match classify(&err, Some("widgets")) {
            DriverError::PolicyViolation { table } => assert_eq!(table, "widgets"),
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn other_errors_keep_engine_text() {
        let err = DbErr::Custom("disk full".to_owned());
        assert!(matches!(classify(&err, None), DriverError::Backend(msg) if msg.contains("disk full")));
    }
}
