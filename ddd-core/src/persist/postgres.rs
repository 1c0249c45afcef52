//! Postgres 参考适配器（`postgres`，需开启 `infra-sqlx`）
//!
//! 所有聚合共用一张 JSONB 表，主键为 `(aggregate_type, aggregate_id)`；
//! 版本检查通过条件 INSERT/UPDATE 完成。不带过滤与排序的批量查询直接在 SQL 中
//! 分页（按 `aggregate_id` 字节序，与进程内求值一致），其余条件在进程内求值。
//!
use crate::{
    error::{DomainError, DomainResult},
    persist::{
        Adapter, AdapterCapabilities, Criteria, ResultSet, SerializedAggregate, TransactionHandle,
    },
    value_object::Version,
};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgExecutor, Postgres, Row, Transaction};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const DEFAULT_TABLE: &str = "ddd_aggregates";

type SharedTransaction = Arc<Mutex<Transaction<'static, Postgres>>>;

pub struct PostgresAdapter {
    name: String,
    pool: PgPool,
    table: String,
    transactions: DashMap<Uuid, SharedTransaction>,
}

impl PostgresAdapter {
    pub const PROVIDER: &'static str = "postgres";

    /// 使用已有连接池创建适配器；表名只允许字母、数字与下划线
    pub fn new(name: impl Into<String>, pool: PgPool, table: impl Into<String>) -> DomainResult<Self> {
        let table = table.into();
        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(DomainError::configuration(format!(
                "invalid table name `{table}`"
            )));
        }

        Ok(Self {
            name: name.into(),
            pool,
            table,
            transactions: DashMap::new(),
        })
    }

    /// 连接数据库并确保表存在
    pub async fn connect(
        name: impl Into<String>,
        url: &str,
        max_connections: u32,
        table: impl Into<String>,
    ) -> DomainResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        let adapter = Self::new(name, pool, table)?;
        adapter.ensure_table().await?;
        Ok(adapter)
    }

    pub async fn ensure_table(&self) -> DomainResult<()> {
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                aggregate_type    TEXT        NOT NULL,
                aggregate_id      TEXT        NOT NULL,
                aggregate_version BIGINT      NOT NULL,
                payload           JSONB       NOT NULL,
                updated_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (aggregate_type, aggregate_id)
            )
            "#,
            self.table
        );
        sqlx::query(&ddl).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn transaction(&self, tx: &TransactionHandle) -> DomainResult<SharedTransaction> {
        self.transactions
            .get(&tx.id())
            .map(|t| Arc::clone(t.value()))
            .ok_or_else(|| DomainError::adapter(&self.name, format!("unknown transaction {tx}")))
    }

    fn to_record(row: &PgRow) -> DomainResult<SerializedAggregate> {
        let version: i64 = row.try_get("aggregate_version")?;
        let payload: Value = row.try_get("payload")?;
        Ok(SerializedAggregate::builder()
            .aggregate_type(row.try_get::<String, _>("aggregate_type")?)
            .aggregate_id(row.try_get::<String, _>("aggregate_id")?)
            .aggregate_version(Version::from_value(usize::try_from(version).map_err(
                |e| DomainError::Database {
                    reason: format!("negative aggregate version {version}: {e}"),
                },
            )?))
            .payload(payload)
            .build())
    }

    async fn select_one<'e, E>(
        &self,
        executor: E,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> DomainResult<Option<SerializedAggregate>>
    where
        E: PgExecutor<'e>,
    {
        let sql = format!(
            "SELECT aggregate_type, aggregate_id, aggregate_version, payload FROM {} \
             WHERE aggregate_type = $1 AND aggregate_id = $2",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(aggregate_type)
            .bind(aggregate_id)
            .fetch_optional(executor)
            .await?;
        row.as_ref().map(Self::to_record).transpose()
    }

    fn page_sql(&self) -> String {
        format!(
            "SELECT aggregate_type, aggregate_id, aggregate_version, payload FROM {} \
             WHERE aggregate_type = $1 ORDER BY aggregate_id COLLATE \"C\" LIMIT $2 OFFSET $3",
            self.table
        )
    }

    async fn select_page(
        &self,
        conn: &mut PgConnection,
        aggregate_type: &str,
        criteria: &Criteria,
    ) -> DomainResult<ResultSet> {
        let count_sql = format!(
            "SELECT COUNT(*) FROM {} WHERE aggregate_type = $1",
            self.table
        );
        let total: i64 = sqlx::query_scalar(&count_sql)
            .bind(aggregate_type)
            .fetch_one(&mut *conn)
            .await?;

        // LIMIT NULL 即不限
        let rows = sqlx::query(&self.page_sql())
            .bind(aggregate_type)
            .bind(criteria.get_limit().map(as_db_count))
            .bind(as_db_count(criteria.get_offset()))
            .fetch_all(&mut *conn)
            .await?;

        Ok(ResultSet {
            offset: criteria.get_offset(),
            limit: criteria.get_limit(),
            total: usize::try_from(total).unwrap_or_default(),
            items: rows.iter().map(Self::to_record).collect::<DomainResult<_>>()?,
        })
    }

    async fn select_type<'e, E>(
        &self,
        executor: E,
        aggregate_type: &str,
    ) -> DomainResult<Vec<SerializedAggregate>>
    where
        E: PgExecutor<'e>,
    {
        let sql = format!(
            "SELECT aggregate_type, aggregate_id, aggregate_version, payload FROM {} \
             WHERE aggregate_type = $1 ORDER BY aggregate_id",
            self.table
        );
        let rows = sqlx::query(&sql)
            .bind(aggregate_type)
            .fetch_all(executor)
            .await?;
        rows.iter().map(Self::to_record).collect()
    }
}

fn as_db_version(version: Version) -> i64 {
    i64::try_from(version.value()).unwrap_or(i64::MAX)
}

fn as_db_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// 只有分页、没有过滤与排序的条件可以直接交给 SQL
fn pages_in_sql(criteria: &Criteria) -> bool {
    criteria.filters().is_empty() && criteria.ordering().is_empty()
}

#[async_trait]
impl Adapter for PostgresAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            supports_native_transactions: true,
        }
    }

    async fn fetch(
        &self,
        tx: Option<&TransactionHandle>,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> DomainResult<SerializedAggregate> {
        let found = match tx {
            Some(tx) => {
                let shared = self.transaction(tx)?;
                let mut guard = shared.lock().await;
                self.select_one(&mut **guard, aggregate_type, aggregate_id)
                    .await?
            }
            None => {
                self.select_one(&self.pool, aggregate_type, aggregate_id)
                    .await?
            }
        };
        found.ok_or_else(|| DomainError::not_found(aggregate_type, aggregate_id))
    }

    async fn fetch_many(
        &self,
        tx: Option<&TransactionHandle>,
        aggregate_type: &str,
        criteria: &Criteria,
    ) -> DomainResult<ResultSet> {
        if pages_in_sql(criteria) {
            return match tx {
                Some(tx) => {
                    let shared = self.transaction(tx)?;
                    let mut guard = shared.lock().await;
                    self.select_page(&mut **guard, aggregate_type, criteria).await
                }
                None => {
                    let mut conn = self.pool.acquire().await?;
                    self.select_page(&mut *conn, aggregate_type, criteria).await
                }
            };
        }

        let records = match tx {
            Some(tx) => {
                let shared = self.transaction(tx)?;
                let mut guard = shared.lock().await;
                self.select_type(&mut **guard, aggregate_type).await?
            }
            None => self.select_type(&self.pool, aggregate_type).await?,
        };
        Ok(criteria.apply(records))
    }

    async fn save(
        &self,
        tx: &TransactionHandle,
        record: SerializedAggregate,
        expected_version: Version,
    ) -> DomainResult<Version> {
        let shared = self.transaction(tx)?;
        let mut guard = shared.lock().await;
        let version = expected_version.next();

        let affected = if expected_version.is_new() {
            let sql = format!(
                "INSERT INTO {} (aggregate_type, aggregate_id, aggregate_version, payload) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (aggregate_type, aggregate_id) DO NOTHING",
                self.table
            );
            sqlx::query(&sql)
                .bind(record.aggregate_type())
                .bind(record.aggregate_id())
                .bind(as_db_version(version))
                .bind(record.payload())
                .execute(&mut **guard)
                .await?
                .rows_affected()
        } else {
            let sql = format!(
                "UPDATE {} SET aggregate_version = $3, payload = $4, updated_at = NOW() \
                 WHERE aggregate_type = $1 AND aggregate_id = $2 AND aggregate_version = $5",
                self.table
            );
            sqlx::query(&sql)
                .bind(record.aggregate_type())
                .bind(record.aggregate_id())
                .bind(as_db_version(version))
                .bind(record.payload())
                .bind(as_db_version(expected_version))
                .execute(&mut **guard)
                .await?
                .rows_affected()
        };

        if affected == 0 {
            let actual = self
                .select_one(&mut **guard, record.aggregate_type(), record.aggregate_id())
                .await?
                .map(|r| r.aggregate_version())
                .unwrap_or_default();
            return Err(DomainError::ConcurrencyConflict {
                aggregate_type: record.aggregate_type().to_string(),
                aggregate_id: record.aggregate_id().to_string(),
                expected: expected_version,
                actual,
            });
        }
        Ok(version)
    }

    async fn delete(
        &self,
        tx: &TransactionHandle,
        aggregate_type: &str,
        aggregate_id: &str,
        expected_version: Option<Version>,
    ) -> DomainResult<()> {
        let shared = self.transaction(tx)?;
        let mut guard = shared.lock().await;

        let current = self
            .select_one(&mut **guard, aggregate_type, aggregate_id)
            .await?
            .ok_or_else(|| DomainError::not_found(aggregate_type, aggregate_id))?
            .aggregate_version();
        let expected = expected_version.unwrap_or(current);

        let sql = format!(
            "DELETE FROM {} WHERE aggregate_type = $1 AND aggregate_id = $2 AND aggregate_version = $3",
            self.table
        );
        let affected = sqlx::query(&sql)
            .bind(aggregate_type)
            .bind(aggregate_id)
            .bind(as_db_version(expected))
            .execute(&mut **guard)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_type: aggregate_type.to_string(),
                aggregate_id: aggregate_id.to_string(),
                expected,
                actual: current,
            });
        }
        Ok(())
    }

    async fn begin(&self) -> DomainResult<TransactionHandle> {
        let transaction = self.pool.begin().await?;
        let tx = TransactionHandle::new(&self.name);
        self.transactions
            .insert(tx.id(), Arc::new(Mutex::new(transaction)));
        Ok(tx)
    }

    async fn commit(&self, tx: TransactionHandle) -> DomainResult<()> {
        let (_, shared) = self
            .transactions
            .remove(&tx.id())
            .ok_or_else(|| DomainError::adapter(&self.name, format!("unknown transaction {tx}")))?;
        let transaction = Arc::try_unwrap(shared)
            .map_err(|_| DomainError::adapter(&self.name, format!("transaction {tx} still in use")))?
            .into_inner();
        transaction.commit().await?;
        Ok(())
    }

    async fn rollback(&self, tx: TransactionHandle) -> DomainResult<()> {
        let Some((_, shared)) = self.transactions.remove(&tx.id()) else {
            return Ok(());
        };
        match Arc::try_unwrap(shared) {
            Ok(transaction) => transaction.into_inner().rollback().await?,
            // 仍被占用时随最后一个引用释放而由驱动回滚
            Err(_) => tracing::warn!(adapter = %self.name, tx = %tx.id(), "transaction still in use at rollback"),
        }
        Ok(())
    }
}
