//! 适配器契约（Adapter）
//!
//! 每种存储后端（关系库、文档库、搜索索引、内存存储……）实现同一组异步操作：
//! 按标识读写、按条件批量读取、开启/提交/回滚事务，并声明自身能力。
//! 没有原生事务的后端以补偿方式模拟事务，并通过
//! [`AdapterCapabilities::supports_native_transactions`] 如实声明。
//!
use crate::{
    error::DomainResult,
    persist::{Criteria, ResultSet, SerializedAggregate},
    value_object::Version,
};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// 适配器能力声明
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdapterCapabilities {
    pub supports_native_transactions: bool,
}

/// 进行中的事务令牌
///
/// 不可克隆，`commit`/`rollback` 消费它，因而不会被重复使用。
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct TransactionHandle {
    id: Uuid,
    adapter: String,
}

impl TransactionHandle {
    pub fn new(adapter: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            adapter: adapter.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn adapter(&self) -> &str {
        &self.adapter
    }
}

impl fmt::Display for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.adapter, self.id)
    }
}

#[async_trait]
pub trait Adapter: Send + Sync {
    /// 实例名（配置中的数据库名）
    fn name(&self) -> &str;

    fn capabilities(&self) -> AdapterCapabilities;

    /// 按标识读取；传入事务时可读到该事务尚未提交的写入
    async fn fetch(
        &self,
        tx: Option<&TransactionHandle>,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> DomainResult<SerializedAggregate>;

    /// 按条件读取一页
    async fn fetch_many(
        &self,
        tx: Option<&TransactionHandle>,
        aggregate_type: &str,
        criteria: &Criteria,
    ) -> DomainResult<ResultSet>;

    /// 插入或更新，返回新版本（`expected_version + 1`）
    ///
    /// `expected_version` 为 0 表示记录必须尚不存在；与存储版本不符时返回
    /// `ConcurrencyConflict`，绝不静默覆盖。
    async fn save(
        &self,
        tx: &TransactionHandle,
        record: SerializedAggregate,
        expected_version: Version,
    ) -> DomainResult<Version>;

    async fn delete(
        &self,
        tx: &TransactionHandle,
        aggregate_type: &str,
        aggregate_id: &str,
        expected_version: Option<Version>,
    ) -> DomainResult<()>;

    async fn begin(&self) -> DomainResult<TransactionHandle>;

    async fn commit(&self, tx: TransactionHandle) -> DomainResult<()>;

    async fn rollback(&self, tx: TransactionHandle) -> DomainResult<()>;
}

#[async_trait]
impl<T> Adapter for Arc<T>
where
    T: Adapter + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn capabilities(&self) -> AdapterCapabilities {
        (**self).capabilities()
    }

    async fn fetch(
        &self,
        tx: Option<&TransactionHandle>,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> DomainResult<SerializedAggregate> {
        (**self).fetch(tx, aggregate_type, aggregate_id).await
    }

    async fn fetch_many(
        &self,
        tx: Option<&TransactionHandle>,
        aggregate_type: &str,
        criteria: &Criteria,
    ) -> DomainResult<ResultSet> {
        (**self).fetch_many(tx, aggregate_type, criteria).await
    }

    async fn save(
        &self,
        tx: &TransactionHandle,
        record: SerializedAggregate,
        expected_version: Version,
    ) -> DomainResult<Version> {
        (**self).save(tx, record, expected_version).await
    }

    async fn delete(
        &self,
        tx: &TransactionHandle,
        aggregate_type: &str,
        aggregate_id: &str,
        expected_version: Option<Version>,
    ) -> DomainResult<()> {
        (**self)
            .delete(tx, aggregate_type, aggregate_id, expected_version)
            .await
    }

    async fn begin(&self) -> DomainResult<TransactionHandle> {
        (**self).begin().await
    }

    async fn commit(&self, tx: TransactionHandle) -> DomainResult<()> {
        (**self).commit(tx).await
    }

    async fn rollback(&self, tx: TransactionHandle) -> DomainResult<()> {
        (**self).rollback(tx).await
    }
}

impl fmt::Debug for dyn Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter").field("name", &self.name()).finish()
    }
}

/// 按配置选择的适配器实例
pub type SharedAdapter = Arc<dyn Adapter>;
