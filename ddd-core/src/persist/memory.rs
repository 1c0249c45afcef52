//! 内存适配器（`memory`）
//!
//! 具备原生事务语义：写入按事务暂存，提交时在同一把锁下重新校验
//! 暂存时观察到的版本，全部通过后一次性生效。
//!
use crate::{
    aggregate::AggregateKey,
    error::{DomainError, DomainResult},
    persist::{
        Adapter, AdapterCapabilities, Criteria, ResultSet, SerializedAggregate, TransactionHandle,
    },
    value_object::Version,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

#[derive(Debug, Clone)]
enum Write {
    Put(SerializedAggregate),
    Delete,
}

#[derive(Debug, Clone)]
struct StagedWrite {
    key: AggregateKey,
    /// 暂存时观察到的版本（0 表示不存在）
    base: Version,
    write: Write,
}

pub struct InMemoryAdapter {
    name: String,
    records: RwLock<BTreeMap<AggregateKey, SerializedAggregate>>,
    staged: Mutex<HashMap<Uuid, Vec<StagedWrite>>>,
}

impl InMemoryAdapter {
    pub const PROVIDER: &'static str = "memory";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: RwLock::new(BTreeMap::new()),
            staged: Mutex::new(HashMap::new()),
        }
    }

    /// 已提交记录数
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// 进行中的事务数
    pub fn open_transactions(&self) -> usize {
        self.staged.lock().len()
    }

    fn unknown_transaction(&self, tx: &TransactionHandle) -> DomainError {
        DomainError::adapter(&self.name, format!("unknown transaction {tx}"))
    }

    /// 事务视角下的记录：暂存写入优先，其次为已提交记录
    fn visible(
        &self,
        staged: Option<&[StagedWrite]>,
        key: &AggregateKey,
    ) -> Option<SerializedAggregate> {
        let overlay = staged
            .into_iter()
            .flatten()
            .rev()
            .find(|w| &w.key == key);
        match overlay {
            Some(StagedWrite {
                write: Write::Put(record),
                ..
            }) => Some(record.clone()),
            Some(StagedWrite {
                write: Write::Delete,
                ..
            }) => None,
            None => self.records.read().get(key).cloned(),
        }
    }

    fn stage(
        &self,
        tx: &TransactionHandle,
        key: AggregateKey,
        expected: Option<Version>,
        write: impl FnOnce(Version) -> DomainResult<(Write, Version)>,
    ) -> DomainResult<Version> {
        let mut staged = self.staged.lock();
        let writes = staged
            .get_mut(&tx.id())
            .ok_or_else(|| self.unknown_transaction(tx))?;

        let current = self
            .visible(Some(writes.as_slice()), &key)
            .map(|r| r.aggregate_version())
            .unwrap_or_default();
        if let Some(expected) = expected {
            if expected != current {
                return Err(DomainError::ConcurrencyConflict {
                    aggregate_type: key.aggregate_type().to_string(),
                    aggregate_id: key.aggregate_id().to_string(),
                    expected,
                    actual: current,
                });
            }
        }

        let (write, version) = write(current)?;
        writes.push(StagedWrite {
            key,
            base: current,
            write,
        });
        Ok(version)
    }
}

#[async_trait]
impl Adapter for InMemoryAdapter {
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
        let key = AggregateKey::new(aggregate_type, aggregate_id);
        let staged = self.staged.lock();
        let writes = tx.and_then(|tx| staged.get(&tx.id())).map(Vec::as_slice);
        self.visible(writes, &key)
            .ok_or_else(|| DomainError::not_found(aggregate_type, aggregate_id))
    }

    async fn fetch_many(
        &self,
        tx: Option<&TransactionHandle>,
        aggregate_type: &str,
        criteria: &Criteria,
    ) -> DomainResult<ResultSet> {
        let mut view: BTreeMap<AggregateKey, SerializedAggregate> = self
            .records
            .read()
            .iter()
            .filter(|(key, _)| key.aggregate_type() == aggregate_type)
            .map(|(key, record)| (key.clone(), record.clone()))
            .collect();

        let staged = self.staged.lock();
        for staged_write in tx.and_then(|tx| staged.get(&tx.id())).into_iter().flatten() {
            if staged_write.key.aggregate_type() != aggregate_type {
                continue;
            }
            match &staged_write.write {
                Write::Put(record) => {
                    view.insert(staged_write.key.clone(), record.clone());
                }
                Write::Delete => {
                    view.remove(&staged_write.key);
                }
            }
        }

        Ok(criteria.apply(view.into_values()))
    }

    async fn save(
        &self,
        tx: &TransactionHandle,
        record: SerializedAggregate,
        expected_version: Version,
    ) -> DomainResult<Version> {
        let key = record.key();
        self.stage(tx, key, Some(expected_version), |_| {
            let version = expected_version.next();
            Ok((Write::Put(record.with_version(version)), version))
        })
    }

    async fn delete(
        &self,
        tx: &TransactionHandle,
        aggregate_type: &str,
        aggregate_id: &str,
        expected_version: Option<Version>,
    ) -> DomainResult<()> {
        let key = AggregateKey::new(aggregate_type, aggregate_id);
        self.stage(tx, key, expected_version, |current| {
            if current.is_new() {
                return Err(DomainError::not_found(aggregate_type, aggregate_id));
            }
            Ok((Write::Delete, current))
        })?;
        Ok(())
    }

    async fn begin(&self) -> DomainResult<TransactionHandle> {
        let tx = TransactionHandle::new(&self.name);
        self.staged.lock().insert(tx.id(), Vec::new());
        tracing::debug!(adapter = %self.name, tx = %tx.id(), "transaction begun");
        Ok(tx)
    }

    async fn commit(&self, tx: TransactionHandle) -> DomainResult<()> {
        let writes = self
            .staged
            .lock()
            .remove(&tx.id())
            .ok_or_else(|| self.unknown_transaction(&tx))?;

        let mut records = self.records.write();

        // 先整体校验，再整体生效
        let mut observed: HashMap<&AggregateKey, Version> = HashMap::new();
        for staged_write in &writes {
            let actual = match observed.get(&staged_write.key) {
                Some(version) => *version,
                None => records
                    .get(&staged_write.key)
                    .map(|r| r.aggregate_version())
                    .unwrap_or_default(),
            };
            if actual != staged_write.base {
                return Err(DomainError::ConcurrencyConflict {
                    aggregate_type: staged_write.key.aggregate_type().to_string(),
                    aggregate_id: staged_write.key.aggregate_id().to_string(),
                    expected: staged_write.base,
                    actual,
                });
            }
            let after = match &staged_write.write {
                Write::Put(record) => record.aggregate_version(),
                Write::Delete => Version::new(),
            };
            observed.insert(&staged_write.key, after);
        }

        for staged_write in writes {
            match staged_write.write {
                Write::Put(record) => {
                    records.insert(staged_write.key, record);
                }
                Write::Delete => {
                    records.remove(&staged_write.key);
                }
            }
        }

        tracing::debug!(adapter = %self.name, tx = %tx.id(), "transaction committed");
        Ok(())
    }

    async fn rollback(&self, tx: TransactionHandle) -> DomainResult<()> {
        if self.staged.lock().remove(&tx.id()).is_none() {
            tracing::debug!(adapter = %self.name, tx = %tx.id(), "rollback of unknown transaction");
        }
        Ok(())
    }
}
