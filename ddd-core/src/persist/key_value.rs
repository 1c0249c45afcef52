//! 键值适配器（`kv`）
//!
//! 模拟没有原生事务的后端：写入立即生效，`begin`/`commit` 只负责开启与关闭
//! 撤销日志，`rollback` 按逆序回放补偿写入（尽力而为）。
//!
//! 补偿只作用于仍保持本事务写入结果的记录；其间已被其他会话改写的键
//! 原样保留，并以错误形式报告。
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
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

#[derive(Debug)]
enum Undo {
    /// 恢复被覆盖的旧值；`written` 为本事务写入的版本
    Restore {
        previous: SerializedAggregate,
        written: Version,
    },
    /// 恢复被删除的记录
    Reinsert(SerializedAggregate),
    /// 删除新插入的记录
    Remove { key: AggregateKey, written: Version },
}

pub struct KeyValueAdapter {
    name: String,
    entries: DashMap<AggregateKey, SerializedAggregate>,
    undo_logs: DashMap<Uuid, Vec<Undo>>,
}

impl KeyValueAdapter {
    pub const PROVIDER: &'static str = "kv";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: DashMap::new(),
            undo_logs: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn log(&self, tx: &TransactionHandle, undo: Undo) -> DomainResult<()> {
        let mut log = self.undo_logs.get_mut(&tx.id()).ok_or_else(|| {
            DomainError::adapter(&self.name, format!("unknown transaction {tx}"))
        })?;
        log.push(undo);
        Ok(())
    }

    /// 执行一条补偿；记录已被他人改写时返回该键
    fn compensate(&self, undo: Undo) -> Option<AggregateKey> {
        match undo {
            Undo::Restore { previous, written } => match self.entries.entry(previous.key()) {
                Entry::Occupied(mut occupied) => {
                    if occupied.get().aggregate_version() == written {
                        occupied.insert(previous);
                        None
                    } else {
                        Some(occupied.key().clone())
                    }
                }
                Entry::Vacant(vacant) => Some(vacant.into_key()),
            },
            Undo::Reinsert(previous) => match self.entries.entry(previous.key()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(previous);
                    None
                }
                Entry::Occupied(occupied) => Some(occupied.key().clone()),
            },
            Undo::Remove { key, written } => {
                match self
                    .entries
                    .remove_if(&key, |_, record| record.aggregate_version() == written)
                {
                    Some(_) => None,
                    None => Some(key),
                }
            }
        }
    }

    fn ensure_open(&self, tx: &TransactionHandle) -> DomainResult<()> {
        if self.undo_logs.contains_key(&tx.id()) {
            Ok(())
        } else {
            Err(DomainError::adapter(
                &self.name,
                format!("unknown transaction {tx}"),
            ))
        }
    }
}

fn conflict(key: &AggregateKey, expected: Version, actual: Version) -> DomainError {
    DomainError::ConcurrencyConflict {
        aggregate_type: key.aggregate_type().to_string(),
        aggregate_id: key.aggregate_id().to_string(),
        expected,
        actual,
    }
}

#[async_trait]
impl Adapter for KeyValueAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            supports_native_transactions: false,
        }
    }

    async fn fetch(
        &self,
        _tx: Option<&TransactionHandle>,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> DomainResult<SerializedAggregate> {
        self.entries
            .get(&AggregateKey::new(aggregate_type, aggregate_id))
            .map(|r| r.value().clone())
            .ok_or_else(|| DomainError::not_found(aggregate_type, aggregate_id))
    }

    async fn fetch_many(
        &self,
        _tx: Option<&TransactionHandle>,
        aggregate_type: &str,
        criteria: &Criteria,
    ) -> DomainResult<ResultSet> {
        let records: Vec<SerializedAggregate> = self
            .entries
            .iter()
            .filter(|r| r.key().aggregate_type() == aggregate_type)
            .map(|r| r.value().clone())
            .collect();
        Ok(criteria.apply(records))
    }

    async fn save(
        &self,
        tx: &TransactionHandle,
        record: SerializedAggregate,
        expected_version: Version,
    ) -> DomainResult<Version> {
        self.ensure_open(tx)?;
        let key = record.key();
        let version = expected_version.next();

        let undo = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let actual = occupied.get().aggregate_version();
                if actual != expected_version {
                    return Err(conflict(&key, expected_version, actual));
                }
                Undo::Restore {
                    previous: occupied.insert(record.with_version(version)),
                    written: version,
                }
            }
            Entry::Vacant(vacant) => {
                if !expected_version.is_new() {
                    return Err(conflict(&key, expected_version, Version::new()));
                }
                vacant.insert(record.with_version(version));
                Undo::Remove {
                    key,
                    written: version,
                }
            }
        };
        self.log(tx, undo)?;
        Ok(version)
    }

    async fn delete(
        &self,
        tx: &TransactionHandle,
        aggregate_type: &str,
        aggregate_id: &str,
        expected_version: Option<Version>,
    ) -> DomainResult<()> {
        self.ensure_open(tx)?;
        let key = AggregateKey::new(aggregate_type, aggregate_id);

        let previous = match self.entries.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                let actual = occupied.get().aggregate_version();
                if let Some(expected) = expected_version {
                    if expected != actual {
                        return Err(conflict(&key, expected, actual));
                    }
                }
                occupied.remove()
            }
            Entry::Vacant(_) => return Err(DomainError::not_found(aggregate_type, aggregate_id)),
        };
        self.log(tx, Undo::Reinsert(previous))
    }

    async fn begin(&self) -> DomainResult<TransactionHandle> {
        let tx = TransactionHandle::new(&self.name);
        self.undo_logs.insert(tx.id(), Vec::new());
        Ok(tx)
    }

    async fn commit(&self, tx: TransactionHandle) -> DomainResult<()> {
        self.undo_logs
            .remove(&tx.id())
            .map(|_| ())
            .ok_or_else(|| DomainError::adapter(&self.name, format!("unknown transaction {tx}")))
    }

    async fn rollback(&self, tx: TransactionHandle) -> DomainResult<()> {
        let Some((_, log)) = self.undo_logs.remove(&tx.id()) else {
            return Ok(());
        };

        let compensations = log.len();
        let diverged: Vec<AggregateKey> = log
            .into_iter()
            .rev()
            .filter_map(|undo| self.compensate(undo))
            .collect();
        tracing::warn!(
            adapter = %self.name,
            tx = %tx.id(),
            compensations,
            diverged = diverged.len(),
            "emulated transaction rolled back by compensation"
        );

        if diverged.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = diverged.iter().map(ToString::to_string).collect();
        Err(DomainError::adapter(
            &self.name,
            format!(
                "rollback of {tx} left [{}] untouched: changed by another session since written",
                keys.join(", ")
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, n: i64) -> SerializedAggregate {
        SerializedAggregate::builder()
            .aggregate_type("item")
            .aggregate_id(id)
            .payload(json!({"n": n}))
            .build()
    }

    #[tokio::test]
    async fn writes_are_visible_immediately() {
        let adapter = KeyValueAdapter::new("cache-db");
        assert!(!adapter.capabilities().supports_native_transactions);

        let tx = adapter.begin().await.unwrap();
        adapter.save(&tx, record("a", 1), Version::new()).await.unwrap();
        assert!(adapter.fetch(None, "item", "a").await.is_ok());
        adapter.commit(tx).await.unwrap();
        assert_eq!(adapter.len(), 1);
    }

    #[tokio::test]
    async fn rollback_replays_compensations_in_reverse() {
        let adapter = KeyValueAdapter::new("cache-db");
        let seed = adapter.begin().await.unwrap();
        adapter.save(&seed, record("a", 1), Version::new()).await.unwrap();
        adapter.save(&seed, record("b", 1), Version::new()).await.unwrap();
        adapter.commit(seed).await.unwrap();

        let tx = adapter.begin().await.unwrap();
        adapter
            .save(&tx, record("a", 2), Version::from_value(1))
            .await
            .unwrap();
        adapter
            .save(&tx, record("a", 3), Version::from_value(2))
            .await
            .unwrap();
        adapter
            .delete(&tx, "item", "b", Some(Version::from_value(1)))
            .await
            .unwrap();
        adapter.save(&tx, record("c", 1), Version::new()).await.unwrap();
        adapter.rollback(tx).await.unwrap();

        let a = adapter.fetch(None, "item", "a").await.unwrap();
        assert_eq!(a.aggregate_version().value(), 1);
        assert_eq!(a.payload(), &json!({"n": 1}));
        assert!(adapter.fetch(None, "item", "b").await.is_ok());
        assert!(adapter.fetch(None, "item", "c").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn rollback_keeps_writes_committed_on_top() {
        let adapter = KeyValueAdapter::new("cache-db");
        let seed = adapter.begin().await.unwrap();
        adapter.save(&seed, record("x", 1), Version::new()).await.unwrap();
        adapter.save(&seed, record("y", 1), Version::new()).await.unwrap();
        adapter.commit(seed).await.unwrap();

        // A 写入 x@2、y@2，随后 B 基于 A 的 x@2 写入 x@3 并提交
        let a = adapter.begin().await.unwrap();
        adapter
            .save(&a, record("x", 2), Version::from_value(1))
            .await
            .unwrap();
        adapter
            .save(&a, record("y", 2), Version::from_value(1))
            .await
            .unwrap();
        let b = adapter.begin().await.unwrap();
        let v = adapter
            .save(&b, record("x", 3), Version::from_value(2))
            .await
            .unwrap();
        assert_eq!(v.value(), 3);
        adapter.commit(b).await.unwrap();

        let err = adapter.rollback(a).await.unwrap_err();
        match &err {
            DomainError::Adapter { adapter, reason } => {
                assert_eq!(adapter, "cache-db");
                assert!(reason.contains("item:x"), "{reason}");
                assert!(!reason.contains("item:y"), "{reason}");
            }
            other => panic!("expected Adapter error, got {other:?}"),
        }

        // B 的提交保留，y 照常补偿
        let x = adapter.fetch(None, "item", "x").await.unwrap();
        assert_eq!(x.aggregate_version().value(), 3);
        assert_eq!(x.payload(), &json!({"n": 3}));
        let y = adapter.fetch(None, "item", "y").await.unwrap();
        assert_eq!(y.aggregate_version().value(), 1);
    }

    #[tokio::test]
    async fn rollback_keeps_foreign_insert_and_delete() {
        let adapter = KeyValueAdapter::new("cache-db");
        let seed = adapter.begin().await.unwrap();
        adapter.save(&seed, record("gone", 1), Version::new()).await.unwrap();
        adapter.commit(seed).await.unwrap();

        let a = adapter.begin().await.unwrap();
        adapter
            .delete(&a, "item", "gone", Some(Version::from_value(1)))
            .await
            .unwrap();
        adapter.save(&a, record("fresh", 1), Version::new()).await.unwrap();

        // 其他会话在 A 删除后重新插入 gone，并删除了 A 新插入的 fresh
        let b = adapter.begin().await.unwrap();
        adapter.save(&b, record("gone", 9), Version::new()).await.unwrap();
        adapter
            .delete(&b, "item", "fresh", Some(Version::from_value(1)))
            .await
            .unwrap();
        adapter.commit(b).await.unwrap();

        let err = adapter.rollback(a).await.unwrap_err();
        assert!(err.to_string().contains("item:gone"));
        assert!(err.to_string().contains("item:fresh"));

        let gone = adapter.fetch(None, "item", "gone").await.unwrap();
        assert_eq!(gone.payload(), &json!({"n": 9}));
        assert!(adapter.fetch(None, "item", "fresh").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn version_checks_apply_to_both_insert_and_update() {
        let adapter = KeyValueAdapter::new("cache-db");
        let tx = adapter.begin().await.unwrap();
        let err = adapter
            .save(&tx, record("a", 1), Version::from_value(3))
            .await
            .unwrap_err();
        assert!(err.is_concurrency_conflict());

        adapter.save(&tx, record("a", 1), Version::new()).await.unwrap();
        let err = adapter
            .save(&tx, record("a", 2), Version::new())
            .await
            .unwrap_err();
        assert!(err.is_concurrency_conflict());
        adapter.commit(tx).await.unwrap();
    }
}
