//! 缓存抽象（Cache）
//!
//! 与代理同样按配置选择实现。值统一为 JSON；`CacheExt` 提供类型化读写。
//! 内置 `InMemoryCache`（`memory`），过期条目在读取时惰性清除。
//!
use crate::error::{DomainError, DomainResult};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[async_trait]
pub trait Cache: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> DomainResult<Option<Value>>;

    /// 写入；`ttl` 为 `None` 时使用实现的默认过期策略
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> DomainResult<()>;

    /// 删除，返回键是否存在
    async fn remove(&self, key: &str) -> DomainResult<bool>;

    async fn clear(&self) -> DomainResult<()>;
}

/// 类型化读写
#[async_trait]
pub trait CacheExt: Cache {
    async fn get_as<T>(&self, key: &str) -> DomainResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                DomainError::Cache {
                    reason: format!("cannot decode `{key}`: {e}"),
                }
            }),
            None => Ok(None),
        }
    }

    async fn set_as<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> DomainResult<()>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(value)?;
        self.set(key, value, ttl).await
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}

/// 按配置选择的缓存实例
pub type SharedCache = Arc<dyn Cache>;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

pub struct InMemoryCache {
    name: String,
    entries: DashMap<String, CacheEntry>,
    default_ttl: Option<Duration>,
}

impl InMemoryCache {
    pub const PROVIDER: &'static str = "memory";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: DashMap::new(),
            default_ttl: None,
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// 条目数（包含尚未清除的过期条目）
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 清除所有过期条目
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before - self.entries.len()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> DomainResult<Option<Value>> {
        match self.entries.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }
        self.entries.remove_if(key, |_, entry| entry.is_expired());
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> DomainResult<()> {
        let expires_at = ttl.or(self.default_ttl).map(|ttl| Instant::now() + ttl);
        self.entries
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn remove(&self, key: &str) -> DomainResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn clear(&self) -> DomainResult<()> {
        self.entries.clear();
        Ok(())
    }
}
