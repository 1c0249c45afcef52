//! 领域注册表（Domain）
//!
//! 按 [`DomainConfig`] 装配适配器、代理与缓存，并把聚合类型绑定到数据库。
//! 技术标识（`provider`）通过工厂解析：内置 `memory`/`kv`/`postgres`（适配器）、
//! `inline`/`channel`（代理）、`memory`（缓存），也可以注册自定义工厂或直接注入实例。
//!
//! 未配置 `default` 代理时使用同步的 `InlineBroker`；未配置 `default` 缓存时使用
//! `InMemoryCache`。
//!
//! ```
//! use ddd_core::config::{DomainConfig, ProviderConfig};
//! use ddd_core::domain::Domain;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> ddd_core::error::DomainResult<()> {
//! let domain = Domain::builder()
//!     .config(
//!         DomainConfig::new("shop")
//!             .with_database("primary", ProviderConfig::new("memory"))
//!             .bind("order", "primary"),
//!     )
//!     .build()
//!     .await?;
//!
//! assert_eq!(domain.name(), "shop");
//! assert_eq!(domain.adapter_for("order")?.name(), "primary");
//! assert!(domain.adapter_for("invoice").is_err());
//! # Ok(())
//! # }
//! ```
//!
use crate::{
    aggregate::Aggregate,
    cache::{InMemoryCache, SharedCache},
    config::{DomainConfig, ProviderConfig},
    domain_event::EventContext,
    error::{DomainError, DomainResult},
    eventing::{EventHandler, HandledEventType, InlineBroker, SharedBroker},
    persist::{InMemoryAdapter, KeyValueAdapter, SharedAdapter},
    repository::Repository,
    uow::UnitOfWork,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// 默认代理/缓存的名称
pub const DEFAULT_NAME: &str = "default";

type FactoryFuture<T> = Pin<Box<dyn Future<Output = DomainResult<T>> + Send>>;
type FactoryFn<T> = Arc<dyn Fn(String, ProviderConfig) -> FactoryFuture<T> + Send + Sync>;

/// 适配器工厂：`(数据库名, 配置) -> 适配器`
pub type AdapterFactory = FactoryFn<SharedAdapter>;
pub type BrokerFactory = FactoryFn<SharedBroker>;
pub type CacheFactory = FactoryFn<SharedCache>;

fn boxed_factory<T, F, Fut>(f: F) -> FactoryFn<T>
where
    T: 'static,
    F: Fn(String, ProviderConfig) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DomainResult<T>> + Send + 'static,
{
    Arc::new(move |name, provider| Box::pin(f(name, provider)))
}

fn builtin_adapter_factories() -> HashMap<String, AdapterFactory> {
    let mut factories: HashMap<String, AdapterFactory> = HashMap::new();
    factories.insert(
        InMemoryAdapter::PROVIDER.to_string(),
        boxed_factory(|name, _| async move {
            Ok(Arc::new(InMemoryAdapter::new(name)) as SharedAdapter)
        }),
    );
    factories.insert(
        KeyValueAdapter::PROVIDER.to_string(),
        boxed_factory(|name, _| async move {
            Ok(Arc::new(KeyValueAdapter::new(name)) as SharedAdapter)
        }),
    );

    #[cfg(feature = "infra-sqlx")]
    factories.insert(
        crate::persist::PostgresAdapter::PROVIDER.to_string(),
        boxed_factory(|name, provider: ProviderConfig| async move {
            use crate::persist::{DEFAULT_TABLE, PostgresAdapter};

            let url = provider.require_str("url")?;
            let max_connections = match provider.param_u64("max_connections") {
                Some(n) => u32::try_from(n).map_err(|_| {
                    DomainError::configuration(format!(
                        "database `{name}`: max_connections out of range"
                    ))
                })?,
                None => 5,
            };
            let table = provider.param_str("table").unwrap_or(DEFAULT_TABLE);
            let adapter = PostgresAdapter::connect(name.clone(), url, max_connections, table).await?;
            Ok(Arc::new(adapter) as SharedAdapter)
        }),
    );

    factories
}

fn builtin_broker_factories() -> HashMap<String, BrokerFactory> {
    let mut factories: HashMap<String, BrokerFactory> = HashMap::new();
    factories.insert(
        InlineBroker::PROVIDER.to_string(),
        boxed_factory(|name, _| async move { Ok(Arc::new(InlineBroker::new(name)) as SharedBroker) }),
    );

    #[cfg(feature = "eventing")]
    factories.insert(
        crate::eventing::ChannelBroker::PROVIDER.to_string(),
        boxed_factory(|name, provider: ProviderConfig| async move {
            use crate::eventing::{ChannelBroker, ChannelBrokerConfig};

            let defaults = ChannelBrokerConfig::default();
            let config = ChannelBrokerConfig {
                capacity: provider
                    .param_u64("capacity")
                    .map_or(defaults.capacity, |n| n as usize),
                handler_concurrency: provider
                    .param_u64("handler_concurrency")
                    .map_or(defaults.handler_concurrency, |n| n as usize),
            };
            let broker = Arc::new(ChannelBroker::new(name, config));
            // 分发任务的生命周期交给 `Domain::shutdown`（`close`）
            let _detached = broker.start();
            Ok(broker as SharedBroker)
        }),
    );

    factories
}

fn builtin_cache_factories() -> HashMap<String, CacheFactory> {
    let mut factories: HashMap<String, CacheFactory> = HashMap::new();
    factories.insert(
        InMemoryCache::PROVIDER.to_string(),
        boxed_factory(|name, provider: ProviderConfig| async move {
            let mut cache = InMemoryCache::new(name);
            if let Some(secs) = provider.param_u64("ttl_secs") {
                cache = cache.with_default_ttl(Duration::from_secs(secs));
            }
            Ok(Arc::new(cache) as SharedCache)
        }),
    );
    factories
}

/// [`Domain`] 构建器
pub struct DomainBuilder {
    config: DomainConfig,
    adapter_factories: HashMap<String, AdapterFactory>,
    broker_factories: HashMap<String, BrokerFactory>,
    cache_factories: HashMap<String, CacheFactory>,
    adapters: HashMap<String, SharedAdapter>,
    brokers: HashMap<String, SharedBroker>,
    caches: HashMap<String, SharedCache>,
    bindings: Vec<(&'static str, String)>,
}

impl Default for DomainBuilder {
    fn default() -> Self {
        Self {
            config: DomainConfig::default(),
            adapter_factories: builtin_adapter_factories(),
            broker_factories: builtin_broker_factories(),
            cache_factories: builtin_cache_factories(),
            adapters: HashMap::new(),
            brokers: HashMap::new(),
            caches: HashMap::new(),
            bindings: Vec::new(),
        }
    }
}

impl DomainBuilder {
    pub fn config(mut self, config: DomainConfig) -> Self {
        self.config = config;
        self
    }

    /// 注册（或覆盖）一个适配器技术标识
    pub fn adapter_factory<F, Fut>(mut self, provider: impl Into<String>, factory: F) -> Self
    where
        F: Fn(String, ProviderConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DomainResult<SharedAdapter>> + Send + 'static,
    {
        self.adapter_factories
            .insert(provider.into(), boxed_factory(factory));
        self
    }

    pub fn broker_factory<F, Fut>(mut self, provider: impl Into<String>, factory: F) -> Self
    where
        F: Fn(String, ProviderConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DomainResult<SharedBroker>> + Send + 'static,
    {
        self.broker_factories
            .insert(provider.into(), boxed_factory(factory));
        self
    }

    pub fn cache_factory<F, Fut>(mut self, provider: impl Into<String>, factory: F) -> Self
    where
        F: Fn(String, ProviderConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DomainResult<SharedCache>> + Send + 'static,
    {
        self.cache_factories
            .insert(provider.into(), boxed_factory(factory));
        self
    }

    /// 直接注入适配器，名称取 `Adapter::name`，优先于配置中的同名数据库
    pub fn adapter(mut self, adapter: SharedAdapter) -> Self {
        self.adapters.insert(adapter.name().to_string(), adapter);
        self
    }

    pub fn broker(mut self, broker: SharedBroker) -> Self {
        self.brokers.insert(broker.name().to_string(), broker);
        self
    }

    pub fn cache(mut self, cache: SharedCache) -> Self {
        self.caches.insert(cache.name().to_string(), cache);
        self
    }

    /// 把聚合类型绑定到数据库（覆盖配置中的绑定）
    pub fn register<A: Aggregate>(mut self, database: impl Into<String>) -> Self {
        self.bindings.push((A::TYPE, database.into()));
        self
    }

    pub async fn build(self) -> DomainResult<Domain> {
        let DomainBuilder {
            mut config,
            adapter_factories,
            broker_factories,
            cache_factories,
            mut adapters,
            mut brokers,
            mut caches,
            bindings,
        } = self;

        for (aggregate_type, database) in bindings {
            config.aggregates.insert(aggregate_type.to_string(), database);
        }
        validate_shape(&config, &adapters)?;

        for (name, provider) in &config.databases {
            if adapters.contains_key(name) {
                continue;
            }
            let factory = lookup_factory(&adapter_factories, "database", name, provider)?;
            let adapter = factory(name.clone(), provider.clone()).await?;
            tracing::info!(database = %name, provider = %provider.provider, "adapter ready");
            adapters.insert(name.clone(), adapter);
        }

        for (name, provider) in &config.brokers {
            if brokers.contains_key(name) {
                continue;
            }
            let factory = lookup_factory(&broker_factories, "broker", name, provider)?;
            let broker = factory(name.clone(), provider.clone()).await?;
            tracing::info!(broker = %name, provider = %provider.provider, "broker ready");
            brokers.insert(name.clone(), broker);
        }
        brokers
            .entry(DEFAULT_NAME.to_string())
            .or_insert_with(|| Arc::new(InlineBroker::default()) as SharedBroker);

        for (name, provider) in &config.caches {
            if caches.contains_key(name) {
                continue;
            }
            let factory = lookup_factory(&cache_factories, "cache", name, provider)?;
            let cache = factory(name.clone(), provider.clone()).await?;
            caches.insert(name.clone(), cache);
        }
        caches
            .entry(DEFAULT_NAME.to_string())
            .or_insert_with(|| Arc::new(InMemoryCache::new(DEFAULT_NAME)) as SharedCache);

        tracing::info!(
            domain = %config.name,
            adapters = adapters.len(),
            brokers = brokers.len(),
            aggregates = config.aggregates.len(),
            "domain initialized"
        );

        Ok(Domain {
            inner: Arc::new(DomainInner {
                config,
                adapters,
                brokers,
                caches,
            }),
        })
    }
}

/// 与 `DomainConfig::validate` 相同，但允许绑定到直接注入的适配器
fn validate_shape(
    config: &DomainConfig,
    injected: &HashMap<String, SharedAdapter>,
) -> DomainResult<()> {
    let mut declared = config.clone();
    for name in injected.keys() {
        declared
            .databases
            .entry(name.clone())
            .or_insert_with(|| ProviderConfig::new("injected"));
    }
    declared.validate()
}

fn lookup_factory<'a, T: 'static>(
    factories: &'a HashMap<String, FactoryFn<T>>,
    kind: &str,
    name: &str,
    provider: &ProviderConfig,
) -> DomainResult<&'a FactoryFn<T>> {
    factories.get(&provider.provider).ok_or_else(|| {
        DomainError::configuration(format!(
            "{kind} `{name}`: unknown provider `{}`",
            provider.provider
        ))
    })
}

struct DomainInner {
    config: DomainConfig,
    adapters: HashMap<String, SharedAdapter>,
    brokers: HashMap<String, SharedBroker>,
    caches: HashMap<String, SharedCache>,
}

/// 装配完成的领域：按聚合类型提供仓储，创建工作单元
#[derive(Clone)]
pub struct Domain {
    inner: Arc<DomainInner>,
}

impl Domain {
    pub fn builder() -> DomainBuilder {
        DomainBuilder::default()
    }

    /// 仅使用内置工厂，按配置装配
    pub async fn from_config(config: DomainConfig) -> DomainResult<Self> {
        Self::builder().config(config).build().await
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &DomainConfig {
        &self.inner.config
    }

    pub fn adapter(&self, name: &str) -> DomainResult<SharedAdapter> {
        self.inner
            .adapters
            .get(name)
            .cloned()
            .ok_or_else(|| DomainError::configuration(format!("unknown database `{name}`")))
    }

    /// 聚合类型绑定的适配器
    pub fn adapter_for(&self, aggregate_type: &str) -> DomainResult<SharedAdapter> {
        let database = self.inner.config.database_for(aggregate_type).ok_or_else(|| {
            DomainError::UnconfiguredAggregate {
                aggregate_type: aggregate_type.to_string(),
            }
        })?;
        self.adapter(database)
    }

    pub fn broker(&self, name: &str) -> DomainResult<SharedBroker> {
        self.inner
            .brokers
            .get(name)
            .cloned()
            .ok_or_else(|| DomainError::configuration(format!("unknown broker `{name}`")))
    }

    pub fn default_broker(&self) -> SharedBroker {
        self.inner
            .brokers
            .get(DEFAULT_NAME)
            .cloned()
            .unwrap_or_else(|| Arc::new(InlineBroker::default()) as SharedBroker)
    }

    pub fn cache(&self, name: &str) -> DomainResult<SharedCache> {
        self.inner
            .caches
            .get(name)
            .cloned()
            .ok_or_else(|| DomainError::configuration(format!("unknown cache `{name}`")))
    }

    pub fn default_cache(&self) -> DomainResult<SharedCache> {
        self.cache(DEFAULT_NAME)
    }

    pub fn repository_for<A: Aggregate>(&self) -> DomainResult<Repository<A>> {
        let adapter = self.adapter_for(A::TYPE)?;
        Ok(Repository::new(
            adapter,
            self.default_broker(),
            self.inner.config.per_page,
        ))
    }

    /// 在默认代理上订阅
    pub fn subscribe(&self, handled: HandledEventType, handler: Arc<dyn EventHandler>) {
        self.default_broker().subscribe(handled, handler);
    }

    pub fn unit_of_work(&self) -> UnitOfWork {
        UnitOfWork::new(self.default_broker())
    }

    pub fn unit_of_work_with(&self, context: EventContext) -> UnitOfWork {
        UnitOfWork::with_context(self.default_broker(), context)
    }

    /// 在新会话的作用域内运行 `f`：成功则提交，失败则回滚
    ///
    /// `f` 内部已自行提交或回滚时不再重复。
    pub async fn transaction<T, F, Fut>(&self, f: F) -> DomainResult<T>
    where
        F: FnOnce(UnitOfWork) -> Fut,
        Fut: Future<Output = DomainResult<T>>,
    {
        let uow = self.unit_of_work();
        match uow.scope(f(uow.clone())).await {
            Ok(value) => {
                if uow.is_active() {
                    uow.commit().await?;
                }
                Ok(value)
            }
            Err(err) => {
                if uow.is_active() {
                    uow.rollback()?;
                }
                Err(err)
            }
        }
    }

    /// 停止所有代理的后台分发
    pub fn shutdown(&self) {
        for broker in self.inner.brokers.values() {
            broker.close();
        }
        tracing::info!(domain = %self.name(), "domain shut down");
    }
}

impl std::fmt::Debug for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Domain")
            .field("name", &self.inner.config.name)
            .field("adapters", &self.inner.adapters.keys().collect::<Vec<_>>())
            .field("brokers", &self.inner.brokers.keys().collect::<Vec<_>>())
            .field("aggregates", &self.inner.config.aggregates)
            .finish()
    }
}
