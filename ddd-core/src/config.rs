//! 领域配置（DomainConfig）
//!
//! 声明数据库、代理、缓存（名称 → 技术标识与参数），以及聚合类型到数据库的绑定。
//! 从 JSON 加载：字符串、文件，或由环境变量 `DDD_CONFIG` 指定的文件路径。
//!
//! ```
//! use ddd_core::config::DomainConfig;
//!
//! let config = DomainConfig::from_json_str(r#"{
//!     "name": "shop",
//!     "databases": { "primary": { "provider": "memory" } },
//!     "aggregates": { "order": "primary" }
//! }"#).unwrap();
//! assert_eq!(config.database_for("order"), Some("primary"));
//! assert_eq!(config.per_page, 10);
//! ```
//!
use crate::error::{DomainError, DomainResult};
use crate::repository::DEFAULT_PER_PAGE;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// 指定配置文件路径的环境变量
pub const CONFIG_ENV_VAR: &str = "DDD_CONFIG";

/// 某个技术实现及其参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// 技术标识，如 `memory`、`kv`、`postgres`、`inline`、`channel`
    pub provider: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl ProviderConfig {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(Value::as_u64)
    }

    /// 必填字符串参数
    pub fn require_str(&self, key: &str) -> DomainResult<&str> {
        self.param_str(key).ok_or_else(|| {
            DomainError::configuration(format!(
                "provider `{}` requires string parameter `{key}`",
                self.provider
            ))
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` 指令；设置了 `RUST_LOG` 时以环境变量为准
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

fn default_per_page() -> usize {
    DEFAULT_PER_PAGE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub databases: BTreeMap<String, ProviderConfig>,
    /// 聚合类型 → 数据库名
    #[serde(default)]
    pub aggregates: BTreeMap<String, String>,
    #[serde(default)]
    pub brokers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub caches: BTreeMap<String, ProviderConfig>,
    #[serde(default = "default_per_page")]
    pub per_page: usize,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            databases: BTreeMap::new(),
            aggregates: BTreeMap::new(),
            brokers: BTreeMap::new(),
            caches: BTreeMap::new(),
            per_page: DEFAULT_PER_PAGE,
            logging: LoggingConfig::default(),
        }
    }
}

impl DomainConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> DomainResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| DomainError::configuration(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> DomainResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DomainError::configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    /// 读取 `DDD_CONFIG` 指向的文件
    pub fn from_env() -> DomainResult<Self> {
        let path = std::env::var(CONFIG_ENV_VAR)
            .map_err(|_| DomainError::configuration(format!("{CONFIG_ENV_VAR} is not set")))?;
        Self::from_file(path)
    }

    pub fn with_database(mut self, name: impl Into<String>, provider: ProviderConfig) -> Self {
        self.databases.insert(name.into(), provider);
        self
    }

    pub fn with_broker(mut self, name: impl Into<String>, provider: ProviderConfig) -> Self {
        self.brokers.insert(name.into(), provider);
        self
    }

    pub fn with_cache(mut self, name: impl Into<String>, provider: ProviderConfig) -> Self {
        self.caches.insert(name.into(), provider);
        self
    }

    pub fn bind(mut self, aggregate_type: impl Into<String>, database: impl Into<String>) -> Self {
        self.aggregates.insert(aggregate_type.into(), database.into());
        self
    }

    pub fn database_for(&self, aggregate_type: &str) -> Option<&str> {
        self.aggregates.get(aggregate_type).map(String::as_str)
    }

    /// 结构校验：绑定必须指向已声明的数据库，技术标识不能为空
    pub fn validate(&self) -> DomainResult<()> {
        if self.per_page == 0 {
            return Err(DomainError::configuration("per_page must be > 0"));
        }

        let sections = [
            ("database", &self.databases),
            ("broker", &self.brokers),
            ("cache", &self.caches),
        ];
        for (kind, entries) in sections {
            for (name, provider) in entries {
                if provider.provider.trim().is_empty() {
                    return Err(DomainError::configuration(format!(
                        "{kind} `{name}` has an empty provider"
                    )));
                }
            }
        }

        for (aggregate_type, database) in &self.aggregates {
            if !self.databases.contains_key(database) {
                return Err(DomainError::configuration(format!(
                    "aggregate `{aggregate_type}` is bound to unknown database `{database}`"
                )));
            }
        }
        Ok(())
    }
}
