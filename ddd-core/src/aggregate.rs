//! 聚合（Aggregate）抽象
//!
//! 约束一个聚合的核心行为：
//! - `execute` 将命令转换为事件（不改变状态）；
//! - `apply` 将事件投影到状态（改变状态）；
//! - 通过 `Entity` 约束聚合具备标识与版本。
//!
//! 聚合在一次逻辑操作中的生命周期由 [`ObjectState`] 描述，
//! 身份映射使用 [`AggregateKey`] 作为键。
//!
use crate::domain_event::DomainEvent;
use crate::entity::Entity;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::error::Error;
use std::fmt;

/// 聚合根接口
pub trait Aggregate: Entity + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// 聚合类型名，同时作为配置中绑定适配器的键
    const TYPE: &'static str;

    /// 该聚合支持的命令类型
    type Command;
    /// 该聚合产生的领域事件类型
    type Event: DomainEvent;
    /// 命令执行环节的错误类型
    type Error: Error + Send + Sync + 'static;

    /// 执行命令，返回产生的事件列表
    fn execute(&self, command: Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// 应用事件，更新聚合状态
    fn apply(&mut self, event: &Self::Event);
}

/// 被跟踪聚合的脏标记
///
/// `New →(save) Unchanged →(mutate) Updated →(save) Unchanged`，
/// `Unchanged/Updated →(remove) Deleted →(save) 移出会话`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectState {
    New,
    Updated,
    Deleted,
    Unchanged,
}

impl ObjectState {
    /// 提交时是否需要写入存储
    pub fn is_dirty(&self) -> bool {
        !matches!(self, ObjectState::Unchanged)
    }

    /// 发生一次变更后的状态
    pub(crate) fn after_mutation(self) -> Self {
        match self {
            ObjectState::Unchanged => ObjectState::Updated,
            other => other,
        }
    }
}

/// 身份映射的键：(聚合类型, 标识)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregateKey {
    aggregate_type: String,
    aggregate_id: String,
}

impl AggregateKey {
    pub fn new(aggregate_type: impl Into<String>, aggregate_id: impl Into<String>) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
        }
    }

    pub fn of<A: Aggregate>(id: &A::Id) -> Self {
        Self::new(A::TYPE, id.to_string())
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.aggregate_type, self.aggregate_id)
    }
}
