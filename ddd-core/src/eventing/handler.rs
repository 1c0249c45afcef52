//! 事件处理器（EventHandler）
//!
//! 定义消费某类/多类/全部事件的处理逻辑，以及订阅时使用的事件类型选择器。
//!
use crate::{error::DomainResult, persist::SerializedEvent};
use async_trait::async_trait;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandledEventType {
    One(String),
    Many(Vec<String>),
    All,
}

impl HandledEventType {
    pub fn one(event_type: impl Into<String>) -> Self {
        HandledEventType::One(event_type.into())
    }

    pub fn many<I, S>(event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        HandledEventType::Many(event_types.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            HandledEventType::One(t) => t == event_type,
            HandledEventType::Many(ts) => ts.iter().any(|t| t == event_type),
            HandledEventType::All => true,
        }
    }
}

/// 事件处理器：处理订阅到的事件
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// 处理器名称（用于日志与失败报告）
    fn handler_name(&self) -> &str;

    /// 处理事件
    async fn handle(&self, event: &SerializedEvent) -> DomainResult<()>;
}
