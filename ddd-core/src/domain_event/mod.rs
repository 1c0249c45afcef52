//! 领域事件（Domain Event）
//!
//! 定义事件载荷需要实现的最小接口（`DomainEvent`）与随会话传播的
//! 事件上下文（`EventContext`）。事件的持久化/投递形态见
//! [`SerializedEvent`](crate::persist::SerializedEvent)。

mod domain_event_trait;
mod event_context;

pub use domain_event_trait::DomainEvent;
pub use event_context::EventContext;
