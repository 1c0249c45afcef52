//! 事件代理（EventBroker）协议
//!
//! 统一发布/订阅接口。工作单元只在会话进入 `Committed` 之后调用 `publish`，
//! 此后的投递失败以 `PublishFailed` 报告（由 `CommittedUnpublished` 携带提交结果），
//! 但不会回滚存储。
//!
use super::{EventHandler, HandledEventType};
use crate::{error::DomainResult as Result, persist::SerializedEvent};
use async_trait::async_trait;
use std::sync::Arc;

/// 代理能力声明
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BrokerCapabilities {
    /// 是否保证按发布顺序投递；为真时发件箱在首个失败处停止
    pub supports_ordering: bool,
}

#[async_trait]
pub trait EventBroker: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> BrokerCapabilities;

    async fn publish(&self, event: &SerializedEvent) -> Result<()>;

    async fn publish_batch(&self, events: &[SerializedEvent]) -> Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }

    fn subscribe(&self, handled: HandledEventType, handler: Arc<dyn EventHandler>);

    /// 停止后台分发；同步代理无需实现
    fn close(&self) {}
}

/// 按配置选择的代理实例
pub type SharedBroker = Arc<dyn EventBroker>;
