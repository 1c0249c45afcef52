//! 事件子系统（eventing）
//!
//! 提供事件发布/订阅与处理的基础抽象与内置实现：
//! - `EventBroker`：统一发布/订阅接口，附带能力声明；
//! - `EventHandler`：对事件进行消费处理，`HandledEventType` 选择订阅的事件类型；
//! - `InlineBroker`：在发布调用内同步分发（默认代理）；
//! - `ChannelBroker`：基于广播通道的后台并发分发（`eventing` 特性）。
//!
//! 工作单元通过发件箱（`uow::Outbox`）在提交成功后调用代理。
//!
mod broker;
#[cfg(feature = "eventing")]
mod channel;
mod handler;
mod inline;
mod registry;

pub use broker::{BrokerCapabilities, EventBroker, SharedBroker};
#[cfg(feature = "eventing")]
pub use channel::{BrokerHandle, ChannelBroker, ChannelBrokerConfig, DispatchStats};
pub use handler::{EventHandler, HandledEventType};
pub use inline::InlineBroker;
