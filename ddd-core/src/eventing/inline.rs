//! 同步内联代理（`inline`）
//!
//! 在 `publish` 调用内按订阅顺序依次执行匹配的处理器。某个处理器失败不影响
//! 其余处理器执行，全部执行完后以 `PublishFailed` 汇总失败。
//!
use super::registry::HandlerRegistry;
use super::{BrokerCapabilities, EventBroker, EventHandler, HandledEventType};
use crate::error::{DomainError, DomainResult as Result};
use crate::persist::SerializedEvent;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

pub struct InlineBroker {
    name: String,
    registry: RwLock<HandlerRegistry>,
}

impl InlineBroker {
    pub const PROVIDER: &'static str = "inline";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry: RwLock::new(HandlerRegistry::default()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.read().len()
    }
}

impl Default for InlineBroker {
    fn default() -> Self {
        Self::new("default")
    }
}

#[async_trait]
impl EventBroker for InlineBroker {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> BrokerCapabilities {
        BrokerCapabilities {
            supports_ordering: true,
        }
    }

    async fn publish(&self, event: &SerializedEvent) -> Result<()> {
        let handlers = self.registry.read().matching(event.event_type());

        let mut failures = Vec::new();
        for handler in handlers {
            if let Err(err) = handler.handle(event).await {
                tracing::error!(
                    broker = %self.name,
                    handler = handler.handler_name(),
                    event_id = event.event_id(),
                    event_type = event.event_type(),
                    error = %err,
                    "event handler failed"
                );
                failures.push(format!("{}: {err}", handler.handler_name()));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DomainError::PublishFailed {
                event_id: event.event_id().to_string(),
                event_type: event.event_type().to_string(),
                reason: failures.join("; "),
            })
        }
    }

    fn subscribe(&self, handled: HandledEventType, handler: Arc<dyn EventHandler>) {
        self.registry.write().subscribe(handled, handler);
    }
}
