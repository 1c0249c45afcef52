//! 处理器注册表：按订阅顺序保存 (选择器, 处理器)
//!
use super::{EventHandler, HandledEventType};
use std::sync::Arc;

#[derive(Clone, Default)]
pub(crate) struct HandlerRegistry {
    subscriptions: Vec<(HandledEventType, Arc<dyn EventHandler>)>,
}

impl HandlerRegistry {
    pub(crate) fn subscribe(&mut self, handled: HandledEventType, handler: Arc<dyn EventHandler>) {
        self.subscriptions.push((handled, handler));
    }

    /// 匹配某事件类型的处理器（保持订阅顺序）
    pub(crate) fn matching(&self, event_type: &str) -> Vec<Arc<dyn EventHandler>> {
        self.subscriptions
            .iter()
            .filter(|(handled, _)| handled.matches(event_type))
            .map(|(_, handler)| Arc::clone(handler))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.subscriptions.len()
    }
}
