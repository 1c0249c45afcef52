//! 发件箱（Outbox）
//!
//! 会话私有的内存事件缓冲。提交开始时从各聚合取出事件并按产生序号排列，
//! 只有会话进入 `Committed` 后才会 `flush` 给代理；回滚时整体丢弃。
//!
use crate::error::DomainError;
use crate::eventing::EventBroker;
use crate::persist::SerializedEvent;

#[derive(Debug, Default)]
pub struct Outbox {
    events: Vec<SerializedEvent>,
}

/// 一次投递失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDelivery {
    pub event_id: String,
    pub event_type: String,
    pub reason: String,
}

/// `flush` 的结果（均为事件标识，按产生顺序）
#[derive(Debug, Default)]
pub struct FlushReport {
    pub delivered: Vec<String>,
    pub failed: Vec<FailedDelivery>,
    /// 保序代理在首个失败后未尝试的事件
    pub skipped: Vec<String>,
}

impl FlushReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    /// 汇总为 `PublishFailed`；全部投递成功时返回 `None`
    pub fn into_error(self) -> Option<DomainError> {
        let first = self.failed.first()?;
        Some(DomainError::PublishFailed {
            event_id: first.event_id.clone(),
            event_type: first.event_type.clone(),
            reason: format!(
                "{} (failed={}, skipped={}, delivered={})",
                first.reason,
                self.failed.len(),
                self.skipped.len(),
                self.delivered.len()
            ),
        })
    }
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入事件并保持按产生序号排列
    pub fn extend(&mut self, events: impl IntoIterator<Item = SerializedEvent>) {
        self.events.extend(events);
        self.events.sort_by_key(|e| e.sequence());
    }

    pub fn events(&self) -> &[SerializedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// 按顺序逐条发布
    pub async fn flush(self, broker: &dyn EventBroker) -> FlushReport {
        let ordered = broker.capabilities().supports_ordering;
        let mut report = FlushReport::default();
        let mut events = self.events.into_iter();

        while let Some(event) = events.next() {
            match broker.publish(&event).await {
                Ok(()) => report.delivered.push(event.event_id().to_string()),
                Err(err) => {
                    tracing::error!(
                        broker = broker.name(),
                        event_id = event.event_id(),
                        event_type = event.event_type(),
                        error = %err,
                        "event publish failed after commit"
                    );
                    report.failed.push(FailedDelivery {
                        event_id: event.event_id().to_string(),
                        event_type: event.event_type().to_string(),
                        reason: err.to_string(),
                    });
                    if ordered {
                        report
                            .skipped
                            .extend(events.by_ref().map(|e| e.event_id().to_string()));
                    }
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DomainResult;
    use crate::eventing::{BrokerCapabilities, EventHandler, HandledEventType};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    struct Picky {
        ordered: bool,
        reject: &'static str,
        accepted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventBroker for Picky {
        fn name(&self) -> &str {
            "picky"
        }

        fn capabilities(&self) -> BrokerCapabilities {
            BrokerCapabilities {
                supports_ordering: self.ordered,
            }
        }

        async fn publish(&self, event: &SerializedEvent) -> DomainResult<()> {
            if event.event_id() == self.reject {
                return Err(DomainError::event_bus("rejected"));
            }
            self.accepted.lock().push(event.event_id().to_string());
            Ok(())
        }

        fn subscribe(&self, _handled: HandledEventType, _handler: Arc<dyn EventHandler>) {}
    }

    fn event(id: &str, sequence: u64) -> SerializedEvent {
        SerializedEvent::builder()
            .event_id(id)
            .event_type("thing.happened")
            .sequence(sequence)
            .aggregate_id("a")
            .aggregate_type("thing")
            .payload(json!({}))
            .build()
    }

    fn outbox() -> Outbox {
        let mut outbox = Outbox::new();
        outbox.extend([event("e3", 30), event("e1", 10)]);
        outbox.extend([event("e2", 20)]);
        outbox
    }

    #[test]
    fn events_are_ordered_by_sequence() {
        let ids: Vec<_> = outbox().events().iter().map(|e| e.event_id().to_string()).collect();
        assert_eq!(ids, vec!["e1", "e2", "e3"]);
    }

    #[tokio::test]
    async fn ordered_broker_stops_at_first_failure() {
        let broker = Picky {
            ordered: true,
            reject: "e2",
            accepted: Mutex::new(vec![]),
        };
        let report = outbox().flush(&broker).await;
        assert_eq!(report.delivered, vec!["e1"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.skipped, vec!["e3"]);
        assert!(!report.is_complete());
        assert!(matches!(
            report.into_error(),
            Some(DomainError::PublishFailed { .. })
        ));
    }

    #[tokio::test]
    async fn unordered_broker_keeps_going() {
        let broker = Picky {
            ordered: false,
            reject: "e2",
            accepted: Mutex::new(vec![]),
        };
        let report = outbox().flush(&broker).await;
        assert_eq!(report.delivered, vec!["e1", "e3"]);
        assert!(report.skipped.is_empty());
        assert_eq!(*broker.accepted.lock(), vec!["e1", "e3"]);
    }
}
