//! 事件持久化模型（SerializedEvent）
//!
//! 领域事件离开聚合后的标准形态：由工作单元在提交开始时生成，
//! 经发件箱（Outbox）交给代理（EventBroker），创建后不再修改。
//!
use crate::{
    domain_event::{DomainEvent, EventContext},
    error::{DomainError, DomainResult},
    value_object::Version,
};
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct SerializedEvent {
    /// 事件唯一标识符
    #[builder(into)]
    event_id: String,
    /// 事件类型，订阅方按此筛选
    #[builder(into)]
    event_type: String,
    /// 事件结构版本
    #[builder(default = 1)]
    event_version: usize,
    /// 进程内的产生序号，跨聚合保持产生顺序
    #[builder(default)]
    sequence: u64,
    /// 聚合 ID，标识事件所属的聚合根实例
    #[builder(into)]
    aggregate_id: String,
    /// 聚合类型
    #[builder(into)]
    aggregate_type: String,
    /// 事件产生时聚合的版本
    #[builder(default)]
    aggregate_version: Version,
    /// 事件发生时间
    #[builder(default = Utc::now())]
    occurred_at: DateTime<Utc>,
    /// 事件负载
    payload: Value,
    /// 会话携带的业务上下文
    #[builder(default)]
    context: EventContext,
}

impl SerializedEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_version(&self) -> usize {
        self.event_version
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn aggregate_version(&self) -> Version {
        self.aggregate_version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn context(&self) -> &EventContext {
        &self.context
    }

    /// 将负载还原为具体的领域事件类型
    pub fn decode<E>(&self) -> DomainResult<E>
    where
        E: DomainEvent,
    {
        let event: E = serde_json::from_value(self.payload.clone())?;
        if event.event_type() != self.event_type {
            return Err(DomainError::TypeMismatch {
                expected: self.event_type.clone(),
                found: event.event_type().to_string(),
            });
        }
        Ok(event)
    }
}
