use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;

/// 领域事件载荷需要满足的通用能力边界
///
/// 事件标识、所属聚合、聚合版本与发生时间由工作单元在登记时统一补齐
/// （见 [`SerializedEvent`](crate::persist::SerializedEvent)），载荷本身只需描述“发生了什么”。
pub trait DomainEvent:
    Clone + PartialEq + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// 事件类型（形如 `OrderEvent.Placed`），用于订阅路由
    fn event_type(&self) -> &str;

    /// 事件载荷版本
    fn event_version(&self) -> usize {
        1
    }
}
