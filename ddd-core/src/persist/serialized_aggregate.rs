//! 聚合持久化模型（SerializedAggregate）
//!
//! 与后端无关的聚合存储形态：类型、标识、版本与 JSON 载荷。
//! 所有适配器都以这一形态读写，仓储负责与具体聚合类型互转。
//!
use crate::{
    aggregate::{Aggregate, AggregateKey},
    error::{DomainError, DomainResult as Result},
    value_object::Version,
};
use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct SerializedAggregate {
    /// 聚合类型
    #[builder(into)]
    aggregate_type: String,
    /// 聚合标识
    #[builder(into)]
    aggregate_id: String,
    /// 存储中的版本号（以此为准，覆盖载荷中的版本字段）
    #[builder(default)]
    aggregate_version: Version,
    /// 聚合字段
    payload: Value,
}

impl SerializedAggregate {
    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn aggregate_version(&self) -> Version {
        self.aggregate_version
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn key(&self) -> AggregateKey {
        AggregateKey::new(self.aggregate_type.clone(), self.aggregate_id.clone())
    }

    /// 返回带有新版本号的副本（适配器在写入时使用）
    pub fn with_version(mut self, version: Version) -> Self {
        self.aggregate_version = version;
        self
    }

    /// 读取载荷中的字段（支持 `a.b.c` 形式的嵌套路径）
    pub fn field(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.payload, |value, segment| value.get(segment))
    }

    /// 反序列化为聚合实例，并以存储版本覆盖聚合版本
    pub fn to_aggregate<A>(&self) -> Result<A>
    where
        A: Aggregate,
    {
        if A::TYPE != self.aggregate_type {
            return Err(DomainError::TypeMismatch {
                expected: A::TYPE.to_string(),
                found: self.aggregate_type.clone(),
            });
        }

        let mut aggregate: A = serde_json::from_value(self.payload.clone())?;
        aggregate.set_version(self.aggregate_version);
        Ok(aggregate)
    }

    /// 从聚合实例创建存储形态
    pub fn from_aggregate<A>(aggregate: &A) -> Result<Self>
    where
        A: Aggregate,
    {
        Ok(Self {
            aggregate_type: A::TYPE.to_string(),
            aggregate_id: aggregate.id().to_string(),
            aggregate_version: aggregate.version(),
            payload: serde_json::to_value(aggregate)?,
        })
    }
}
