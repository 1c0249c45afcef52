use crate::aggregate::AggregateKey;
use crate::value_object::Version;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 会话状态
///
/// `Active → Committing → Committed | RolledBack | PartiallyCommitted`，
/// `Active → RolledBack`（提交前中止）。除 `Active` 外均不可再登记或提交。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Committing,
    Committed,
    RolledBack,
    /// 提交阶段中途失败，且至少一个适配器已提交
    PartiallyCommitted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Committed | SessionState::RolledBack | SessionState::PartiallyCommitted
        )
    }
}

/// 一个已落库的聚合
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedAggregate {
    pub key: AggregateKey,
    pub adapter: String,
    /// 新版本；删除时为 `None`
    pub version: Option<Version>,
}

/// 成功提交的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReport {
    pub session_id: Uuid,
    /// 按提交顺序
    pub committed_adapters: Vec<String>,
    pub persisted: Vec<PersistedAggregate>,
    pub published_events: usize,
}

impl CommitReport {
    pub fn version_of(&self, key: &AggregateKey) -> Option<Version> {
        self.persisted
            .iter()
            .find(|p| &p.key == key)
            .and_then(|p| p.version)
    }
}
