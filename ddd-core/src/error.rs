//! 统一错误定义
//!
//! 覆盖身份映射、乐观锁、会话提交/回滚、事件投递、配置解析等环节，
//! 适配器与代理实现统一转换为 `DomainError` 向上传播。
//!
use crate::uow::{CommitReport, SessionState};
use crate::value_object::Version;
use thiserror::Error;
use uuid::Uuid;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DomainError {
    // --- 序列化 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("parse error: {reason}")]
    Parse { reason: String },
    #[error("type mismatch: expected={expected}, found={found}")]
    TypeMismatch { expected: String, found: String },

    // --- 仓储/身份映射 ---
    #[error("object not found: type={aggregate_type}, id={aggregate_id}")]
    ObjectNotFound {
        aggregate_type: String,
        aggregate_id: String,
    },
    #[error("object already tracked: type={aggregate_type}, id={aggregate_id}")]
    AlreadyTracked {
        aggregate_type: String,
        aggregate_id: String,
    },
    #[error(
        "concurrency conflict: type={aggregate_type}, id={aggregate_id}, expected={expected}, actual={actual}"
    )]
    ConcurrencyConflict {
        aggregate_type: String,
        aggregate_id: String,
        expected: Version,
        actual: Version,
    },

    // --- 工作单元 ---
    #[error(
        "commit failed on adapter `{failed}` (session {session_id}): committed={committed:?}, not_committed={not_committed:?}: {source}"
    )]
    CommitFailed {
        session_id: Uuid,
        committed: Vec<String>,
        failed: String,
        not_committed: Vec<String>,
        rollback_failures: Vec<String>,
        #[source]
        source: Box<DomainError>,
    },
    #[error("unit of work {session_id} aborted on adapter `{adapter}` ({aggregates:?}): {source}")]
    SessionAborted {
        session_id: Uuid,
        adapter: String,
        aggregates: Vec<String>,
        rollback_failures: Vec<String>,
        #[source]
        source: Box<DomainError>,
    },
    /// 存储已提交，事件发布失败；`report` 为提交结果
    #[error("unit of work {} committed but events were not published: {source}", .report.session_id)]
    CommittedUnpublished {
        report: Box<CommitReport>,
        #[source]
        source: Box<DomainError>,
    },
    #[error("invalid session state: session={session_id}, state={state:?}, operation={operation}")]
    InvalidSessionState {
        session_id: Uuid,
        state: SessionState,
        operation: &'static str,
    },

    // --- 事件系统 ---
    #[error("publish failed: event={event_id}, type={event_type}, reason={reason}")]
    PublishFailed {
        event_id: String,
        event_type: String,
        reason: String,
    },
    #[error("event bus error: {reason}")]
    EventBus { reason: String },
    #[error("event handler error: handler={handler}, reason={reason}")]
    EventHandler { handler: String, reason: String },

    // --- 基础设施 ---
    #[error("aggregate `{aggregate_type}` is not bound to any adapter")]
    UnconfiguredAggregate { aggregate_type: String },
    #[error("configuration error: {reason}")]
    Configuration { reason: String },
    #[error("adapter `{adapter}` error: {reason}")]
    Adapter { adapter: String, reason: String },
    #[error("database error: {reason}")]
    Database { reason: String },
    #[error("cache error: {reason}")]
    Cache { reason: String },

    // --- 领域规则/命令与状态 ---
    #[error("invalid command: {reason}")]
    InvalidCommand { reason: String },
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },
    #[error("invalid value: {reason}")]
    InvalidValue { reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

/// 统一 Result 类型别名
pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    pub fn not_found(aggregate_type: impl Into<String>, aggregate_id: impl Into<String>) -> Self {
        DomainError::ObjectNotFound {
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
        }
    }

    pub fn adapter(adapter: impl Into<String>, reason: impl Into<String>) -> Self {
        DomainError::Adapter {
            adapter: adapter.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        DomainError::Configuration {
            reason: reason.into(),
        }
    }

    pub fn event_bus(reason: impl Into<String>) -> Self {
        DomainError::EventBus {
            reason: reason.into(),
        }
    }

    /// 剥离会话层包装，返回触发失败的原始错误
    pub fn root_cause(&self) -> &DomainError {
        match self {
            DomainError::CommitFailed { source, .. }
            | DomainError::SessionAborted { source, .. }
            | DomainError::CommittedUnpublished { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// 存储是否已完整提交（发布失败不影响）
    pub fn commit_report(&self) -> Option<&CommitReport> {
        match self {
            DomainError::CommittedUnpublished { report, .. } => Some(report),
            _ => None,
        }
    }

    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self.root_cause(), DomainError::ConcurrencyConflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), DomainError::ObjectNotFound { .. })
    }
}

// ---- Cross-crate conversions for infrastructure convenience ----

#[cfg(feature = "infra-sqlx")]
impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::Database {
            reason: err.to_string(),
        }
    }
}

impl From<uuid::Error> for DomainError {
    fn from(err: uuid::Error) -> Self {
        DomainError::Parse {
            reason: err.to_string(),
        }
    }
}

impl From<std::num::ParseIntError> for DomainError {
    fn from(err: std::num::ParseIntError) -> Self {
        DomainError::Parse {
            reason: err.to_string(),
        }
    }
}

impl From<chrono::ParseError> for DomainError {
    fn from(err: chrono::ParseError) -> Self {
        DomainError::Parse {
            reason: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for DomainError {
    fn from(err: tokio::task::JoinError) -> Self {
        DomainError::Internal {
            reason: err.to_string(),
        }
    }
}
