//! 工作单元（uow）
//!
//! 协调核心：
//! - 身份映射：会话内每个 (聚合类型, 标识) 只对应一个被跟踪实例；
//! - 按适配器分组的脏集合，适配器按首次接触排序；
//! - 提交/回滚协议与部分失败报告（`CommitReport`、`CommitFailed`、`SessionAborted`、
//!   `CommittedUnpublished`）；
//! - 发件箱：事件只在会话进入 `Committed` 后发布；
//! - 当前会话：`UnitOfWork::scope` 基于 `tokio::task_local!`。
//!
mod identity_map;
mod outbox;
mod report;
mod session;

pub use outbox::{FailedDelivery, FlushReport, Outbox};
pub use report::{CommitReport, PersistedAggregate, SessionState};
pub use session::UnitOfWork;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{Aggregate, ObjectState};
    use crate::domain_event::DomainEvent;
    use crate::entity::Entity;
    use crate::error::DomainError;
    use crate::eventing::InlineBroker;
    use crate::persist::{Adapter, InMemoryAdapter, SharedAdapter};
    use crate::tracked::Tracked;
    use crate::value_object::Version;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Note {
        id: String,
        version: Version,
        text: String,
    }

    impl Entity for Note {
        type Id = String;

        fn new(id: Self::Id) -> Self {
            Self {
                id,
                ..Default::default()
            }
        }

        fn id(&self) -> &Self::Id {
            &self.id
        }

        fn version(&self) -> Version {
            self.version
        }

        fn set_version(&mut self, version: Version) {
            self.version = version;
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Written {
        text: String,
    }

    impl DomainEvent for Written {
        fn event_type(&self) -> &str {
            "note.written"
        }
    }

    impl Aggregate for Note {
        const TYPE: &'static str = "note";
        type Command = String;
        type Event = Written;
        type Error = DomainError;

        fn execute(&self, text: String) -> Result<Vec<Written>, DomainError> {
            Ok(vec![Written { text }])
        }

        fn apply(&mut self, event: &Written) {
            self.text = event.text.clone();
        }
    }

    fn setup() -> (UnitOfWork, SharedAdapter) {
        let uow = UnitOfWork::new(Arc::new(InlineBroker::default()));
        let adapter: SharedAdapter = Arc::new(InMemoryAdapter::new("primary"));
        (uow, adapter)
    }

    #[tokio::test]
    async fn commit_persists_and_bumps_version() {
        let (uow, adapter) = setup();
        let note = Tracked::new(Note::new("n-1".into()));
        note.execute("hello".into()).unwrap();
        uow.track(note.entry(), &adapter).unwrap();
        assert_eq!(uow.dirty_count(), 1);

        let report = uow.commit().await.unwrap();
        assert_eq!(report.committed_adapters, vec!["primary"]);
        assert_eq!(report.published_events, 1);
        assert_eq!(report.version_of(note.key()), Some(Version::from_value(1)));

        assert_eq!(uow.state(), SessionState::Committed);
        assert_eq!(uow.tracked_count(), 0);
        assert_eq!(note.version().value(), 1);
        assert_eq!(note.state(), ObjectState::Unchanged);
        assert!(adapter.fetch(None, "note", "n-1").await.is_ok());
    }

    #[tokio::test]
    async fn committed_session_cannot_be_reused() {
        let (uow, adapter) = setup();
        uow.commit().await.unwrap();

        let err = uow.commit().await.unwrap_err();
        assert!(matches!(
            err,
            DomainError::InvalidSessionState {
                state: SessionState::Committed,
                ..
            }
        ));

        let note = Tracked::new(Note::new("n-2".into()));
        assert!(uow.track(note.entry(), &adapter).is_err());
        assert!(uow.rollback().is_err());
    }

    #[tokio::test]
    async fn rollback_discards_tracked_state() {
        let (uow, adapter) = setup();
        let note = Tracked::new(Note::new("n-3".into()));
        note.execute("draft".into()).unwrap();
        uow.track(note.entry(), &adapter).unwrap();

        uow.rollback().unwrap();
        assert_eq!(uow.state(), SessionState::RolledBack);
        assert_eq!(uow.tracked_count(), 0);
        assert!(note.pending_events().is_empty());
        assert!(adapter.fetch(None, "note", "n-3").await.is_err());
    }

    #[tokio::test]
    async fn same_identity_resolves_to_one_instance() {
        let (uow, adapter) = setup();
        let first = Tracked::new(Note::new("n-4".into()));
        uow.track(first.entry(), &adapter).unwrap();
        uow.track(first.clone().entry(), &adapter).unwrap();
        assert_eq!(uow.tracked_count(), 1);

        let impostor = Tracked::new(Note::new("n-4".into()));
        let err = uow.track(impostor.entry(), &adapter).unwrap_err();
        assert!(matches!(err, DomainError::AlreadyTracked { .. }));
    }

    #[tokio::test]
    async fn scope_sets_the_current_session() {
        let (uow, _) = setup();
        assert!(UnitOfWork::current().is_none());

        let seen = uow
            .scope(async { UnitOfWork::current().map(|u| u.id()) })
            .await;
        assert_eq!(seen, Some(uow.id()));
        assert!(UnitOfWork::current().is_none());
    }
}
