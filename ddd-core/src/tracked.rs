//! 被跟踪的聚合句柄（Tracked）
//!
//! 逻辑操作期间，聚合实例由 `Tracked<A>` 持有并登记在会话的身份映射中。
//! 句柄可廉价克隆，所有克隆指向同一个实例；变更方法维护脏标记并缓冲
//! 尚未派发的领域事件，读方法不改变状态。
//!
use crate::{
    aggregate::{Aggregate, AggregateKey, ObjectState},
    domain_event::{DomainEvent, EventContext},
    error::DomainResult,
    persist::{SerializedAggregate, SerializedEvent},
    value_object::Version,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// 进程内的事件产生序号，跨聚合、跨会话单调递增
static RAISE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_sequence() -> u64 {
    RAISE_SEQUENCE.fetch_add(1, Ordering::SeqCst)
}

struct PendingEvent<E> {
    sequence: u64,
    event_id: String,
    occurred_at: DateTime<Utc>,
    event: E,
}

impl<E> PendingEvent<E> {
    fn new(event: E) -> Self {
        Self {
            sequence: next_sequence(),
            event_id: Uuid::new_v4().to_string(),
            occurred_at: Utc::now(),
            event,
        }
    }
}

struct Slot<A: Aggregate> {
    aggregate: A,
    state: ObjectState,
    /// 标记删除前的状态，会话未提交删除时据此恢复
    removed_from: Option<ObjectState>,
    pending: Vec<PendingEvent<A::Event>>,
}

pub(crate) struct TrackedCell<A: Aggregate> {
    key: AggregateKey,
    slot: Mutex<Slot<A>>,
}

/// 聚合句柄
pub struct Tracked<A: Aggregate> {
    cell: Arc<TrackedCell<A>>,
}

impl<A: Aggregate> Clone for Tracked<A> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<A: Aggregate> From<A> for Tracked<A> {
    fn from(aggregate: A) -> Self {
        Self::new(aggregate)
    }
}

impl<A: Aggregate> fmt::Debug for Tracked<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.cell.slot.lock();
        f.debug_struct("Tracked")
            .field("key", &self.cell.key)
            .field("state", &slot.state)
            .field("version", &slot.aggregate.version())
            .field("pending_events", &slot.pending.len())
            .finish()
    }
}

impl<A: Aggregate> Tracked<A> {
    /// 包装一个尚未持久化的新实例（`ObjectState::New`）
    pub fn new(aggregate: A) -> Self {
        Self::with_state(aggregate, ObjectState::New)
    }

    /// 包装一个刚从存储加载的实例（`ObjectState::Unchanged`）
    pub(crate) fn loaded(aggregate: A) -> Self {
        Self::with_state(aggregate, ObjectState::Unchanged)
    }

    fn with_state(aggregate: A, state: ObjectState) -> Self {
        let key = AggregateKey::of::<A>(aggregate.id());
        Self {
            cell: Arc::new(TrackedCell {
                key,
                slot: Mutex::new(Slot {
                    aggregate,
                    state,
                    removed_from: None,
                    pending: Vec::new(),
                }),
            }),
        }
    }

    pub(crate) fn from_entry(entry: Arc<dyn TrackedEntry>) -> Option<Self> {
        entry
            .into_any()
            .downcast::<TrackedCell<A>>()
            .ok()
            .map(|cell| Self { cell })
    }

    pub(crate) fn entry(&self) -> Arc<dyn TrackedEntry> {
        self.cell.clone()
    }

    pub fn key(&self) -> &AggregateKey {
        &self.cell.key
    }

    pub fn id(&self) -> A::Id {
        self.cell.slot.lock().aggregate.id().clone()
    }

    pub fn version(&self) -> Version {
        self.cell.slot.lock().aggregate.version()
    }

    pub fn state(&self) -> ObjectState {
        self.cell.slot.lock().state
    }

    /// 只读访问聚合
    pub fn read<R>(&self, f: impl FnOnce(&A) -> R) -> R {
        f(&self.cell.slot.lock().aggregate)
    }

    /// 当前聚合状态的副本
    pub fn snapshot(&self) -> A {
        self.cell.slot.lock().aggregate.clone()
    }

    /// 取回聚合实例；仍有其他句柄存活时返回副本
    pub fn into_inner(self) -> A {
        match Arc::try_unwrap(self.cell) {
            Ok(cell) => cell.slot.into_inner().aggregate,
            Err(cell) => {
                let slot = cell.slot.lock();
                slot.aggregate.clone()
            }
        }
    }

    /// 执行命令：产生事件、应用到状态并缓冲待派发
    ///
    /// 命令未产生事件时不改变脏标记。
    pub fn execute(&self, command: A::Command) -> Result<Vec<A::Event>, A::Error> {
        let mut slot = self.cell.slot.lock();
        let events = slot.aggregate.execute(command)?;
        if events.is_empty() {
            return Ok(events);
        }

        for event in &events {
            slot.aggregate.apply(event);
            slot.pending.push(PendingEvent::new(event.clone()));
        }
        slot.state = slot.state.after_mutation();
        Ok(events)
    }

    /// 记录一个事件但不应用到状态（状态已通过 `modify` 改变时使用）
    pub fn raise(&self, event: A::Event) {
        let mut slot = self.cell.slot.lock();
        slot.pending.push(PendingEvent::new(event));
        slot.state = slot.state.after_mutation();
    }

    /// 直接修改聚合字段
    pub fn modify<R>(&self, f: impl FnOnce(&mut A) -> R) -> R {
        let mut slot = self.cell.slot.lock();
        let out = f(&mut slot.aggregate);
        slot.state = slot.state.after_mutation();
        out
    }

    /// 尚未派发的事件（按产生顺序）
    pub fn pending_events(&self) -> Vec<A::Event> {
        self.cell
            .slot
            .lock()
            .pending
            .iter()
            .map(|p| p.event.clone())
            .collect()
    }

    /// 两个句柄是否指向同一个实例
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

/// 身份映射中类型擦除后的条目
pub(crate) trait TrackedEntry: Send + Sync {
    fn key(&self) -> &AggregateKey;

    fn state(&self) -> ObjectState;

    fn version(&self) -> Version;

    fn to_record(&self) -> DomainResult<SerializedAggregate>;

    /// 取出缓冲的事件，盖上会话上下文与提交后的聚合版本
    fn take_events(&self, context: &EventContext) -> DomainResult<Vec<SerializedEvent>>;

    /// 丢弃缓冲的事件（会话回滚）
    fn discard_events(&self);

    /// 持久化成功：写回新版本并回到 `Unchanged`
    fn mark_persisted(&self, version: Version);

    /// 在会话中标记删除，记住此前的状态
    fn mark_removed(&self);

    /// 会话未提交删除：回到标记删除前的状态
    fn revert_removal(&self);

    /// 删除已落库
    fn mark_deleted(&self);

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<A: Aggregate> TrackedEntry for TrackedCell<A> {
    fn key(&self) -> &AggregateKey {
        &self.key
    }

    fn state(&self) -> ObjectState {
        self.slot.lock().state
    }

    fn version(&self) -> Version {
        self.slot.lock().aggregate.version()
    }

    fn to_record(&self) -> DomainResult<SerializedAggregate> {
        SerializedAggregate::from_aggregate(&self.slot.lock().aggregate)
    }

    fn take_events(&self, context: &EventContext) -> DomainResult<Vec<SerializedEvent>> {
        let mut slot = self.slot.lock();
        let aggregate_version = slot.aggregate.version().next();
        let mut out = Vec::with_capacity(slot.pending.len());
        for pending in &slot.pending {
            out.push(
                SerializedEvent::builder()
                    .event_id(pending.event_id.clone())
                    .event_type(pending.event.event_type())
                    .event_version(pending.event.event_version())
                    .sequence(pending.sequence)
                    .aggregate_id(self.key.aggregate_id())
                    .aggregate_type(self.key.aggregate_type())
                    .aggregate_version(aggregate_version)
                    .occurred_at(pending.occurred_at)
                    .payload(serde_json::to_value(&pending.event)?)
                    .context(context.clone())
                    .build(),
            );
        }
        slot.pending.clear();
        Ok(out)
    }

    fn discard_events(&self) {
        self.slot.lock().pending.clear();
    }

    fn mark_persisted(&self, version: Version) {
        let mut slot = self.slot.lock();
        slot.aggregate.set_version(version);
        slot.state = ObjectState::Unchanged;
        slot.removed_from = None;
    }

    fn mark_removed(&self) {
        let mut slot = self.slot.lock();
        if slot.state != ObjectState::Deleted {
            slot.removed_from = Some(slot.state);
            slot.state = ObjectState::Deleted;
        }
    }

    fn revert_removal(&self) {
        let mut slot = self.slot.lock();
        if let Some(previous) = slot.removed_from.take() {
            slot.state = previous;
        }
    }

    fn mark_deleted(&self) {
        let mut slot = self.slot.lock();
        slot.state = ObjectState::Deleted;
        slot.removed_from = None;
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::error::DomainError;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Wallet {
        id: String,
        version: Version,
        balance: i64,
    }

    impl Entity for Wallet {
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
    enum WalletEvent {
        Credited { amount: i64 },
        Frozen,
    }

    impl DomainEvent for WalletEvent {
        fn event_type(&self) -> &str {
            match self {
                WalletEvent::Credited { .. } => "wallet.credited",
                WalletEvent::Frozen => "wallet.frozen",
            }
        }
    }

    impl Aggregate for Wallet {
        const TYPE: &'static str = "wallet";
        type Command = i64;
        type Event = WalletEvent;
        type Error = DomainError;

        fn execute(&self, amount: i64) -> Result<Vec<WalletEvent>, DomainError> {
            match amount {
                0 => Ok(vec![]),
                a if a < 0 => Err(DomainError::InvalidCommand {
                    reason: "negative credit".into(),
                }),
                a => Ok(vec![WalletEvent::Credited { amount: a }]),
            }
        }

        fn apply(&mut self, event: &WalletEvent) {
            if let WalletEvent::Credited { amount } = event {
                self.balance += amount;
            }
        }
    }

    #[test]
    fn execute_applies_and_buffers() {
        let wallet = Tracked::loaded(Wallet::new("w-1".into()));
        assert_eq!(wallet.state(), ObjectState::Unchanged);

        wallet.execute(0).unwrap();
        assert_eq!(wallet.state(), ObjectState::Unchanged);

        let events = wallet.execute(5).unwrap();
        assert_eq!(events, vec![WalletEvent::Credited { amount: 5 }]);
        assert_eq!(wallet.read(|w| w.balance), 5);
        assert_eq!(wallet.state(), ObjectState::Updated);
        assert_eq!(wallet.pending_events().len(), 1);

        assert!(wallet.execute(-1).is_err());
        assert_eq!(wallet.read(|w| w.balance), 5);
    }

    #[test]
    fn removal_mark_can_be_reverted() {
        let wallet = Tracked::loaded(Wallet::new("w-3".into()));
        wallet.execute(3).unwrap();
        let entry = wallet.entry();

        entry.mark_removed();
        entry.mark_removed();
        assert_eq!(wallet.state(), ObjectState::Deleted);
        entry.revert_removal();
        assert_eq!(wallet.state(), ObjectState::Updated);

        // 删除落库后不再恢复
        entry.mark_removed();
        entry.mark_deleted();
        entry.revert_removal();
        assert_eq!(wallet.state(), ObjectState::Deleted);
    }

    #[test]
    fn new_stays_new_after_mutation() {
        let wallet = Tracked::new(Wallet::new("w-2".into()));
        wallet.modify(|w| w.balance = 7);
        wallet.raise(WalletEvent::Frozen);
        assert_eq!(wallet.state(), ObjectState::New);
        assert_eq!(wallet.snapshot().balance, 7);
    }

    #[test]
    fn take_events_preserves_raise_order_and_clears() {
        let wallet = Tracked::loaded(Wallet::new("w-3".into()));
        wallet.execute(1).unwrap();
        wallet.raise(WalletEvent::Frozen);

        let context = EventContext::builder()
            .correlation_id("corr-1".to_string())
            .build();
        let events = wallet.entry().take_events(&context).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].sequence() < events[1].sequence());
        assert_eq!(events[0].event_type(), "wallet.credited");
        assert_eq!(events[1].event_type(), "wallet.frozen");
        assert_eq!(events[1].aggregate_version(), Version::from_value(1));
        assert_eq!(events[0].context().correlation_id(), Some("corr-1"));
        assert!(wallet.pending_events().is_empty());
    }

    #[test]
    fn entry_round_trips_through_any() {
        let wallet = Tracked::new(Wallet::new("w-4".into()));
        let entry = wallet.entry();
        entry.mark_persisted(Version::from_value(3));

        let back = Tracked::<Wallet>::from_entry(entry).unwrap();
        assert!(back.ptr_eq(&wallet));
        assert_eq!(wallet.version().value(), 3);
        assert_eq!(wallet.state(), ObjectState::Unchanged);
        assert_eq!(wallet.key().to_string(), "wallet:w-4");
    }

    #[test]
    fn into_inner_returns_copy_when_shared() {
        let wallet = Tracked::new(Wallet::new("w-5".into()));
        let other = wallet.clone();
        other.modify(|w| w.balance = 3);
        assert_eq!(wallet.into_inner().balance, 3);
        assert_eq!(other.into_inner().balance, 3);
    }
}
