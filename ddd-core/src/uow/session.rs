use super::identity_map::{AdapterBatch, IdentityMap};
use super::{CommitReport, Outbox, PersistedAggregate, SessionState};
use crate::{
    aggregate::{AggregateKey, ObjectState},
    domain_event::EventContext,
    error::{DomainError, DomainResult},
    eventing::SharedBroker,
    persist::{SharedAdapter, TransactionHandle},
    tracked::TrackedEntry,
    value_object::Version,
};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

tokio::task_local! {
    static CURRENT_SESSION: UnitOfWork;
}

/// 工作单元：一次逻辑操作中所有变更的会话
///
/// 可廉价克隆，所有克隆共享同一个会话。会话只属于一个逻辑操作；
/// 提交在独立任务中执行，调用方的 future 被丢弃也不会中断提交。
#[derive(Clone)]
pub struct UnitOfWork {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: Uuid,
    broker: SharedBroker,
    context: EventContext,
    data: Mutex<SessionData>,
}

struct SessionData {
    state: SessionState,
    identity_map: IdentityMap,
}

/// 已开启事务的适配器及其写入结果（`None` 为删除）
struct Begun {
    adapter: SharedAdapter,
    tx: TransactionHandle,
    written: Vec<(Arc<dyn TrackedEntry>, Option<Version>)>,
}

impl UnitOfWork {
    pub fn new(broker: SharedBroker) -> Self {
        Self::with_context(broker, EventContext::default())
    }

    /// 开启会话，并把上下文盖到本会话产生的每个事件上
    pub fn with_context(broker: SharedBroker, context: EventContext) -> Self {
        let id = Uuid::new_v4();
        tracing::debug!(session_id = %id, "unit of work started");
        Self {
            inner: Arc::new(SessionInner {
                id,
                broker,
                context,
                data: Mutex::new(SessionData {
                    state: SessionState::Active,
                    identity_map: IdentityMap::default(),
                }),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn state(&self) -> SessionState {
        self.inner.data.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    pub fn context(&self) -> &EventContext {
        &self.inner.context
    }

    /// 身份映射中的条目数
    pub fn tracked_count(&self) -> usize {
        self.inner.data.lock().identity_map.len()
    }

    /// 需要在提交时写入的条目数
    pub fn dirty_count(&self) -> usize {
        self.inner.data.lock().identity_map.dirty_count()
    }

    /// 当前任务作用域内的会话（见 [`UnitOfWork::scope`]）
    pub fn current() -> Option<UnitOfWork> {
        CURRENT_SESSION.try_with(Clone::clone).ok()
    }

    /// 以本会话作为当前会话运行 `fut`
    pub async fn scope<F>(&self, fut: F) -> F::Output
    where
        F: Future,
    {
        CURRENT_SESSION.scope(self.clone(), fut).await
    }

    pub fn same_session(&self, other: &UnitOfWork) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn invalid_state(&self, state: SessionState, operation: &'static str) -> DomainError {
        DomainError::InvalidSessionState {
            session_id: self.inner.id,
            state,
            operation,
        }
    }

    // ---- 供仓储使用的登记接口 ----

    pub(crate) fn lookup(&self, key: &AggregateKey) -> DomainResult<Option<Arc<dyn TrackedEntry>>> {
        let data = self.inner.data.lock();
        if data.state != SessionState::Active {
            return Err(self.invalid_state(data.state, "lookup"));
        }
        Ok(data.identity_map.get(key))
    }

    /// 登记条目；同一实例重复登记为空操作，同键的另一个实例返回 `AlreadyTracked`
    pub(crate) fn track(
        &self,
        entry: Arc<dyn TrackedEntry>,
        adapter: &SharedAdapter,
    ) -> DomainResult<()> {
        let mut data = self.inner.data.lock();
        if data.state != SessionState::Active {
            return Err(self.invalid_state(data.state, "track"));
        }

        if let Some(existing) = data.identity_map.get(entry.key()) {
            if std::ptr::addr_eq(Arc::as_ptr(&existing), Arc::as_ptr(&entry)) {
                return Ok(());
            }
            return Err(DomainError::AlreadyTracked {
                aggregate_type: entry.key().aggregate_type().to_string(),
                aggregate_id: entry.key().aggregate_id().to_string(),
            });
        }

        tracing::trace!(
            session_id = %self.inner.id,
            adapter = adapter.name(),
            aggregate = %entry.key(),
            state = ?entry.state(),
            "aggregate tracked"
        );
        data.identity_map.insert(entry, adapter);
        Ok(())
    }

    /// 登记从存储加载的条目；同键已被跟踪时返回已有条目
    pub(crate) fn track_loaded(
        &self,
        entry: Arc<dyn TrackedEntry>,
        adapter: &SharedAdapter,
    ) -> DomainResult<Arc<dyn TrackedEntry>> {
        let mut data = self.inner.data.lock();
        if data.state != SessionState::Active {
            return Err(self.invalid_state(data.state, "track"));
        }
        if let Some(existing) = data.identity_map.get(entry.key()) {
            return Ok(existing);
        }
        data.identity_map.insert(Arc::clone(&entry), adapter);
        Ok(entry)
    }

    pub(crate) fn detach(&self, key: &AggregateKey) -> DomainResult<()> {
        let mut data = self.inner.data.lock();
        if data.state != SessionState::Active {
            return Err(self.invalid_state(data.state, "detach"));
        }
        data.identity_map.remove(key);
        Ok(())
    }

    // ---- 中止 ----

    /// 提交前中止会话：丢弃全部跟踪状态与缓冲事件
    pub fn rollback(&self) -> DomainResult<()> {
        let mut data = self.inner.data.lock();
        if data.state != SessionState::Active {
            return Err(self.invalid_state(data.state, "rollback"));
        }
        for entry in data.identity_map.entries() {
            entry.discard_events();
            entry.revert_removal();
        }
        data.identity_map.clear();
        data.state = SessionState::RolledBack;
        tracing::debug!(session_id = %self.inner.id, "unit of work rolled back");
        Ok(())
    }

    // ---- 提交 ----

    /// 提交会话
    ///
    /// 1. `Active → Committing`，从各聚合取出事件放入发件箱；
    /// 2. 按首次接触顺序对有脏条目的适配器 `begin`，并以最后已知版本逐条 `save`/`delete`；
    /// 3. 按同样顺序逐个 `commit`；
    /// 4. 全部成功后进入 `Committed`，再按产生顺序发布事件。
    ///
    /// 第 3 步之前的失败会回滚所有已开启的事务（逆序），返回 `SessionAborted`；
    /// 第 3 步的失败返回 `CommitFailed`，其余已开启的事务被回滚，会话进入
    /// `PartiallyCommitted`（尚无适配器提交时为 `RolledBack`）。提交成功但
    /// 事件发布失败时返回 `CommittedUnpublished`（内含 `CommitReport`，根因为
    /// `PublishFailed`），存储不回滚。
    pub async fn commit(&self) -> DomainResult<CommitReport> {
        let session = self.clone();
        tokio::spawn(async move { session.run_commit().await }).await?
    }

    async fn run_commit(self) -> DomainResult<CommitReport> {
        let session_id = self.inner.id;

        let (plan, entries) = {
            let mut data = self.inner.data.lock();
            if data.state != SessionState::Active {
                return Err(self.invalid_state(data.state, "commit"));
            }
            data.state = SessionState::Committing;
            let entries: Vec<_> = data.identity_map.entries().cloned().collect();
            (data.identity_map.plan(), entries)
        };

        let mut outbox = Outbox::new();
        for entry in &entries {
            match entry.take_events(&self.inner.context) {
                Ok(events) => outbox.extend(events),
                Err(err) => {
                    let aggregates = vec![entry.key().to_string()];
                    return Err(self.abort(Vec::new(), "outbox", aggregates, err).await);
                }
            }
        }

        self.warn_weak_guarantees(&plan);

        // 开启事务并写入
        let mut begun: Vec<Begun> = Vec::with_capacity(plan.len());
        for AdapterBatch { adapter, entries } in plan {
            let tx = match adapter.begin().await {
                Ok(tx) => tx,
                Err(err) => {
                    let aggregates = entries.iter().map(|e| e.key().to_string()).collect();
                    let name = adapter.name().to_string();
                    return Err(self.abort(begun, &name, aggregates, err).await);
                }
            };

            let mut written = Vec::with_capacity(entries.len());
            for entry in entries {
                match Self::write(&adapter, &tx, entry.as_ref()).await {
                    Ok(version) => written.push((entry, version)),
                    Err(err) => {
                        let name = adapter.name().to_string();
                        begun.push(Begun {
                            adapter,
                            tx,
                            written,
                        });
                        let aggregates = vec![entry.key().to_string()];
                        return Err(self.abort(begun, &name, aggregates, err).await);
                    }
                }
            }
            begun.push(Begun {
                adapter,
                tx,
                written,
            });
        }

        // 逐个提交
        let mut committed: Vec<String> = Vec::with_capacity(begun.len());
        let mut persisted: Vec<PersistedAggregate> = Vec::new();
        let mut remaining = begun.into_iter();
        while let Some(Begun {
            adapter,
            tx,
            written,
        }) = remaining.next()
        {
            let name = adapter.name().to_string();
            let keys: Vec<String> = written.iter().map(|(e, _)| e.key().to_string()).collect();
            if let Err(err) = adapter.commit(tx).await {
                let rest: Vec<Begun> = remaining.collect();
                return Err(self
                    .fail_commit(committed, persisted, name, keys, rest, err)
                    .await);
            }

            for (entry, version) in written {
                Self::apply_written(&entry, version);
                persisted.push(PersistedAggregate {
                    key: entry.key().clone(),
                    adapter: name.clone(),
                    version,
                });
            }
            committed.push(name);
        }

        self.finish(SessionState::Committed);

        let total_events = outbox.len();
        let report = outbox.flush(self.inner.broker.as_ref()).await;
        let published_events = report.delivered.len();
        tracing::info!(
            %session_id,
            adapters = ?committed,
            aggregates = persisted.len(),
            events = total_events,
            published = published_events,
            "unit of work committed"
        );
        let commit_report = CommitReport {
            session_id,
            committed_adapters: committed,
            persisted,
            published_events,
        };
        match report.into_error() {
            Some(err) => Err(DomainError::CommittedUnpublished {
                report: Box::new(commit_report),
                source: Box::new(err),
            }),
            None => Ok(commit_report),
        }
    }

    async fn write(
        adapter: &SharedAdapter,
        tx: &TransactionHandle,
        entry: &dyn TrackedEntry,
    ) -> DomainResult<Option<Version>> {
        let key = entry.key();
        match entry.state() {
            ObjectState::Deleted => {
                adapter
                    .delete(
                        tx,
                        key.aggregate_type(),
                        key.aggregate_id(),
                        Some(entry.version()),
                    )
                    .await?;
                Ok(None)
            }
            _ => {
                let record = entry.to_record()?;
                let version = adapter.save(tx, record, entry.version()).await?;
                Ok(Some(version))
            }
        }
    }

    fn apply_written(entry: &Arc<dyn TrackedEntry>, version: Option<Version>) {
        match version {
            Some(version) => entry.mark_persisted(version),
            None => entry.mark_deleted(),
        }
    }

    fn warn_weak_guarantees(&self, plan: &[AdapterBatch]) {
        if plan.len() > 1 {
            let adapters: Vec<&str> = plan.iter().map(|b| b.adapter.name()).collect();
            tracing::warn!(
                session_id = %self.inner.id,
                ?adapters,
                "unit of work spans several adapters; commits are sequential and may partially fail"
            );
        }
        for batch in plan {
            if !batch.adapter.capabilities().supports_native_transactions {
                tracing::warn!(
                    session_id = %self.inner.id,
                    adapter = batch.adapter.name(),
                    "adapter emulates transactions; rollback is compensating and best-effort"
                );
            }
        }
    }

    /// 进入终态并释放身份映射；未落库的删除标记被撤销
    fn finish(&self, state: SessionState) {
        let mut data = self.inner.data.lock();
        data.state = state;
        for entry in data.identity_map.entries() {
            entry.revert_removal();
        }
        data.identity_map.clear();
    }

    async fn rollback_all(&self, begun: Vec<Begun>) -> Vec<String> {
        let mut failures = Vec::new();
        for Begun { adapter, tx, .. } in begun.into_iter().rev() {
            if let Err(err) = adapter.rollback(tx).await {
                tracing::error!(
                    session_id = %self.inner.id,
                    adapter = adapter.name(),
                    error = %err,
                    "adapter rollback failed"
                );
                failures.push(format!("{}: {err}", adapter.name()));
            }
        }
        failures
    }

    async fn abort(
        &self,
        begun: Vec<Begun>,
        adapter: &str,
        aggregates: Vec<String>,
        source: DomainError,
    ) -> DomainError {
        let rollback_failures = self.rollback_all(begun).await;
        self.finish(SessionState::RolledBack);
        tracing::warn!(
            session_id = %self.inner.id,
            adapter,
            ?aggregates,
            error = %source,
            "unit of work aborted"
        );
        DomainError::SessionAborted {
            session_id: self.inner.id,
            adapter: adapter.to_string(),
            aggregates,
            rollback_failures,
            source: Box::new(source),
        }
    }

    async fn fail_commit(
        &self,
        committed: Vec<String>,
        persisted: Vec<PersistedAggregate>,
        failed: String,
        failed_aggregates: Vec<String>,
        rest: Vec<Begun>,
        source: DomainError,
    ) -> DomainError {
        let mut not_committed = vec![failed.clone()];
        not_committed.extend(rest.iter().map(|b| b.adapter.name().to_string()));

        let rollback_failures = self.rollback_all(rest).await;
        if committed.is_empty() {
            self.finish(SessionState::RolledBack);
            tracing::warn!(
                session_id = %self.inner.id,
                failed = %failed,
                aggregates = ?failed_aggregates,
                ?not_committed,
                ?rollback_failures,
                error = %source,
                "unit of work commit failed before any adapter committed"
            );
        } else {
            self.finish(SessionState::PartiallyCommitted);
            tracing::error!(
                session_id = %self.inner.id,
                failed = %failed,
                ?committed,
                ?not_committed,
                persisted = persisted.len(),
                ?rollback_failures,
                error = %source,
                "unit of work partially committed"
            );
        }
        DomainError::CommitFailed {
            session_id: self.inner.id,
            committed,
            failed,
            not_committed,
            rollback_failures,
            source: Box::new(source),
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let data = self.data.get_mut();
        if data.state == SessionState::Active {
            let dirty = data.identity_map.dirty_count();
            if dirty > 0 {
                tracing::warn!(
                    session_id = %self.id,
                    dirty,
                    "active unit of work dropped; tracked changes discarded"
                );
            } else {
                tracing::debug!(session_id = %self.id, "unit of work discarded");
            }
            for entry in data.identity_map.entries() {
                entry.discard_events();
                entry.revert_removal();
            }
        }
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.inner.data.lock();
        f.debug_struct("UnitOfWork")
            .field("id", &self.inner.id)
            .field("state", &data.state)
            .field("tracked", &data.identity_map.len())
            .finish()
    }
}
