//! 仓储（Repository）
//!
//! 把适配器契约绑定到单一聚合类型的门面。默认使用当前会话
//! （`UnitOfWork::scope`），也可以通过 [`Repository::in_session`] 显式绑定。
//!
//! 没有会话时：`add`/`remove` 在一个隐式会话中执行并立即提交；
//! `get`/`find` 直接读取存储，不做跟踪。
//!
use crate::{
    aggregate::{Aggregate, AggregateKey, ObjectState},
    error::{DomainError, DomainResult},
    eventing::SharedBroker,
    persist::{Criteria, SerializedAggregate, SharedAdapter},
    tracked::{Tracked, TrackedEntry},
    uow::UnitOfWork,
};
use futures_core::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt, stream};
use std::marker::PhantomData;
use std::sync::Arc;

/// 未配置时每页读取的记录数
pub const DEFAULT_PER_PAGE: usize = 10;

pub struct Repository<A: Aggregate> {
    adapter: SharedAdapter,
    broker: SharedBroker,
    per_page: usize,
    session: Option<UnitOfWork>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A: Aggregate> Clone for Repository<A> {
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
            broker: self.broker.clone(),
            per_page: self.per_page,
            session: self.session.clone(),
            _aggregate: PhantomData,
        }
    }
}

impl<A: Aggregate> std::fmt::Debug for Repository<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("aggregate", &std::any::type_name::<A>())
            .field("adapter", &self.adapter.name())
            .field("broker", &self.broker.name())
            .field("per_page", &self.per_page)
            .field("session", &self.session)
            .finish()
    }
}

struct Cursor<A: Aggregate> {
    repo: Repository<A>,
    criteria: Criteria,
    offset: usize,
    remaining: Option<usize>,
    done: bool,
}

impl<A: Aggregate> Repository<A> {
    /// `broker` 只用于隐式会话的事件发布
    pub fn new(adapter: SharedAdapter, broker: SharedBroker, per_page: usize) -> Self {
        Self {
            adapter,
            broker,
            per_page: per_page.max(1),
            session: None,
            _aggregate: PhantomData,
        }
    }

    /// 绑定到指定会话
    pub fn in_session(&self, uow: &UnitOfWork) -> Self {
        Self {
            session: Some(uow.clone()),
            ..self.clone()
        }
    }

    pub fn adapter(&self) -> &SharedAdapter {
        &self.adapter
    }

    pub fn per_page(&self) -> usize {
        self.per_page
    }

    /// 显式绑定的会话优先，其次为当前任务作用域内的会话
    pub fn session(&self) -> Option<UnitOfWork> {
        self.session.clone().or_else(UnitOfWork::current)
    }

    fn implicit_session(&self) -> UnitOfWork {
        let uow = UnitOfWork::new(self.broker.clone());
        tracing::debug!(
            session_id = %uow.id(),
            aggregate_type = A::TYPE,
            "implicit unit of work"
        );
        uow
    }

    /// 登记一个新实例（或已有句柄），返回跟踪句柄
    pub async fn add(&self, instance: impl Into<Tracked<A>>) -> DomainResult<Tracked<A>> {
        let tracked = instance.into();
        match self.session() {
            Some(uow) => {
                uow.track(tracked.entry(), &self.adapter)?;
            }
            None => {
                let uow = self.implicit_session();
                uow.track(tracked.entry(), &self.adapter)?;
                uow.commit().await?;
            }
        }
        Ok(tracked)
    }

    /// 按标识读取：先查身份映射，未命中则从存储加载并以 `Unchanged` 跟踪
    pub async fn get(&self, id: &A::Id) -> DomainResult<Tracked<A>> {
        let key = AggregateKey::of::<A>(id);
        let session = self.session();

        if let Some(uow) = &session {
            if let Some(entry) = uow.lookup(&key)? {
                return self.resolve(entry).and_then(|found| {
                    found.ok_or_else(|| DomainError::not_found(A::TYPE, key.aggregate_id()))
                });
            }
        }

        let record = self
            .adapter
            .fetch(None, A::TYPE, key.aggregate_id())
            .await?;
        self.track_record(session.as_ref(), record)?
            .ok_or_else(|| DomainError::not_found(A::TYPE, key.aggregate_id()))
    }

    /// 按条件惰性分页读取
    ///
    /// 每页 `per_page` 条，条件中的 `offset`/`limit` 作用于整个结果序列。
    /// 已在身份映射中的实例直接复用，已标记删除的实例被跳过。
    /// 流是有限的，不可重启；出错时产出一个 `Err` 后结束。
    pub fn find(&self, criteria: Criteria) -> BoxStream<'static, DomainResult<Tracked<A>>> {
        let repo = Self {
            session: self.session(),
            ..self.clone()
        };
        let cursor = Cursor {
            offset: criteria.get_offset(),
            remaining: criteria.get_limit(),
            criteria,
            repo,
            done: false,
        };

        stream::unfold(cursor, |mut cursor| async move {
            if cursor.done || cursor.remaining == Some(0) {
                return None;
            }

            let page_size = cursor
                .remaining
                .map_or(cursor.repo.per_page, |r| r.min(cursor.repo.per_page));
            let page = cursor
                .criteria
                .clone()
                .offset(cursor.offset)
                .limit(page_size);

            match cursor.repo.adapter.fetch_many(None, A::TYPE, &page).await {
                Err(err) => {
                    cursor.done = true;
                    Some((vec![Err(err)], cursor))
                }
                Ok(result) => {
                    let fetched = result.items.len();
                    cursor.offset += fetched;
                    if let Some(remaining) = cursor.remaining.as_mut() {
                        *remaining = remaining.saturating_sub(fetched);
                    }
                    if fetched == 0 || !result.has_next() {
                        cursor.done = true;
                    }

                    let session = cursor.repo.session.clone();
                    let items: Vec<_> = result
                        .items
                        .into_iter()
                        .filter_map(|record| {
                            cursor.repo.track_record(session.as_ref(), record).transpose()
                        })
                        .collect();
                    Some((items, cursor))
                }
            }
        })
        .flat_map(stream::iter)
        .boxed()
    }

    /// 收集 [`Repository::find`] 的全部结果
    pub async fn find_all(&self, criteria: Criteria) -> DomainResult<Vec<Tracked<A>>> {
        self.find(criteria).try_collect().await
    }

    /// 标记删除；`New` 实例直接脱离会话，不触及存储
    pub async fn remove(&self, tracked: &Tracked<A>) -> DomainResult<()> {
        match self.session() {
            Some(uow) => self.remove_in(&uow, tracked),
            None => {
                if tracked.state() == ObjectState::New {
                    return Ok(());
                }
                let uow = self.implicit_session();
                self.remove_in(&uow, tracked)?;
                uow.commit().await.map(|_| ())
            }
        }
    }

    fn remove_in(&self, uow: &UnitOfWork, tracked: &Tracked<A>) -> DomainResult<()> {
        let entry = tracked.entry();
        if entry.state() == ObjectState::New {
            if let Some(existing) = uow.lookup(tracked.key())? {
                if std::ptr::addr_eq(Arc::as_ptr(&existing), Arc::as_ptr(&entry)) {
                    uow.detach(tracked.key())?;
                }
            }
            return Ok(());
        }

        uow.track(entry.clone(), &self.adapter)?;
        entry.mark_removed();
        Ok(())
    }

    fn resolve(
        &self,
        entry: Arc<dyn TrackedEntry>,
    ) -> DomainResult<Option<Tracked<A>>> {
        if entry.state() == ObjectState::Deleted {
            return Ok(None);
        }
        let key = entry.key().clone();
        Tracked::from_entry(entry).map(Some).ok_or_else(|| DomainError::TypeMismatch {
            expected: A::TYPE.to_string(),
            found: key.aggregate_type().to_string(),
        })
    }

    fn track_record(
        &self,
        session: Option<&UnitOfWork>,
        record: SerializedAggregate,
    ) -> DomainResult<Option<Tracked<A>>> {
        let loaded = Tracked::loaded(record.to_aggregate::<A>()?);
        match session {
            Some(uow) => {
                let entry = uow.track_loaded(loaded.entry(), &self.adapter)?;
                self.resolve(entry)
            }
            None => Ok(Some(loaded)),
        }
    }
}
