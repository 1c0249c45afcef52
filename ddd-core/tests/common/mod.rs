#![allow(dead_code)]

use async_trait::async_trait;
use ddd_core::aggregate::Aggregate;
use ddd_core::domain_event::DomainEvent;
use ddd_core::entity::Entity;
use ddd_core::error::{DomainError, DomainResult};
use ddd_core::eventing::EventHandler;
use ddd_core::persist::{
    Adapter, AdapterCapabilities, Criteria, ResultSet, SerializedAggregate, SharedAdapter,
    TransactionHandle,
};
use ddd_core::value_object::Version;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ---- Order ----

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub version: Version,
    pub customer: String,
    pub total: i64,
    pub status: String,
}

impl Entity for Order {
    type Id = String;

    fn new(id: Self::Id) -> Self {
        Self {
            id,
            status: "draft".to_string(),
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

#[derive(Debug)]
pub enum OrderCommand {
    Place { customer: String, total: i64 },
    Pay,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderEvent {
    Placed { customer: String, total: i64 },
    Paid,
    Cancelled,
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &str {
        match self {
            OrderEvent::Placed { .. } => "OrderEvent.Placed",
            OrderEvent::Paid => "OrderEvent.Paid",
            OrderEvent::Cancelled => "OrderEvent.Cancelled",
        }
    }
}

impl Aggregate for Order {
    const TYPE: &'static str = "order";
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn execute(&self, command: OrderCommand) -> Result<Vec<OrderEvent>, DomainError> {
        match command {
            OrderCommand::Place { customer, total } => {
                if self.status != "draft" {
                    return Err(DomainError::InvalidCommand {
                        reason: format!("order {} already placed", self.id),
                    });
                }
                if total <= 0 {
                    return Err(DomainError::InvalidCommand {
                        reason: "total must be > 0".into(),
                    });
                }
                Ok(vec![OrderEvent::Placed { customer, total }])
            }
            OrderCommand::Pay => match self.status.as_str() {
                "placed" => Ok(vec![OrderEvent::Paid]),
                other => Err(DomainError::InvalidState {
                    reason: format!("cannot pay an order in status {other}"),
                }),
            },
            OrderCommand::Cancel => match self.status.as_str() {
                "cancelled" => Ok(vec![]),
                _ => Ok(vec![OrderEvent::Cancelled]),
            },
        }
    }

    fn apply(&mut self, event: &OrderEvent) {
        match event {
            OrderEvent::Placed { customer, total } => {
                self.customer = customer.clone();
                self.total = *total;
                self.status = "placed".into();
            }
            OrderEvent::Paid => self.status = "paid".into(),
            OrderEvent::Cancelled => self.status = "cancelled".into(),
        }
    }
}

/// 已下单的订单（尚未持久化）
pub fn placed_order(id: &str, customer: &str, total: i64) -> Order {
    let mut order = Order::new(id.to_string());
    for event in order
        .execute(OrderCommand::Place {
            customer: customer.into(),
            total,
        })
        .unwrap()
    {
        order.apply(&event);
    }
    order
}

// ---- Account ----

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub version: Version,
    pub balance: i64,
}

impl Entity for Account {
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
pub enum AccountEvent {
    Deposited { amount: i64 },
}

impl DomainEvent for AccountEvent {
    fn event_type(&self) -> &str {
        "AccountEvent.Deposited"
    }
}

impl Aggregate for Account {
    const TYPE: &'static str = "account";
    type Command = i64;
    type Event = AccountEvent;
    type Error = DomainError;

    fn execute(&self, amount: i64) -> Result<Vec<AccountEvent>, DomainError> {
        if amount <= 0 {
            return Err(DomainError::InvalidCommand {
                reason: "amount must be > 0".into(),
            });
        }
        Ok(vec![AccountEvent::Deposited { amount }])
    }

    fn apply(&mut self, event: &AccountEvent) {
        match event {
            AccountEvent::Deposited { amount } => self.balance += amount,
        }
    }
}

// ---- 记录型处理器 ----

#[derive(Default)]
pub struct RecordingHandler {
    seen: Mutex<Vec<ddd_core::persist::SerializedEvent>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ddd_core::persist::SerializedEvent> {
        self.seen.lock().unwrap().clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events()
            .iter()
            .map(|e| e.event_type().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    fn handler_name(&self) -> &str {
        "recording"
    }

    async fn handle(&self, event: &ddd_core::persist::SerializedEvent) -> DomainResult<()> {
        self.seen.lock().unwrap().push(event.clone());
        Ok(())
    }
}

// ---- 故障注入适配器 ----

/// 包装真实适配器，按开关在 begin/save/commit 处注入失败，并统计调用次数
pub struct FaultyAdapter {
    inner: SharedAdapter,
    pub fail_begin: AtomicBool,
    pub fail_save: AtomicBool,
    pub fail_commit: AtomicBool,
    pub fetch_many_calls: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
}

impl FaultyAdapter {
    pub fn wrap(inner: impl Adapter + 'static) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(inner),
            fail_begin: AtomicBool::new(false),
            fail_save: AtomicBool::new(false),
            fail_commit: AtomicBool::new(false),
            fetch_many_calls: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
            rollbacks: AtomicUsize::new(0),
        })
    }

    pub fn inner(&self) -> &SharedAdapter {
        &self.inner
    }

    fn injected(&self, operation: &str) -> DomainError {
        DomainError::adapter(self.inner.name(), format!("injected {operation} failure"))
    }
}

#[async_trait]
impl Adapter for FaultyAdapter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn capabilities(&self) -> AdapterCapabilities {
        self.inner.capabilities()
    }

    async fn fetch(
        &self,
        tx: Option<&TransactionHandle>,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> DomainResult<SerializedAggregate> {
        self.inner.fetch(tx, aggregate_type, aggregate_id).await
    }

    async fn fetch_many(
        &self,
        tx: Option<&TransactionHandle>,
        aggregate_type: &str,
        criteria: &Criteria,
    ) -> DomainResult<ResultSet> {
        self.fetch_many_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_many(tx, aggregate_type, criteria).await
    }

    async fn save(
        &self,
        tx: &TransactionHandle,
        record: SerializedAggregate,
        expected_version: Version,
    ) -> DomainResult<Version> {
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(self.injected("save"));
        }
        self.inner.save(tx, record, expected_version).await
    }

    async fn delete(
        &self,
        tx: &TransactionHandle,
        aggregate_type: &str,
        aggregate_id: &str,
        expected_version: Option<Version>,
    ) -> DomainResult<()> {
        self.inner
            .delete(tx, aggregate_type, aggregate_id, expected_version)
            .await
    }

    async fn begin(&self) -> DomainResult<TransactionHandle> {
        if self.fail_begin.load(Ordering::SeqCst) {
            return Err(self.injected("begin"));
        }
        self.inner.begin().await
    }

    async fn commit(&self, tx: TransactionHandle) -> DomainResult<()> {
        if self.fail_commit.load(Ordering::SeqCst) {
            // 底层事务照常释放，写入不生效
            self.inner.rollback(tx).await?;
            return Err(self.injected("commit"));
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.inner.commit(tx).await
    }

    async fn rollback(&self, tx: TransactionHandle) -> DomainResult<()> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.inner.rollback(tx).await
    }
}
