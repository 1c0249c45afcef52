/// 订单流程示例
/// 从 JSON 配置装配领域，在工作单元中下单、支付，并演示乐观锁冲突与跨适配器提交
use anyhow::Result as AnyResult;
use async_trait::async_trait;
use ddd_core::aggregate::Aggregate;
use ddd_core::config::DomainConfig;
use ddd_core::domain::Domain;
use ddd_core::domain_event::{DomainEvent, EventContext};
use ddd_core::entity::Entity;
use ddd_core::error::{DomainError, DomainResult};
use ddd_core::eventing::{EventHandler, HandledEventType};
use ddd_core::persist::{Criteria, SerializedEvent};
use ddd_core::telemetry::init_tracing;
use ddd_core::value_object::Version;
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

// ============================================================================
// 领域模型
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Order {
    id: String,
    version: Version,
    customer: String,
    total: i64,
    paid: bool,
}

impl Entity for Order {
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

#[derive(Debug)]
enum OrderCommand {
    Place { customer: String, total: i64 },
    Pay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum OrderEvent {
    Placed { customer: String, total: i64 },
    Paid { total: i64 },
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &str {
        match self {
            OrderEvent::Placed { .. } => "order.placed",
            OrderEvent::Paid { .. } => "order.paid",
        }
    }
}

impl Aggregate for Order {
    const TYPE: &'static str = "order";
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn execute(&self, command: Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::Place { customer, total } => {
                if total <= 0 {
                    return Err(DomainError::InvalidCommand {
                        reason: "total must be > 0".to_string(),
                    });
                }
                Ok(vec![OrderEvent::Placed { customer, total }])
            }
            OrderCommand::Pay => {
                if self.paid {
                    return Err(DomainError::InvalidState {
                        reason: format!("order {} already paid", self.id),
                    });
                }
                Ok(vec![OrderEvent::Paid { total: self.total }])
            }
        }
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::Placed { customer, total } => {
                self.customer = customer.clone();
                self.total = *total;
            }
            OrderEvent::Paid { .. } => self.paid = true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Invoice {
    id: String,
    version: Version,
    order_id: String,
    amount: i64,
}

impl Entity for Invoice {
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
enum InvoiceEvent {
    Issued { order_id: String, amount: i64 },
}

impl DomainEvent for InvoiceEvent {
    fn event_type(&self) -> &str {
        "invoice.issued"
    }
}

impl Aggregate for Invoice {
    const TYPE: &'static str = "invoice";
    type Command = (String, i64);
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn execute(&self, (order_id, amount): Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        Ok(vec![InvoiceEvent::Issued { order_id, amount }])
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::Issued { order_id, amount } => {
                self.order_id = order_id.clone();
                self.amount = *amount;
            }
        }
    }
}

// ============================================================================
// 事件处理器
// ============================================================================

struct Printer;

#[async_trait]
impl EventHandler for Printer {
    fn handler_name(&self) -> &str {
        "printer"
    }

    async fn handle(&self, event: &SerializedEvent) -> DomainResult<()> {
        println!(
            "  -> {} {}:{} v{} {}",
            event.event_type(),
            event.aggregate_type(),
            event.aggregate_id(),
            event.aggregate_version().value(),
            event.payload()
        );
        Ok(())
    }
}

const CONFIG: &str = r#"{
    "name": "shop",
    "databases": {
        "primary": { "provider": "memory" },
        "billing": { "provider": "kv" }
    },
    "aggregates": { "order": "primary", "invoice": "billing" },
    "brokers": { "default": { "provider": "channel", "params": { "capacity": 256 } } },
    "per_page": 2,
    "logging": { "level": "ddd_core=info", "format": "pretty" }
}"#;

#[tokio::main]
async fn main() -> AnyResult<()> {
    let config = DomainConfig::from_json_str(CONFIG)?;
    init_tracing(&config.logging)?;

    let domain = Domain::from_config(config).await?;
    domain.subscribe(HandledEventType::All, std::sync::Arc::new(Printer));
    let orders = domain.repository_for::<Order>()?;
    let invoices = domain.repository_for::<Invoice>()?;

    println!("== 下单");
    let repo = orders.clone();
    domain
        .transaction(|_uow| async move {
            for (id, customer, total) in [("o-1", "alice", 120), ("o-2", "bob", 80), ("o-3", "alice", 45)] {
                let order = repo.add(Order::new(id.to_string())).await?;
                order.execute(OrderCommand::Place {
                    customer: customer.to_string(),
                    total,
                })?;
            }
            Ok(())
        })
        .await?;

    println!("== 支付 o-1，并在账单库开具发票（两个适配器依次提交）");
    let ctx = EventContext::builder()
        .correlation_id("checkout-1".to_string())
        .actor_type("user".to_string())
        .actor_id("alice".to_string())
        .build();
    let uow = domain.unit_of_work_with(ctx);
    let order = orders.in_session(&uow).get(&"o-1".to_string()).await?;
    order.execute(OrderCommand::Pay)?;
    let invoice = invoices
        .in_session(&uow)
        .add(Invoice::new("inv-1".to_string()))
        .await?;
    invoice.execute(("o-1".to_string(), order.read(|o| o.total)))?;
    let report = uow.commit().await?;
    println!(
        "  committed adapters={:?}, events={}",
        report.committed_adapters, report.published_events
    );

    println!("== 过期副本提交失败");
    let stale = domain.unit_of_work();
    let fresh = domain.unit_of_work();
    let stale_copy = orders.in_session(&stale).get(&"o-2".to_string()).await?;
    let fresh_copy = orders.in_session(&fresh).get(&"o-2".to_string()).await?;
    fresh_copy.execute(OrderCommand::Pay)?;
    fresh.commit().await?;
    stale_copy.execute(OrderCommand::Pay)?;
    match stale.commit().await {
        Err(err) if err.is_concurrency_conflict() => println!("  rejected: {}", err.root_cause()),
        other => println!("  unexpected: {other:?}"),
    }

    println!("== 分页查询 alice 的订单");
    let alice: Vec<_> = orders
        .find(
            Criteria::new()
                .filter_by("customer", json!("alice"))?
                .order_by("-total"),
        )
        .try_collect()
        .await?;
    for order in &alice {
        order.read(|o| println!("  {} total={} paid={} {}", o.id, o.total, o.paid, o.version));
    }

    // 给后台分发留出时间
    tokio::time::sleep(Duration::from_millis(100)).await;
    domain.shutdown();
    Ok(())
}
