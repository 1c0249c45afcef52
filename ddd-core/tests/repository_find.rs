mod common;

use anyhow::Result as AnyResult;
use common::{FaultyAdapter, Order, OrderCommand, placed_order};
use ddd_core::aggregate::ObjectState;
use ddd_core::config::DomainConfig;
use ddd_core::domain::Domain;
use ddd_core::persist::{Criteria, InMemoryAdapter, Lookup};
use futures_util::{StreamExt, TryStreamExt};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// 每页 2 条，预置 o-1..o-5（total 依次为 10..50）
async fn catalog() -> AnyResult<(Domain, Arc<FaultyAdapter>)> {
    let store = FaultyAdapter::wrap(InMemoryAdapter::new("primary"));
    let mut config = DomainConfig::new("catalog").bind("order", "primary");
    config.per_page = 2;

    let domain = Domain::builder()
        .config(config)
        .adapter(store.clone())
        .build()
        .await?;

    let orders = domain.repository_for::<Order>()?;
    for i in 1..=5 {
        let customer = if i % 2 == 0 { "Bob" } else { "alice" };
        orders
            .add(placed_order(&format!("o-{i}"), customer, i * 10))
            .await?;
    }
    store.fetch_many_calls.store(0, Ordering::SeqCst);
    Ok((domain, store))
}

fn totals(items: &[ddd_core::Tracked<Order>]) -> Vec<i64> {
    items.iter().map(|o| o.read(|o| o.total)).collect()
}

#[tokio::test]
async fn find_pages_lazily() -> AnyResult<()> {
    let (domain, store) = catalog().await?;
    let orders = domain.repository_for::<Order>()?;

    let first_two: Vec<_> = orders
        .find(Criteria::new().order_by("total"))
        .take(2)
        .try_collect()
        .await?;
    assert_eq!(totals(&first_two), vec![10, 20]);
    assert_eq!(store.fetch_many_calls.load(Ordering::SeqCst), 1);

    // 5 条记录、每页 2 条：读完需要 3 页
    let all = orders
        .find_all(Criteria::new().order_by("-total"))
        .await?;
    assert_eq!(totals(&all), vec![50, 40, 30, 20, 10]);
    assert_eq!(store.fetch_many_calls.load(Ordering::SeqCst), 4);

    // 无会话时结果不被跟踪
    assert!(all.iter().all(|o| o.state() == ObjectState::Unchanged));
    Ok(())
}

#[tokio::test]
async fn find_reuses_identity_map_entries() -> AnyResult<()> {
    let (domain, _) = catalog().await?;
    let orders = domain.repository_for::<Order>()?;

    let uow = domain.unit_of_work();
    let repo = orders.in_session(&uow);
    let third = repo.get(&"o-3".to_string()).await?;
    third.execute(OrderCommand::Pay)?;

    let all = repo.find_all(Criteria::new()).await?;
    assert_eq!(all.len(), 5);
    let again = all.iter().find(|o| o.id() == "o-3").expect("o-3 listed");
    assert!(again.ptr_eq(&third));
    // 看到的是会话内未提交的修改
    assert_eq!(again.read(|o| o.status.clone()), "paid");
    assert_eq!(uow.tracked_count(), 5);
    assert_eq!(uow.dirty_count(), 1);

    // 标记删除的实例不再出现
    repo.remove(&all[0]).await?;
    let remaining = repo.find_all(Criteria::new()).await?;
    assert_eq!(remaining.len(), 4);
    uow.rollback()?;
    Ok(())
}

#[tokio::test]
async fn find_applies_filters_offset_and_limit() -> AnyResult<()> {
    let (domain, store) = catalog().await?;
    let orders = domain.repository_for::<Order>()?;

    let window = orders
        .find_all(
            Criteria::new()
                .filter_by("total__gte", json!(20))?
                .order_by("total")
                .offset(1)
                .limit(2),
        )
        .await?;
    assert_eq!(totals(&window), vec![30, 40]);
    assert_eq!(store.fetch_many_calls.load(Ordering::SeqCst), 1);

    let bobs = orders
        .find_all(
            Criteria::new()
                .filter("customer", Lookup::IExact, json!("bob"))
                .order_by("-total"),
        )
        .await?;
    assert_eq!(totals(&bobs), vec![40, 20]);

    let some = orders
        .find_all(Criteria::new().filter_by("id__in", json!(["o-1", "o-5", "o-9"]))?)
        .await?;
    assert_eq!(totals(&some), vec![10, 50]);

    let none = orders
        .find_all(Criteria::new().filter_by("status", json!("paid"))?)
        .await?;
    assert!(none.is_empty());

    assert!(Criteria::new().filter_by("total__between", json!(1)).is_err());
    Ok(())
}
