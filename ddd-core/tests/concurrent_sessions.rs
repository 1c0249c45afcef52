mod common;

use anyhow::Result as AnyResult;
use common::{Account, RecordingHandler};
use ddd_core::config::{DomainConfig, ProviderConfig};
use ddd_core::domain::Domain;
use ddd_core::entity::Entity;
use ddd_core::error::DomainResult;
use ddd_core::eventing::HandledEventType;
use std::sync::Arc;
use tokio::sync::Barrier;

async fn ledger(provider: &str) -> AnyResult<Domain> {
    let domain = Domain::from_config(
        DomainConfig::new("ledger")
            .with_database("primary", ProviderConfig::new(provider))
            .bind("account", "primary"),
    )
    .await?;
    domain
        .repository_for::<Account>()?
        .add(Account::new("a-1".to_string()))
        .await?;
    Ok(domain)
}

async fn deposit(domain: &Domain, amount: i64) -> DomainResult<()> {
    let accounts = domain.repository_for::<Account>()?;
    domain
        .transaction(|_uow| async move {
            let account = accounts.get(&"a-1".to_string()).await?;
            account.execute(amount)?;
            Ok(())
        })
        .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_sessions_one_wins_one_conflicts() -> AnyResult<()> {
    for provider in ["memory", "kv"] {
        let domain = ledger(provider).await?;
        let barrier = Arc::new(Barrier::new(2));

        let mut tasks = Vec::new();
        for amount in [10, 20] {
            let domain = domain.clone();
            let barrier = barrier.clone();
            tasks.push(tokio::spawn(async move {
                let uow = domain.unit_of_work();
                let accounts = domain.repository_for::<Account>()?.in_session(&uow);
                let account = accounts.get(&"a-1".to_string()).await?;
                account.execute(amount)?;
                // 两个会话都基于 v1 修改后再提交
                barrier.wait().await;
                uow.commit().await.map(|_| ())
            }));
        }

        let mut ok = 0;
        let mut conflicts = 0;
        for task in tasks {
            match task.await? {
                Ok(()) => ok += 1,
                Err(err) if err.is_concurrency_conflict() => conflicts += 1,
                Err(err) => return Err(err.into()),
            }
        }
        assert_eq!((ok, conflicts), (1, 1), "provider {provider}");

        let account = domain
            .repository_for::<Account>()?
            .get(&"a-1".to_string())
            .await?;
        assert_eq!(account.version().value(), 2);
        let balance = account.read(|a| a.balance);
        assert!(balance == 10 || balance == 20);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn retried_deposits_all_land() -> AnyResult<()> {
    let domain = ledger("memory").await?;
    let handler = RecordingHandler::new();
    domain.subscribe(HandledEventType::one("AccountEvent.Deposited"), handler.clone());

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let domain = domain.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                match deposit(&domain, 1).await {
                    Ok(()) => return Ok(()),
                    Err(err) if err.is_concurrency_conflict() => tokio::task::yield_now().await,
                    Err(err) => return Err(err),
                }
            }
        }));
    }
    for task in tasks {
        task.await??;
    }

    let account = domain
        .repository_for::<Account>()?
        .get(&"a-1".to_string())
        .await?;
    assert_eq!(account.read(|a| a.balance), 8);
    assert_eq!(account.version().value(), 9);
    // 只有成功提交的会话发布了事件
    assert_eq!(handler.len(), 8);
    let mut versions: Vec<usize> = handler
        .events()
        .iter()
        .map(|e| e.aggregate_version().value())
        .collect();
    versions.sort_unstable();
    assert_eq!(versions, (2..=9).collect::<Vec<_>>());
    Ok(())
}
