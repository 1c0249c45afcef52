//! 通道代理（`channel`，需开启 `eventing`）
//!
//! 基于 `tokio::sync::broadcast` 的异步代理：`publish` 只负责入队，
//! 后台分发任务订阅通道，把每个事件并发交给匹配的处理器
//! （并发度由 `handler_concurrency` 限制）。处理器失败只记录日志并计数。
//!
//! 分发任务未运行时没有接收端，此时 `publish` 返回 `PublishFailed`。
//!
use super::registry::HandlerRegistry;
use super::{BrokerCapabilities, EventBroker, EventHandler, HandledEventType};
use crate::error::{DomainError, DomainResult as Result};
use crate::persist::SerializedEvent;
use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;

/// 通道代理配置
#[derive(Clone, Copy, Debug)]
pub struct ChannelBrokerConfig {
    /// 广播缓冲区容量
    pub capacity: usize,
    /// 单事件的处理并发（同一事件广播给多个 handler）
    pub handler_concurrency: usize,
}

impl Default for ChannelBrokerConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            handler_concurrency: 8,
        }
    }
}

/// 分发统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub handled: u64,
    pub failed: u64,
    pub lagged: u64,
}

#[derive(Default)]
struct Counters {
    handled: AtomicU64,
    failed: AtomicU64,
    lagged: AtomicU64,
}

pub struct ChannelBroker {
    name: String,
    tx: broadcast::Sender<SerializedEvent>,
    registry: Arc<RwLock<HandlerRegistry>>,
    counters: Arc<Counters>,
    config: ChannelBrokerConfig,
    /// 所有分发任务的令牌均派生自此
    shutdown: CancellationToken,
}

impl ChannelBroker {
    pub const PROVIDER: &'static str = "channel";

    pub fn new(name: impl Into<String>, config: ChannelBrokerConfig) -> Self {
        let (tx, _rx) = broadcast::channel(config.capacity.max(1));
        Self {
            name: name.into(),
            tx,
            registry: Arc::new(RwLock::new(HandlerRegistry::default())),
            counters: Arc::new(Counters::default()),
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            handled: self.counters.handled.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            lagged: self.counters.lagged.load(Ordering::Relaxed),
        }
    }

    /// 启动后台分发任务，返回可用于关闭/等待的句柄
    ///
    /// 接收端在返回前已订阅，之后发布的事件不会丢失。丢弃句柄不会停止任务，
    /// `close` 会停止该代理的全部分发任务。
    pub fn start(&self) -> BrokerHandle {
        let token = self.shutdown.child_token();
        let stream = BroadcastStream::new(self.tx.subscribe());

        let task = tokio::spawn(dispatch_loop(
            self.name.clone(),
            stream,
            Arc::clone(&self.registry),
            Arc::clone(&self.counters),
            self.config.handler_concurrency.max(1),
            token.clone(),
        ));

        tracing::info!(broker = %self.name, "channel broker dispatcher started");
        BrokerHandle { token, task }
    }
}

async fn dispatch_loop(
    broker: String,
    mut stream: BroadcastStream<SerializedEvent>,
    registry: Arc<RwLock<HandlerRegistry>>,
    counters: Arc<Counters>,
    concurrency: usize,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            // 先处理已到达的事件，再响应关闭
            biased;
            maybe_event = stream.next() => {
                match maybe_event {
                    Some(Ok(event)) => {
                        let handlers = registry.read().matching(event.event_type());
                        if handlers.is_empty() {
                            continue;
                        }

                        let event = &event;
                        let counters = &counters;
                        let broker = broker.as_str();
                        stream::iter(handlers)
                            .for_each_concurrent(Some(concurrency), |handler| async move {
                                match handler.handle(event).await {
                                    Ok(()) => {
                                        counters.handled.fetch_add(1, Ordering::Relaxed);
                                    }
                                    Err(err) => {
                                        counters.failed.fetch_add(1, Ordering::Relaxed);
                                        tracing::error!(
                                            broker,
                                            handler = handler.handler_name(),
                                            event_id = event.event_id(),
                                            event_type = event.event_type(),
                                            error = %err,
                                            "event handler failed"
                                        );
                                    }
                                }
                            })
                            .await;
                    }
                    Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                        counters.lagged.fetch_add(skipped, Ordering::Relaxed);
                        tracing::warn!(broker, skipped, "dispatcher lagged behind publishers");
                    }
                    None => break,
                }
            }
            _ = token.cancelled() => break,
        }
    }
    tracing::info!(broker, "channel broker dispatcher stopped");
}

#[async_trait]
impl EventBroker for ChannelBroker {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> BrokerCapabilities {
        BrokerCapabilities {
            supports_ordering: false,
        }
    }

    async fn publish(&self, event: &SerializedEvent) -> Result<()> {
        self.tx
            .send(event.clone())
            .map(|_| ())
            .map_err(|_| DomainError::PublishFailed {
                event_id: event.event_id().to_string(),
                event_type: event.event_type().to_string(),
                reason: format!("broker `{}` has no running dispatcher", self.name),
            })
    }

    fn subscribe(&self, handled: HandledEventType, handler: Arc<dyn EventHandler>) {
        self.registry.write().subscribe(handled, handler);
    }

    fn close(&self) {
        self.shutdown.cancel();
    }
}

/// 分发任务句柄：用于优雅关闭与等待任务结束
pub struct BrokerHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl BrokerHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub async fn join(self) {
        let _ = self.task.await;
    }
}
