//! DDD 持久化与消息适配核心（ddd-core）
//!
//! 在领域模型与存储/消息基础设施之间提供一层与技术无关的适配：
//! - 聚合（`aggregate`）与实体（`entity`）建模，被跟踪句柄（`tracked`）记录变更与待发事件；
//! - 持久化契约（`persist`）：`Adapter` 与内置的内存、键值、Postgres 驱动，批量条件与分页结果；
//! - 工作单元（`uow`）：身份映射、乐观锁、按适配器顺序提交、部分提交报告与发件箱；
//! - 事件系统（`eventing`）：代理与处理器，提交成功后才发布事件；
//! - 仓储（`repository`）、缓存（`cache`）、配置（`config`）与领域注册表（`domain`）；
//! - 日志初始化（`telemetry`）。
//!
//! 典型用法：
//! 1. 定义聚合、命令与事件，实现 `Aggregate` 的 `execute/apply`；
//! 2. 用 `DomainConfig` 声明数据库/代理并绑定聚合类型，构建 `Domain`；
//! 3. 在 `Domain::transaction`（或 `UnitOfWork::scope`）中通过仓储读取、修改、登记聚合；
//! 4. 提交时按适配器写入，成功后把事件交给代理。
//!
pub mod aggregate;
pub mod cache;
pub mod config;
pub mod domain;
pub mod domain_event;
pub mod entity;
pub mod error;
pub mod eventing;
pub mod persist;
pub mod repository;
pub mod telemetry;
pub mod tracked;
pub mod uow;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateKey, ObjectState};
pub use domain::Domain;
pub use error::{DomainError, DomainResult};
pub use repository::Repository;
pub use tracked::Tracked;
pub use uow::UnitOfWork;
