//! 持久化适配层（persist）
//!
//! - 后端无关的存储形态：聚合记录（`SerializedAggregate`）与事件记录（`SerializedEvent`）；
//! - 所有存储后端共同遵守的异步契约（`Adapter`）及事务令牌（`TransactionHandle`）；
//! - 批量查询条件与分页结果（`Criteria`/`ResultSet`）；
//! - 内置驱动：`InMemoryAdapter`（原生事务）、`KeyValueAdapter`（补偿式模拟事务）、
//!   `PostgresAdapter`（`infra-sqlx`）。
//!
mod adapter;
mod criteria;
mod key_value;
mod memory;
#[cfg(feature = "infra-sqlx")]
mod postgres;
mod serialized_aggregate;
mod serialized_event;

pub use adapter::{Adapter, AdapterCapabilities, SharedAdapter, TransactionHandle};
pub use criteria::{Criteria, Filter, Lookup, ResultSet};
pub use key_value::KeyValueAdapter;
pub use memory::InMemoryAdapter;
#[cfg(feature = "infra-sqlx")]
pub use postgres::{DEFAULT_TABLE, PostgresAdapter};
pub use serialized_aggregate::SerializedAggregate;
pub use serialized_event::SerializedEvent;
