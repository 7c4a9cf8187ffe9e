//! 存储模块
//!
//! 内存中的分区容器，作为数据源与路由提供者的参考实现。

pub mod in_memory;
pub mod projection;

pub use in_memory::InMemoryContainer;
pub use projection::{AggregateSpec, RowProjection};
