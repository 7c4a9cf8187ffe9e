//! 分区分页
//!
//! - `partition_enumerator`: 单范围页游标
//! - `cross_partition`: 跨分区游标集合（拆分替换、并发预取）
//! - `comparer`: 游标选择策略

pub mod comparer;
pub mod cross_partition;
pub mod partition_enumerator;

pub use comparer::{OrderByComparer, OrderByRow, PartitionComparer, RangeComparer};
pub use cross_partition::{CrossPartitionEnumerator, CursorSnapshot, EnumeratorContext, PartitionCursor};
pub use partition_enumerator::PartitionPageEnumerator;
