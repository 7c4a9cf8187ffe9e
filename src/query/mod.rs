// 跨分区查询执行
//
// - continuation: 各阶段续传令牌的编解码
// - pagination: 单分区枚举器与跨分区游标调度
// - pipeline: 查询管道阶段及其工厂
// - query_iterator: 对外的分页迭代器

pub mod continuation;
pub mod data_source;
pub mod page;
pub mod pagination;
pub mod pipeline;
pub mod plan;
pub mod query_iterator;

pub use crate::core::error::{QueryError, QueryResult};
pub use data_source::{QueryDataSource, QueryPaginationOptions};
pub use page::{QueryPage, QuerySpec, QueryState};
pub use pipeline::{create_pipeline, PipelineContext};
pub use plan::QueryInfo;
pub use query_iterator::QueryIterator;
