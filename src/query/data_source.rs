//! 查询数据源接口
//!
//! 给定一个范围及其续传状态，从后端取回一页原始结果。同一状态重复调用必须幂等。

use crate::core::try_catch::TryCatch;
use crate::core::value::Element;
use crate::query::page::{QueryPage, QuerySpec, QueryState};
use crate::routing::feed_range::FeedRangeState;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// 单次取页选项
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPaginationOptions {
    pub page_size_hint: Option<usize>,
    /// 只返回该分区键的数据
    pub partition_key: Option<Element>,
}

impl QueryPaginationOptions {
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size_hint: Some(page_size),
            partition_key: None,
        }
    }
}

#[async_trait]
pub trait QueryDataSource: Send + Sync {
    async fn monadic_query(
        &self,
        spec: &QuerySpec,
        feed_range_state: &FeedRangeState<Option<QueryState>>,
        options: &QueryPaginationOptions,
        cancellation: &CancellationToken,
    ) -> TryCatch<QueryPage>;
}
