//! 单分区页游标
//!
//! 包装一个 `FeedRangeState`，每次 `move_next` 向数据源取一页。失败原样上报，
//! 不在这一层重试；只有成功的页才会替换持有的状态。

use crate::core::error::QueryError;
use crate::core::try_catch::TryCatch;
use crate::query::data_source::{QueryDataSource, QueryPaginationOptions};
use crate::query::page::{QueryPage, QuerySpec, QueryState};
use crate::routing::feed_range::{FeedRange, FeedRangeState};
use log::trace;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct PartitionPageEnumerator {
    data_source: Arc<dyn QueryDataSource>,
    spec: Arc<QuerySpec>,
    options: QueryPaginationOptions,
    state: FeedRangeState<Option<QueryState>>,
    current: Option<TryCatch<QueryPage>>,
    exhausted: bool,
}

impl PartitionPageEnumerator {
    pub fn new(
        data_source: Arc<dyn QueryDataSource>,
        spec: Arc<QuerySpec>,
        state: FeedRangeState<Option<QueryState>>,
        options: QueryPaginationOptions,
    ) -> Self {
        Self {
            data_source,
            spec,
            options,
            state,
            current: None,
            exhausted: false,
        }
    }

    pub fn feed_range(&self) -> &FeedRange {
        &self.state.feed_range
    }

    /// 下一次取页使用的状态（`None` 且未耗尽表示从头开始）
    pub fn state(&self) -> &FeedRangeState<Option<QueryState>> {
        &self.state
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// 取回的页无法使用时回退到给定状态
    pub fn rewind(&mut self, state: FeedRangeState<Option<QueryState>>) {
        self.state = state;
        self.exhausted = false;
        self.current = None;
    }

    pub async fn move_next(&mut self, cancellation: &CancellationToken) -> bool {
        if self.exhausted {
            self.current = None;
            return false;
        }
        if cancellation.is_cancelled() {
            self.current = Some(TryCatch::from_error(QueryError::Cancelled));
            return true;
        }

        trace!(
            "fetching page for range {} (resume: {})",
            self.state.feed_range,
            self.state.state.is_some()
        );
        let page = self
            .data_source
            .monadic_query(&self.spec, &self.state, &self.options, cancellation)
            .await;

        if page.succeeded() {
            let next_state = page.result().state.clone();
            self.exhausted = next_state.is_none();
            self.state = self.state.with_state(next_state);
        }
        self.current = Some(page);
        true
    }

    pub fn current(&self) -> Option<&TryCatch<QueryPage>> {
        self.current.as_ref()
    }

    pub fn take_current(&mut self) -> Option<TryCatch<QueryPage>> {
        self.current.take()
    }
}
