//! 单分区直通阶段
//!
//! 只有一个目标范围、且查询没有跨分区语义时使用。令牌是单个 `{token, range}`
//! 对象。范围拆分后切换为内部并行阶段，此后输出数组形式的令牌。

use super::parallel::ParallelCrossPartitionStage;
use super::QueryPipelineStage;
use crate::core::try_catch::TryCatch;
use crate::query::continuation::{ContinuationToken, ParallelContinuationToken};
use crate::query::page::{QueryPage, QueryState};
use crate::query::pagination::{CursorSnapshot, EnumeratorContext, PartitionPageEnumerator};
use crate::routing::feed_range::FeedRangeState;
use async_trait::async_trait;
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

enum PassthroughInner {
    Single(PartitionPageEnumerator),
    Fanned(ParallelCrossPartitionStage),
}

pub struct PassthroughStage {
    context: EnumeratorContext,
    inner: PassthroughInner,
    current: Option<TryCatch<QueryPage>>,
}

impl PassthroughStage {
    pub fn new(context: EnumeratorContext, state: FeedRangeState<Option<QueryState>>) -> Self {
        debug!("passthrough stage created for range {}", state.feed_range);
        let enumerator = PartitionPageEnumerator::new(
            context.data_source.clone(),
            context.spec.clone(),
            state,
            context.options.clone(),
        );
        Self {
            context,
            inner: PassthroughInner::Single(enumerator),
            current: None,
        }
    }

    pub fn is_fanned_out(&self) -> bool {
        matches!(self.inner, PassthroughInner::Fanned(_))
    }
}

#[async_trait]
impl QueryPipelineStage for PassthroughStage {
    async fn move_next(&mut self, cancellation: &CancellationToken) -> bool {
        let enumerator = match &mut self.inner {
            PassthroughInner::Fanned(parallel) => {
                let more = parallel.move_next(cancellation).await;
                self.current = parallel.take_current();
                return more;
            }
            PassthroughInner::Single(enumerator) => enumerator,
        };

        if !enumerator.move_next(cancellation).await {
            self.current = None;
            return false;
        }
        let page = match enumerator.take_current() {
            Some(page) => page,
            None => {
                self.current = None;
                return false;
            }
        };

        if page.failed() && page.error().is_split() {
            warn!(
                "range {} is no longer owned by a single partition, fanning out",
                enumerator.feed_range()
            );
            let snapshot = CursorSnapshot {
                feed_range_state: enumerator.state().clone(),
                resume: None,
            };
            let mut parallel = ParallelCrossPartitionStage::new(self.context.clone(), vec![snapshot]);
            let more = parallel.move_next(cancellation).await;
            self.current = parallel.take_current();
            self.inner = PassthroughInner::Fanned(parallel);
            return more;
        }

        let state = if enumerator.is_exhausted() {
            None
        } else {
            Some(QueryState::new(
                ParallelContinuationToken::from(enumerator.state()).to_element(),
            ))
        };
        self.current = Some(page.try_map(move |page| page.with_state(state)));
        true
    }

    fn current(&self) -> Option<&TryCatch<QueryPage>> {
        self.current.as_ref()
    }

    fn take_current(&mut self) -> Option<TryCatch<QueryPage>> {
        self.current.take()
    }

    fn name(&self) -> &'static str {
        "Passthrough"
    }
}
