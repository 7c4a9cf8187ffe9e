//! 并行跨分区阶段
//!
//! 按队列顺序拼接各子范围的整页，不做任何合并。令牌是所有未耗尽子范围的
//! `{token, range}` 数组。

use super::QueryPipelineStage;
use crate::core::error::QueryResult;
use crate::core::try_catch::TryCatch;
use crate::core::value::Element;
use crate::query::continuation::{parse_token_array, tokens_to_element, ParallelContinuationToken};
use crate::query::page::{QueryPage, QueryState};
use crate::query::pagination::{CrossPartitionEnumerator, CursorSnapshot, EnumeratorContext, RangeComparer};
use crate::routing::feed_range::{CrossFeedRangeState, FeedRange};
use async_trait::async_trait;
use log::debug;
use tokio_util::sync::CancellationToken;

pub struct ParallelCrossPartitionStage {
    enumerator: CrossPartitionEnumerator<RangeComparer>,
    current: Option<TryCatch<QueryPage>>,
}

impl ParallelCrossPartitionStage {
    pub fn new(context: EnumeratorContext, snapshots: Vec<CursorSnapshot>) -> Self {
        Self {
            enumerator: CrossPartitionEnumerator::new(context, RangeComparer, snapshots),
            current: None,
        }
    }

    /// 从目标范围或续传令牌创建
    pub fn try_create(
        context: EnumeratorContext,
        ranges: &[FeedRange],
        continuation: Option<&Element>,
    ) -> QueryResult<Self> {
        let snapshots = match continuation {
            None => ranges.iter().cloned().map(CursorSnapshot::from_start).collect(),
            Some(element) => {
                let tokens: Vec<ParallelContinuationToken> =
                    parse_token_array(element, "parallel continuation")?;
                let states = CrossFeedRangeState::new(
                    tokens
                        .into_iter()
                        .map(ParallelContinuationToken::into_feed_range_state)
                        .collect(),
                )?;
                states
                    .into_vec()
                    .into_iter()
                    .map(|feed_range_state| CursorSnapshot {
                        feed_range_state,
                        resume: None,
                    })
                    .collect()
            }
        };
        debug!(
            "parallel stage created (resumed: {})",
            continuation.is_some()
        );
        Ok(Self::new(context, snapshots))
    }

    fn continuation(&self) -> Option<QueryState> {
        let tokens: Vec<ParallelContinuationToken> = self
            .enumerator
            .snapshot()
            .iter()
            .map(|snapshot| ParallelContinuationToken::from(&snapshot.feed_range_state))
            .collect();
        if tokens.is_empty() {
            None
        } else {
            Some(QueryState::new(tokens_to_element(&tokens)))
        }
    }
}

#[async_trait]
impl QueryPipelineStage for ParallelCrossPartitionStage {
    async fn move_next(&mut self, cancellation: &CancellationToken) -> bool {
        if !self.enumerator.move_next(cancellation).await {
            self.current = None;
            return false;
        }
        let page = match self.enumerator.take_current() {
            Some(page) => page,
            None => {
                self.current = None;
                return false;
            }
        };
        let state = self.continuation();
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
        "ParallelCrossPartition"
    }
}
