//! 排序跨分区阶段
//!
//! 对各子范围已排序的流做 k 路归并。每弹出一行之前，所有未耗尽的游标都必须有
//! 缓冲行，否则无法确定全局最小值。
//!
//! 每个子范围的令牌记录其当前缓冲页的起始状态，以及从该范围最后输出的一行
//! （`orderByItems`、`rid`、`skipCount`）。恢复时重新取回该页，并过滤掉排在恢复点
//! 之前（含）的行。

use super::QueryPipelineStage;
use crate::core::error::{QueryError, QueryResult};
use crate::core::try_catch::TryCatch;
use crate::core::value::Element;
use crate::query::continuation::{
    parse_token_array, tokens_to_element, OrderByContinuationToken, ParallelContinuationToken,
};
use crate::query::page::{QueryPage, QueryState};
use crate::query::pagination::{CrossPartitionEnumerator, CursorSnapshot, EnumeratorContext, OrderByComparer};
use crate::query::plan::SortOrder;
use crate::routing::feed_range::{CrossFeedRangeState, FeedRange};
use async_trait::async_trait;
use log::debug;
use tokio_util::sync::CancellationToken;

pub struct OrderByCrossPartitionStage {
    enumerator: CrossPartitionEnumerator<OrderByComparer>,
    page_size: usize,
    /// 已输出部分行后发生的失败，下一次调用时上报；取消不会被推迟
    deferred_failure: Option<TryCatch<QueryPage>>,
    finished: bool,
    current: Option<TryCatch<QueryPage>>,
}

impl OrderByCrossPartitionStage {
    pub fn try_create(
        context: EnumeratorContext,
        sort_orders: Vec<SortOrder>,
        ranges: &[FeedRange],
        page_size: usize,
        continuation: Option<&Element>,
    ) -> QueryResult<Self> {
        if sort_orders.is_empty() {
            return Err(QueryError::UnsupportedQueryPlan(
                "排序阶段至少需要一个排序方向".to_string(),
            ));
        }

        let snapshots = match continuation {
            None => ranges.iter().cloned().map(CursorSnapshot::from_start).collect(),
            Some(element) => {
                let tokens: Vec<OrderByContinuationToken> =
                    parse_token_array(element, "order by continuation")?;
                for token in &tokens {
                    if let Some(resume) = &token.resume {
                        if resume.order_by_items.len() != sort_orders.len() {
                            return Err(QueryError::malformed(format!(
                                "orderByItems 数量 {} 与排序方向数量 {} 不一致",
                                resume.order_by_items.len(),
                                sort_orders.len()
                            )));
                        }
                    }
                }
                CrossFeedRangeState::new(
                    tokens
                        .iter()
                        .map(|t| t.composite.clone().into_feed_range_state())
                        .collect(),
                )?;
                tokens
                    .into_iter()
                    .map(|t| CursorSnapshot {
                        feed_range_state: t.composite.into_feed_range_state(),
                        resume: t.resume,
                    })
                    .collect()
            }
        };

        debug!(
            "order by stage created with {} sort orders (resumed: {})",
            sort_orders.len(),
            continuation.is_some()
        );
        Ok(Self {
            enumerator: CrossPartitionEnumerator::new(
                context,
                OrderByComparer::new(sort_orders),
                snapshots,
            ),
            page_size: page_size.max(1),
            deferred_failure: None,
            finished: false,
            current: None,
        })
    }

    fn continuation(&self) -> Option<QueryState> {
        let tokens: Vec<OrderByContinuationToken> = self
            .enumerator
            .snapshot()
            .into_iter()
            .map(|snapshot| OrderByContinuationToken {
                composite: ParallelContinuationToken::from(&snapshot.feed_range_state),
                resume: snapshot.resume,
            })
            .collect();
        if tokens.is_empty() {
            None
        } else {
            Some(QueryState::new(tokens_to_element(&tokens)))
        }
    }
}

#[async_trait]
impl QueryPipelineStage for OrderByCrossPartitionStage {
    async fn move_next(&mut self, cancellation: &CancellationToken) -> bool {
        if let Some(failure) = self.deferred_failure.take() {
            self.current = Some(failure);
            return true;
        }
        if self.finished {
            self.current = None;
            return false;
        }

        let mut documents = Vec::with_capacity(self.page_size);
        let mut failure = None;
        while documents.len() < self.page_size {
            let filled = self.enumerator.fill_heads(cancellation).await;
            if filled.failed() {
                failure = Some(filled.try_map(|_| QueryPage::empty(0.0, "", None)));
                break;
            }
            match self.enumerator.pop_min() {
                // 投影结果为 undefined 的行不输出
                Some(row) if row.payload.is_undefined() => continue,
                Some(row) => documents.push(row.payload),
                None => break,
            }
        }

        let request_charge = self.enumerator.take_request_charge();
        if let Some(failed) = failure {
            if documents.is_empty() {
                self.current = Some(failed);
                return true;
            }
            // 取消只属于本次调用，下一次调用检查它自己的令牌
            if !failed.error().is_cancelled() {
                self.deferred_failure = Some(failed);
            }
        }

        let state = self.continuation();
        self.finished = state.is_none();
        let response_length_bytes = documents.iter().map(|d| d.to_json_string().len()).sum();
        self.current = Some(TryCatch::from_result(QueryPage::new(
            documents,
            request_charge,
            self.enumerator.last_activity_id(),
            response_length_bytes,
            state,
        )));
        true
    }

    fn current(&self) -> Option<&TryCatch<QueryPage>> {
        self.current.as_ref()
    }

    fn take_current(&mut self) -> Option<TryCatch<QueryPage>> {
        self.current.take()
    }

    fn name(&self) -> &'static str {
        "OrderByCrossPartition"
    }
}
