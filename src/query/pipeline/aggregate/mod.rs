//! 聚合阶段（无 GROUP BY）
//!
//! 排空来源期间每次调用取一页局部结果并合并，输出空页与更新后的令牌；来源耗尽后
//! 输出唯一一页最终结果（SELECT VALUE 结果为 undefined 时为零行）。

pub mod aggregators;
pub mod single_group;

pub use aggregators::Aggregator;
pub use single_group::{AggregateValue, SingleGroupAggregator};

use super::{next_source_page, BoxedStage, QueryPipelineStage};
use crate::core::error::{QueryError, QueryResult};
use crate::core::try_catch::TryCatch;
use crate::core::value::Element;
use crate::query::continuation::{AggregateContinuationToken, ContinuationToken, SourcePhase};
use crate::query::page::{QueryPage, QueryState};
use crate::query::plan::QueryInfo;
use async_trait::async_trait;
use log::debug;
use tokio_util::sync::CancellationToken;

pub struct AggregateStage {
    /// 恢复时来源已耗尽则为 `None`
    source: Option<BoxedStage>,
    aggregator: SingleGroupAggregator,
    select_value: bool,
    phase: SourcePhase,
    finished: bool,
    current: Option<TryCatch<QueryPage>>,
}

impl AggregateStage {
    pub fn new(
        source: Option<BoxedStage>,
        query_info: &QueryInfo,
        continuation: Option<&AggregateContinuationToken>,
    ) -> QueryResult<Self> {
        let (aggregator, phase) = match continuation {
            Some(token) => (
                SingleGroupAggregator::from_token(query_info, &token.aggregation)?,
                token.source.clone(),
            ),
            None => (SingleGroupAggregator::new(query_info), SourcePhase::NotStarted),
        };
        if source.is_none() && !phase.is_done() {
            return Err(QueryError::Internal("聚合阶段缺少来源".to_string()));
        }
        debug!("aggregate stage created (phase: {:?})", phase);
        Ok(Self {
            source,
            aggregator,
            select_value: query_info.has_select_value,
            phase,
            finished: false,
            current: None,
        })
    }

    /// SELECT VALUE 行是 `[{"item": 局部值}]`，取出唯一元素
    fn fold_page(&self, documents: &[Element]) -> QueryResult<SingleGroupAggregator> {
        let mut aggregator = self.aggregator.clone();
        for document in documents {
            match document {
                Element::Array(items) if self.select_value => {
                    if items.len() != 1 {
                        return Err(QueryError::InvalidPayload(format!(
                            "SELECT VALUE 聚合行应只有一个元素，实际为 {}",
                            items.len()
                        )));
                    }
                    aggregator.add_values(&items[0])?;
                }
                other => aggregator.add_values(other)?,
            }
        }
        Ok(aggregator)
    }

    fn final_page(&mut self, request_charge: f64, activity_id: String) -> QueryPage {
        self.finished = true;
        let result = self.aggregator.result();
        let documents = if result.is_undefined() { Vec::new() } else { vec![result] };
        let response_length_bytes = documents.iter().map(|d| d.to_json_string().len()).sum();
        QueryPage::new(documents, request_charge, activity_id, response_length_bytes, None)
    }

    fn continuation(&self) -> QueryState {
        QueryState::new(
            AggregateContinuationToken {
                source: self.phase.clone(),
                aggregation: self.aggregator.to_token(),
            }
            .to_element(),
        )
    }
}

#[async_trait]
impl QueryPipelineStage for AggregateStage {
    async fn move_next(&mut self, cancellation: &CancellationToken) -> bool {
        if self.finished {
            self.current = None;
            return false;
        }
        if cancellation.is_cancelled() {
            self.current = Some(TryCatch::from_error(QueryError::Cancelled));
            return true;
        }

        if self.phase.is_done() || self.source.is_none() {
            let page = self.final_page(0.0, String::new());
            self.current = Some(TryCatch::from_result(page));
            return true;
        }
        let fetched = match self.source.as_mut() {
            Some(source) => next_source_page(source, cancellation).await,
            None => None,
        };

        let page = match fetched {
            Some(page) => page,
            None => {
                self.phase = SourcePhase::Done;
                let page = self.final_page(0.0, String::new());
                self.current = Some(TryCatch::from_result(page));
                return true;
            }
        };
        let page = match page.match_with(Ok, Err) {
            Ok(page) => page,
            Err(captured) => {
                self.current = Some(TryCatch::from_captured(captured));
                return true;
            }
        };

        match self.fold_page(&page.documents) {
            Ok(aggregator) => self.aggregator = aggregator,
            Err(e) => {
                self.current = Some(TryCatch::from_error(e));
                return true;
            }
        }

        self.phase = SourcePhase::advance(page.state.clone());
        let output = if self.phase.is_done() {
            self.final_page(page.request_charge, page.activity_id)
        } else {
            let state = self.continuation();
            QueryPage::empty(page.request_charge, page.activity_id, Some(state))
        };
        self.current = Some(TryCatch::from_result(output));
        true
    }

    fn current(&self) -> Option<&TryCatch<QueryPage>> {
        self.current.as_ref()
    }

    fn take_current(&mut self) -> Option<TryCatch<QueryPage>> {
        self.current.take()
    }

    fn name(&self) -> &'static str {
        "Aggregate"
    }

    async fn dispose(&mut self) {
        if let Some(source) = self.source.as_mut() {
            source.dispose().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::pipeline::testing::{failure, page, ScriptedStage};
    use crate::query::plan::AggregateOperator;
    use serde_json::json;

    fn count_value_info() -> QueryInfo {
        QueryInfo {
            has_select_value: true,
            aggregates: vec![AggregateOperator::Count],
            ..Default::default()
        }
    }

    fn rows(value: serde_json::Value) -> Vec<Element> {
        vec![Element::from(value)]
    }

    #[tokio::test]
    async fn test_drains_then_emits_single_result() {
        let source = ScriptedStage::boxed(vec![
            page(rows(json!([{"item": 2}])), Some("s1")),
            page(rows(json!([{"item": 3}])), None),
        ]);
        let mut stage = AggregateStage::new(Some(source), &count_value_info(), None).expect("stage");
        let cancel = CancellationToken::new();

        assert!(stage.move_next(&cancel).await);
        let draining = stage.take_current().expect("page").into_result().expect("ok");
        assert!(draining.documents.is_empty());
        let token = draining.state.expect("draining token");
        assert_eq!(
            token.value().to_json(),
            json!({"SourceToken": {"Phase": "Draining", "Token": "s1"}, "AggregationToken": 2})
        );

        assert!(stage.move_next(&cancel).await);
        let last = stage.take_current().expect("page").into_result().expect("ok");
        assert_eq!(last.documents, vec![Element::from(5)]);
        assert!(last.state.is_none());
        assert!(!stage.move_next(&cancel).await);
    }

    #[tokio::test]
    async fn test_undefined_select_value_yields_no_rows() {
        let info = QueryInfo {
            has_select_value: true,
            aggregates: vec![AggregateOperator::Max],
            ..Default::default()
        };
        let source = ScriptedStage::boxed(vec![page(rows(json!([{}])), None)]);
        let mut stage = AggregateStage::new(Some(source), &info, None).expect("stage");
        assert!(stage.move_next(&CancellationToken::new()).await);
        let last = stage.take_current().expect("page").into_result().expect("ok");
        assert!(last.documents.is_empty());
        assert!(last.state.is_none());
    }

    #[tokio::test]
    async fn test_source_failure_keeps_aggregate_state() {
        let source = ScriptedStage::boxed(vec![
            page(rows(json!([{"item": 4}])), Some("s1")),
            failure(QueryError::backend(429, 3200, "throttled")),
            page(rows(json!([{"item": 1}])), None),
        ]);
        let mut stage = AggregateStage::new(Some(source), &count_value_info(), None).expect("stage");
        let cancel = CancellationToken::new();

        assert!(stage.move_next(&cancel).await);
        assert!(stage.move_next(&cancel).await);
        assert!(stage.current().map_or(false, |p| p.failed()));
        assert!(stage.move_next(&cancel).await);
        let last = stage.take_current().expect("page").into_result().expect("ok");
        assert_eq!(last.documents, vec![Element::from(5)]);
    }

    #[tokio::test]
    async fn test_resume_from_token() {
        let token = AggregateContinuationToken::parse(&Element::from(json!({
            "SourceToken": {"Phase": "Draining", "Token": "s1"},
            "AggregationToken": 10
        })))
        .expect("token");
        let source = ScriptedStage::boxed(vec![page(rows(json!([{"item": 1}])), None)]);
        let mut stage =
            AggregateStage::new(Some(source), &count_value_info(), Some(&token)).expect("stage");
        assert!(stage.move_next(&CancellationToken::new()).await);
        let last = stage.take_current().expect("page").into_result().expect("ok");
        assert_eq!(last.documents, vec![Element::from(11)]);
    }
}
