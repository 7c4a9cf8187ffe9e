//! 分组阶段
//!
//! 两个阶段：
//! - 排空：每次调用取来源的一页，把每行（`groupByItems`、`payload`）并入分组表，
//!   输出空页与更新后的令牌；
//! - 输出：来源耗尽后按分组键升序每次输出至多 `page_size` 个分组，已输出的分组
//!   从表中移除，表为空时 `state` 为 `None`。

use super::aggregate::SingleGroupAggregator;
use super::{next_source_page, BoxedStage, QueryPipelineStage};
use crate::core::error::{QueryError, QueryResult};
use crate::core::try_catch::TryCatch;
use crate::core::value::Element;
use crate::query::continuation::{ContinuationToken, GroupByContinuationToken, SourcePhase};
use crate::query::page::{QueryPage, QueryState};
use crate::query::plan::QueryInfo;
use async_trait::async_trait;
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 分组键（`groupByItems` 的规范字符串） -> 该组的聚合状态
#[derive(Debug, Clone)]
pub struct GroupingTable {
    query_info: Arc<QueryInfo>,
    groups: BTreeMap<String, SingleGroupAggregator>,
}

impl GroupingTable {
    pub fn new(query_info: Arc<QueryInfo>) -> Self {
        Self {
            query_info,
            groups: BTreeMap::new(),
        }
    }

    pub fn from_token(query_info: Arc<QueryInfo>, token: &Element) -> QueryResult<Self> {
        let entries = token
            .as_object()
            .ok_or_else(|| QueryError::malformed("分组表令牌应为对象"))?;
        let mut groups = BTreeMap::new();
        for (key, aggregator) in entries {
            groups.insert(key.clone(), SingleGroupAggregator::from_token(&query_info, aggregator)?);
        }
        Ok(Self { query_info, groups })
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// 并入一页改写后的分组行
    ///
    /// 先校验整页的行结构，再逐行合并；任何一行的局部值无效时整页不生效。
    pub fn add_page(&mut self, rows: &[Element]) -> QueryResult<()> {
        let mut parsed = Vec::with_capacity(rows.len());
        for row in rows {
            let fields = row.as_object().ok_or_else(|| {
                QueryError::InvalidPayload(format!("分组行应为对象，实际为 {}", row.kind().name()))
            })?;
            let items = fields
                .get("groupByItems")
                .filter(|items| items.as_array().is_some())
                .ok_or_else(|| QueryError::InvalidPayload("分组行缺少 groupByItems 数组".to_string()))?;
            let payload = fields.get("payload").unwrap_or(&Element::Undefined);
            parsed.push((items.to_canonical_string(), payload));
        }

        let mut updated: BTreeMap<String, SingleGroupAggregator> = BTreeMap::new();
        for (key, payload) in parsed {
            if !updated.contains_key(&key) {
                let group = self
                    .groups
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| SingleGroupAggregator::new(&self.query_info));
                updated.insert(key.clone(), group);
            }
            if let Some(group) = updated.get_mut(&key) {
                group.add_values(payload)?;
            }
        }
        self.groups.extend(updated);
        Ok(())
    }

    /// 按键升序取出至多 `count` 个分组的结果并从表中移除
    pub fn drain(&mut self, count: usize) -> Vec<Element> {
        let keys: Vec<String> = self.groups.keys().take(count).cloned().collect();
        keys.iter()
            .filter_map(|key| self.groups.remove(key))
            .map(|group| group.result())
            .filter(|result| !result.is_undefined())
            .collect()
    }

    pub fn to_token(&self) -> Element {
        Element::Object(
            self.groups
                .iter()
                .map(|(key, group)| (key.clone(), group.to_token()))
                .collect(),
        )
    }
}

pub struct GroupByStage {
    source: Option<BoxedStage>,
    table: GroupingTable,
    phase: SourcePhase,
    page_size: usize,
    finished: bool,
    current: Option<TryCatch<QueryPage>>,
}

impl GroupByStage {
    pub fn new(
        source: Option<BoxedStage>,
        query_info: Arc<QueryInfo>,
        page_size: usize,
        continuation: Option<&GroupByContinuationToken>,
    ) -> QueryResult<Self> {
        let (table, phase) = match continuation {
            Some(token) => (
                GroupingTable::from_token(query_info, &token.grouping_table)?,
                token.source.clone(),
            ),
            None => (GroupingTable::new(query_info), SourcePhase::NotStarted),
        };
        if source.is_none() && !phase.is_done() {
            return Err(QueryError::Internal("分组阶段缺少来源".to_string()));
        }
        debug!("group by stage created with {} restored groups", table.len());
        Ok(Self {
            source,
            table,
            phase,
            page_size: page_size.max(1),
            finished: false,
            current: None,
        })
    }

    fn continuation(&self) -> QueryState {
        QueryState::new(
            GroupByContinuationToken {
                source: self.phase.clone(),
                grouping_table: self.table.to_token(),
            }
            .to_element(),
        )
    }

    /// 输出阶段的一页
    fn emit_groups(&mut self, request_charge: f64, activity_id: String) -> QueryPage {
        let documents = self.table.drain(self.page_size);
        let state = if self.table.is_empty() {
            self.finished = true;
            None
        } else {
            Some(self.continuation())
        };
        let response_length_bytes = documents.iter().map(|d| d.to_json_string().len()).sum();
        QueryPage::new(documents, request_charge, activity_id, response_length_bytes, state)
    }
}

#[async_trait]
impl QueryPipelineStage for GroupByStage {
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
            let page = self.emit_groups(0.0, String::new());
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
                let page = self.emit_groups(0.0, String::new());
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

        if let Err(e) = self.table.add_page(&page.documents) {
            self.current = Some(TryCatch::from_error(e));
            return true;
        }

        self.phase = SourcePhase::advance(page.state.clone());
        let output = if self.phase.is_done() {
            self.source = None;
            self.emit_groups(page.request_charge, page.activity_id)
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
        "GroupBy"
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
    use crate::query::pipeline::testing::{page, ScriptedStage};
    use crate::query::plan::AggregateOperator;
    use serde_json::json;

    fn count_by_pk() -> Arc<QueryInfo> {
        let mut info = QueryInfo {
            group_by_expressions: vec!["c.pk".to_string()],
            group_by_aliases: vec!["pk".to_string(), "count".to_string()],
            aggregates: vec![AggregateOperator::Count],
            ..Default::default()
        };
        info.group_by_alias_to_aggregate_type.insert("pk".to_string(), None);
        info.group_by_alias_to_aggregate_type
            .insert("count".to_string(), Some(AggregateOperator::Count));
        Arc::new(info)
    }

    fn row(pk: &str, count: i64) -> Element {
        Element::from(json!({
            "groupByItems": [{"item": pk}],
            "payload": {"pk": pk, "count": {"item": count}}
        }))
    }

    #[tokio::test]
    async fn test_groups_merge_across_pages() {
        let source = ScriptedStage::boxed(vec![
            page(vec![row("x", 2), row("y", 1)], Some("s1")),
            page(vec![row("x", 1), row("y", 1)], None),
        ]);
        let mut stage = GroupByStage::new(Some(source), count_by_pk(), 10, None).expect("stage");
        let cancel = CancellationToken::new();

        assert!(stage.move_next(&cancel).await);
        let draining = stage.take_current().expect("page").into_result().expect("ok");
        assert!(draining.documents.is_empty());
        assert!(draining.state.is_some());

        assert!(stage.move_next(&cancel).await);
        let groups = stage.take_current().expect("page").into_result().expect("ok");
        let json: Vec<serde_json::Value> = groups.documents.iter().map(Element::to_json).collect();
        assert_eq!(json, vec![json!({"pk": "x", "count": 3}), json!({"pk": "y", "count": 2})]);
        assert!(groups.state.is_none());
        assert!(!stage.move_next(&cancel).await);
    }

    #[tokio::test]
    async fn test_emits_groups_incrementally_with_resumable_token() {
        let source = ScriptedStage::boxed(vec![page(
            vec![row("a", 1), row("b", 1), row("c", 1)],
            None,
        )]);
        let info = count_by_pk();
        let mut stage = GroupByStage::new(Some(source), info.clone(), 2, None).expect("stage");
        let cancel = CancellationToken::new();

        assert!(stage.move_next(&cancel).await);
        let first = stage.take_current().expect("page").into_result().expect("ok");
        assert_eq!(first.documents.len(), 2);
        let token = first.state.expect("groups remain");
        assert_eq!(token.value().select_path(&["SourceToken", "Phase"]), Element::from("Done"));

        // 从令牌恢复：不需要来源
        let parsed = GroupByContinuationToken::parse(token.value()).expect("token");
        let mut resumed = GroupByStage::new(None, info, 2, Some(&parsed)).expect("stage");
        assert!(resumed.move_next(&cancel).await);
        let rest = resumed.take_current().expect("page").into_result().expect("ok");
        assert_eq!(rest.documents.len(), 1);
        assert_eq!(rest.documents[0].to_json(), json!({"pk": "c", "count": 1}));
        assert!(rest.state.is_none());
    }

    #[test]
    fn test_invalid_row_leaves_table_untouched() {
        let mut table = GroupingTable::new(count_by_pk());
        table.add_page(&[row("x", 1)]).expect("valid page");
        let err = table
            .add_page(&[row("x", 5), Element::from(json!({"payload": {}}))])
            .expect_err("missing groupByItems");
        assert!(matches!(err, QueryError::InvalidPayload(_)));
        assert_eq!(table.drain(10)[0].to_json(), json!({"pk": "x", "count": 1}));
    }

    #[test]
    fn test_draining_without_source_is_internal_error() {
        let err = GroupByStage::new(None, count_by_pk(), 10, None).err().expect("no source");
        assert!(matches!(err, QueryError::Internal(_)));
    }
}
