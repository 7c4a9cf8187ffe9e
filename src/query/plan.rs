//! 物理查询计划
//!
//! 由外部编译器产出，管道只读取其中决定阶段组合的部分。后端执行的是改写后的查询，
//! 每种阶段期望的行结构如下：
//!
//! - ORDER BY：`{"orderByItems": [{"item": v}, ...], "payload": <文档>, "_rid": <字符串>}`
//! - GROUP BY：`{"groupByItems": [{"item": v}, ...], "payload": <局部聚合>}`
//! - 聚合（SELECT VALUE）：`[{"item": <局部值>}]`
//! - 聚合（SELECT 列表）：`{<别名>: {"item": <局部值>}, ...}`
//!
//! 局部值中 AVG 为 `{"sum": s, "count": c}`，MIN/MAX 为原值或 `{"min"|"max": v}`。

use crate::core::error::{QueryError, QueryResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    /// 按方向调整比较结果
    pub fn apply(&self, ordering: std::cmp::Ordering) -> std::cmp::Ordering {
        match self {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    }
}

/// 聚合算子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateOperator {
    Average,
    Count,
    CountIf,
    MakeList,
    MakeSet,
    Max,
    Min,
    Sum,
}

impl AggregateOperator {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateOperator::Average => "AVG",
            AggregateOperator::Count => "COUNT",
            AggregateOperator::CountIf => "COUNTIF",
            AggregateOperator::MakeList => "MAKELIST",
            AggregateOperator::MakeSet => "MAKESET",
            AggregateOperator::Max => "MAX",
            AggregateOperator::Min => "MIN",
            AggregateOperator::Sum => "SUM",
        }
    }
}

/// DISTINCT 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistinctType {
    #[default]
    None,
    /// 输入已按投影排序，只需记住上一条
    Ordered,
    Unordered,
}

/// 查询计划信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryInfo {
    pub distinct_type: DistinctType,
    pub top: Option<u64>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub order_by: Vec<SortOrder>,
    pub order_by_expressions: Vec<String>,
    pub group_by_expressions: Vec<String>,
    pub group_by_aliases: Vec<String>,
    pub aggregates: Vec<AggregateOperator>,
    /// 别名 -> 聚合算子；`None` 表示该别名是分组键本身（取第一个值）
    pub group_by_alias_to_aggregate_type: BTreeMap<String, Option<AggregateOperator>>,
    pub has_select_value: bool,
    pub rewritten_query: Option<String>,
}

impl QueryInfo {
    pub fn has_order_by(&self) -> bool {
        !self.order_by.is_empty()
    }

    pub fn has_group_by(&self) -> bool {
        !self.group_by_expressions.is_empty()
    }

    pub fn has_aggregates(&self) -> bool {
        !self.aggregates.is_empty()
            || self
                .group_by_alias_to_aggregate_type
                .values()
                .any(|op| op.is_some())
    }

    pub fn has_distinct(&self) -> bool {
        self.distinct_type != DistinctType::None
    }

    /// TOP 与 LIMIT 互斥；两者都给出时取较小者
    pub fn take_count(&self) -> Option<u64> {
        match (self.top, self.limit) {
            (Some(top), Some(limit)) => Some(top.min(limit)),
            (top, limit) => top.or(limit),
        }
    }

    /// 是否需要跨分区合并语义（排序、聚合、分组、去重）
    pub fn requires_cross_partition_merge(&self) -> bool {
        self.has_order_by() || self.has_aggregates() || self.has_group_by() || self.has_distinct()
    }

    pub fn validate(&self) -> QueryResult<()> {
        if self.has_order_by() && self.has_group_by() {
            return Err(QueryError::UnsupportedQueryPlan(
                "跨分区查询不支持 GROUP BY 与 ORDER BY 同时使用".to_string(),
            ));
        }
        if !self.order_by_expressions.is_empty()
            && self.order_by_expressions.len() != self.order_by.len()
        {
            return Err(QueryError::UnsupportedQueryPlan(format!(
                "ORDER BY 表达式数量 {} 与排序方向数量 {} 不一致",
                self.order_by_expressions.len(),
                self.order_by.len()
            )));
        }
        if self.has_select_value && self.aggregates.len() > 1 {
            return Err(QueryError::UnsupportedQueryPlan(
                "SELECT VALUE 最多只能包含一个聚合".to_string(),
            ));
        }
        if !self.has_select_value
            && !self.aggregates.is_empty()
            && self.group_by_alias_to_aggregate_type.is_empty()
        {
            return Err(QueryError::UnsupportedQueryPlan(
                "SELECT 列表中的聚合必须给出别名映射".to_string(),
            ));
        }
        Ok(())
    }
}
