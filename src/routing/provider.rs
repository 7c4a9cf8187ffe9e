//! 分区映射提供者接口
//!
//! 将集合 + 键范围解析为当前重叠的物理分区范围。路由过期由后端错误
//! （410 + 子状态码）表示，与“不存在”（`Ok(None)`）严格区分。

use crate::core::error::{QueryError, QueryResult};
use crate::routing::feed_range::FeedRange;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 某一时刻由一个物理分区拥有的键范围
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionKeyRange {
    pub id: String,
    pub min_inclusive: String,
    pub max_exclusive: String,
    /// 拆分/合并前的祖先范围 id
    #[serde(default)]
    pub parents: Vec<String>,
}

impl PartitionKeyRange {
    pub fn new(id: impl Into<String>, min_inclusive: impl Into<String>, max_exclusive: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            min_inclusive: min_inclusive.into(),
            max_exclusive: max_exclusive.into(),
            parents: Vec::new(),
        }
    }

    pub fn with_parents(mut self, parents: Vec<String>) -> Self {
        self.parents = parents;
        self
    }

    pub fn to_feed_range(&self) -> QueryResult<FeedRange> {
        FeedRange::new(self.min_inclusive.clone(), self.max_exclusive.clone())
    }
}

/// 路由映射提供者
#[async_trait]
pub trait RoutingMapProvider: Send + Sync {
    /// 返回与 `range` 重叠的全部分区范围，按 `min_inclusive` 升序
    async fn get_overlapping_ranges(
        &self,
        collection_id: &str,
        range: &FeedRange,
        force_refresh: bool,
    ) -> QueryResult<Vec<PartitionKeyRange>>;

    async fn get_range_by_id(
        &self,
        collection_id: &str,
        range_id: &str,
        force_refresh: bool,
    ) -> QueryResult<Option<PartitionKeyRange>>;
}

/// 把目标范围解析为当前分区布局下的游标范围（目标与分区范围的交集）
pub async fn resolve_feed_ranges(
    provider: &dyn RoutingMapProvider,
    collection_id: &str,
    target: &FeedRange,
    force_refresh: bool,
) -> QueryResult<Vec<FeedRange>> {
    let ranges = provider
        .get_overlapping_ranges(collection_id, target, force_refresh)
        .await?;

    let mut resolved = Vec::with_capacity(ranges.len());
    for partition in &ranges {
        if let Some(part) = partition.to_feed_range()?.intersection(target) {
            resolved.push(part);
        }
    }
    resolved.sort();

    if resolved.is_empty() {
        return Err(QueryError::Routing(format!(
            "集合 '{}' 中没有与 {} 重叠的分区",
            collection_id, target
        )));
    }
    Ok(resolved)
}
