//! 内存分区容器
//!
//! 同时实现 [`QueryDataSource`] 与 [`RoutingMapProvider`]，支持在线拆分与合并：
//! - 请求的范围跨越多个当前分区时返回 410/1002（分区已拆分）；
//! - 请求的范围是某个（合并后的）分区的子范围时，只返回该子范围内的数据。
//!
//! 后端续传令牌是最后一条返回行的排序键 `{"rid", "orderByItems"?}`，基于值而非偏移，
//! 因此父范围的令牌对子范围同样有效。

use super::projection::RowProjection;
use crate::core::error::codes::{status, sub_status};
use crate::core::error::{QueryError, QueryResult};
use crate::core::hash::{effective_partition_key, epk_from_point, epk_to_point};
use crate::core::try_catch::TryCatch;
use crate::core::value::Element;
use crate::query::continuation::order_by::{unwrap_items, wrap_items};
use crate::query::data_source::{QueryDataSource, QueryPaginationOptions};
use crate::query::page::{QueryPage, QuerySpec, QueryState};
use crate::query::pagination::comparer::{OrderByComparer, OrderByRow};
use crate::routing::feed_range::{FeedRange, FeedRangeState};
use crate::routing::provider::{PartitionKeyRange, RoutingMapProvider};
use async_trait::async_trait;
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
struct StoredDocument {
    rid: String,
    epk: String,
    partition_key: Element,
    body: Element,
}

/// 一次性注入的失败
#[derive(Debug, Clone)]
struct FailureRule {
    range_min: Option<String>,
    error: QueryError,
}

struct ContainerState {
    partitions: Vec<PartitionKeyRange>,
    documents: Vec<StoredDocument>,
    projections: HashMap<String, RowProjection>,
    next_rid: u64,
    next_range_id: u64,
}

pub struct InMemoryContainer {
    collection_id: String,
    partition_key_path: String,
    state: RwLock<ContainerState>,
    failures: Mutex<Vec<FailureRule>>,
    latency: Mutex<Option<Duration>>,
    query_count: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl InMemoryContainer {
    /// 创建容器，键空间被均分为 `partition_count` 个分区
    pub fn new(
        collection_id: impl Into<String>,
        partition_key_path: impl Into<String>,
        partition_count: usize,
    ) -> Self {
        let count = partition_count.max(1) as u64;
        let upper = epk_to_point("FF").unwrap_or(u32::MAX) as u64;
        let partitions = (0..count)
            .map(|i| {
                let min = epk_from_point((upper * i / count) as u32);
                let max = epk_from_point((upper * (i + 1) / count) as u32);
                PartitionKeyRange::new(i.to_string(), min, max)
            })
            .collect();
        Self {
            collection_id: collection_id.into(),
            partition_key_path: partition_key_path.into(),
            state: RwLock::new(ContainerState {
                partitions,
                documents: Vec::new(),
                projections: HashMap::new(),
                next_rid: 1,
                next_range_id: count,
            }),
            failures: Mutex::new(Vec::new()),
            latency: Mutex::new(None),
            query_count: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    /// 插入文档，返回分配的 rid
    pub fn insert(&self, document: impl Into<Element>) -> String {
        let body = document.into();
        let segments: Vec<&str> = self.partition_key_path.split('.').filter(|s| !s.is_empty()).collect();
        let partition_key = body.select_path(&segments);
        let epk = effective_partition_key(&partition_key);
        let mut state = self.state.write();
        let rid = format!("{:08}", state.next_rid);
        state.next_rid += 1;
        state.documents.push(StoredDocument {
            rid: rid.clone(),
            epk,
            partition_key,
            body,
        });
        rid
    }

    /// 把文档直接放到包含指定 EPK 的位置（测试中精确控制分布）
    pub fn insert_with_epk(&self, epk: impl Into<String>, document: impl Into<Element>) -> String {
        let mut state = self.state.write();
        let rid = format!("{:08}", state.next_rid);
        state.next_rid += 1;
        state.documents.push(StoredDocument {
            rid: rid.clone(),
            epk: epk.into(),
            partition_key: Element::Undefined,
            body: document.into(),
        });
        rid
    }

    /// 登记某条查询文本在后端的执行方式；未登记的查询按原样返回文档
    pub fn register_query(&self, query_text: impl Into<String>, projection: RowProjection) {
        self.state.write().projections.insert(query_text.into(), projection);
    }

    pub fn partitions(&self) -> Vec<PartitionKeyRange> {
        self.state.read().partitions.clone()
    }

    /// 从中点拆分一个分区，返回两个子分区 id
    pub fn split(&self, partition_id: &str) -> QueryResult<(String, String)> {
        let mut state = self.state.write();
        let index = state
            .partitions
            .iter()
            .position(|p| p.id == partition_id)
            .ok_or_else(|| QueryError::Routing(format!("分区 '{}' 不存在", partition_id)))?;
        let parent = state.partitions[index].clone();
        let (low, high) = match (epk_to_point(&parent.min_inclusive), epk_to_point(&parent.max_exclusive)) {
            (Some(low), Some(high)) if high - low >= 2 => (low, high),
            _ => {
                return Err(QueryError::Routing(format!(
                    "分区 '{}' 无法继续拆分",
                    partition_id
                )))
            }
        };
        let middle = epk_from_point(low + (high - low) / 2);

        let left_id = state.next_range_id.to_string();
        let right_id = (state.next_range_id + 1).to_string();
        state.next_range_id += 2;
        let left = PartitionKeyRange::new(left_id.clone(), parent.min_inclusive.clone(), middle.clone())
            .with_parents(vec![parent.id.clone()]);
        let right = PartitionKeyRange::new(right_id.clone(), middle, parent.max_exclusive.clone())
            .with_parents(vec![parent.id.clone()]);
        state.partitions.splice(index..=index, [left, right]);
        info!("partition {} split into {} and {}", partition_id, left_id, right_id);
        Ok((left_id, right_id))
    }

    /// 合并两个相邻分区
    pub fn merge(&self, left_id: &str, right_id: &str) -> QueryResult<String> {
        let mut state = self.state.write();
        let left_index = state
            .partitions
            .iter()
            .position(|p| p.id == left_id)
            .ok_or_else(|| QueryError::Routing(format!("分区 '{}' 不存在", left_id)))?;
        let right = state
            .partitions
            .get(left_index + 1)
            .filter(|p| p.id == right_id)
            .cloned()
            .ok_or_else(|| {
                QueryError::Routing(format!("分区 '{}' 与 '{}' 不相邻", left_id, right_id))
            })?;
        let left = state.partitions[left_index].clone();
        let merged_id = state.next_range_id.to_string();
        state.next_range_id += 1;
        let merged = PartitionKeyRange::new(merged_id.clone(), left.min_inclusive, right.max_exclusive)
            .with_parents(vec![left.id, right.id]);
        state.partitions.splice(left_index..=left_index + 1, [merged]);
        info!("partitions {} and {} merged into {}", left_id, right_id, merged_id);
        Ok(merged_id)
    }

    /// 下一次命中该范围（`None` 为任意范围）的查询返回给定错误
    pub fn inject_failure(&self, range_min: Option<&str>, error: QueryError) {
        self.failures.lock().push(FailureRule {
            range_min: range_min.map(str::to_string),
            error,
        });
    }

    /// 每次查询前的人为延迟
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub fn query_count(&self) -> usize {
        self.query_count.load(AtomicOrdering::SeqCst)
    }

    /// 观察到的最大并发查询数
    pub fn max_concurrent_queries(&self) -> usize {
        self.max_in_flight.load(AtomicOrdering::SeqCst)
    }

    fn take_failure(&self, range: &FeedRange) -> Option<QueryError> {
        let mut failures = self.failures.lock();
        let index = failures.iter().position(|rule| {
            rule.range_min
                .as_deref()
                .map_or(true, |min| min == range.min_inclusive())
        })?;
        Some(failures.remove(index).error)
    }

    fn execute(
        &self,
        spec: &QuerySpec,
        feed_range_state: &FeedRangeState<Option<QueryState>>,
        options: &QueryPaginationOptions,
    ) -> QueryResult<QueryPage> {
        let range = &feed_range_state.feed_range;
        let state = self.state.read();

        let owners: Vec<&PartitionKeyRange> = state
            .partitions
            .iter()
            .filter(|p| {
                p.to_feed_range()
                    .map(|r| r.overlaps(range))
                    .unwrap_or(false)
            })
            .collect();
        let owned = owners.len() == 1
            && owners[0]
                .to_feed_range()
                .map(|r| range.is_subset_of(&r))
                .unwrap_or(false);
        if !owned {
            return Err(QueryError::backend(
                status::GONE,
                sub_status::PARTITION_KEY_RANGE_GONE,
                format!("范围 {} 不再由单个分区拥有", range),
            ));
        }

        let projection = state
            .projections
            .get(&spec.query_text)
            .cloned()
            .unwrap_or(RowProjection::Documents);
        let comparer = OrderByComparer::new(projection.sort_orders());

        let mut rows: Vec<OrderByRow> = state
            .documents
            .iter()
            .filter(|d| range.contains(&d.epk))
            .filter(|d| {
                options
                    .partition_key
                    .as_ref()
                    .map_or(true, |pk| pk == &d.partition_key)
            })
            .map(|d| OrderByRow {
                order_by_items: projection.order_by_items(&d.body),
                rid: d.rid.clone(),
                payload: d.body.clone(),
            })
            .collect();
        drop(state);

        rows.sort_by(|a, b| comparer.compare_with_rid(a, &b.order_by_items, &b.rid));

        if let Some(token) = &feed_range_state.state {
            let (items, rid) = parse_backend_token(token.value())?;
            rows.retain(|row| comparer.compare_with_rid(row, &items, &rid) == Ordering::Greater);
        }

        let page_size = options.page_size_hint.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
        let has_more = rows.len() > page_size;
        rows.truncate(page_size);

        let next_state = if has_more {
            rows.last().map(|last| {
                QueryState::new(Element::object([
                    ("rid", Element::from(last.rid.as_str())),
                    ("orderByItems", wrap_items(&last.order_by_items)),
                ]))
            })
        } else {
            None
        };

        let chunk: Vec<(String, Element)> = rows.into_iter().map(|r| (r.rid, r.payload)).collect();
        let documents = if projection.is_per_chunk() && chunk.is_empty() {
            Vec::new()
        } else {
            projection.project(&chunk)
        };
        let response_length_bytes = documents.iter().map(|d| d.to_json_string().len()).sum();
        let request_charge = 1.0 + 0.1 * chunk.len() as f64;

        debug!(
            "range {} served {} rows (more: {})",
            range,
            documents.len(),
            has_more
        );
        Ok(QueryPage::new(
            documents,
            request_charge,
            uuid::Uuid::new_v4().to_string(),
            response_length_bytes,
            next_state,
        ))
    }
}

fn parse_backend_token(token: &Element) -> QueryResult<(Vec<Element>, String)> {
    let rid = token
        .get("rid")
        .and_then(Element::as_str)
        .ok_or_else(|| QueryError::backend(status::BAD_REQUEST, sub_status::MALFORMED_CONTINUATION_TOKEN, "后端续传令牌缺少 rid"))?
        .to_string();
    let items = match token.get("orderByItems") {
        Some(items) => unwrap_items(items).map_err(|e| {
            QueryError::backend(status::BAD_REQUEST, sub_status::MALFORMED_CONTINUATION_TOKEN, e.to_string())
        })?,
        None => Vec::new(),
    };
    Ok((items, rid))
}

#[async_trait]
impl QueryDataSource for InMemoryContainer {
    async fn monadic_query(
        &self,
        spec: &QuerySpec,
        feed_range_state: &FeedRangeState<Option<QueryState>>,
        options: &QueryPaginationOptions,
        cancellation: &CancellationToken,
    ) -> TryCatch<QueryPage> {
        self.query_count.fetch_add(1, AtomicOrdering::SeqCst);
        let in_flight = self.in_flight.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, AtomicOrdering::SeqCst);

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::select! {
                _ = tokio::time::sleep(latency) => {}
                _ = cancellation.cancelled() => {}
            }
        }

        let result = if cancellation.is_cancelled() {
            Err(QueryError::Cancelled)
        } else if let Some(error) = self.take_failure(&feed_range_state.feed_range) {
            Err(error)
        } else {
            self.execute(spec, feed_range_state, options)
        };

        self.in_flight.fetch_sub(1, AtomicOrdering::SeqCst);
        result.into()
    }
}

#[async_trait]
impl RoutingMapProvider for InMemoryContainer {
    async fn get_overlapping_ranges(
        &self,
        collection_id: &str,
        range: &FeedRange,
        _force_refresh: bool,
    ) -> QueryResult<Vec<PartitionKeyRange>> {
        if collection_id != self.collection_id {
            return Err(QueryError::backend(
                status::NOT_FOUND,
                sub_status::UNKNOWN,
                format!("集合 '{}' 不存在", collection_id),
            ));
        }
        let state = self.state.read();
        let mut ranges = Vec::new();
        for partition in &state.partitions {
            if partition.to_feed_range()?.overlaps(range) {
                ranges.push(partition.clone());
            }
        }
        Ok(ranges)
    }

    async fn get_range_by_id(
        &self,
        collection_id: &str,
        range_id: &str,
        _force_refresh: bool,
    ) -> QueryResult<Option<PartitionKeyRange>> {
        if collection_id != self.collection_id {
            return Err(QueryError::backend(
                status::NOT_FOUND,
                sub_status::UNKNOWN,
                format!("集合 '{}' 不存在", collection_id),
            ));
        }
        Ok(self
            .state
            .read()
            .partitions
            .iter()
            .find(|p| p.id == range_id)
            .cloned())
    }
}
