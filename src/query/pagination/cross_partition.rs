//! 跨分区游标集合
//!
//! 游标保存在一个按句柄索引的表中（`Vec<Option<PartitionCursor>>`），拆分时把父游标
//! 的槽位清空并追加子游标，不依赖引用标识。选择下一个推进的游标由
//! [`PartitionComparer`] 决定，相等时按队列序号、再按范围 `min`。
//!
//! 两种消费方式：
//! - 整页模式（并行阶段）：`move_next` / `current`，每次输出一个子范围的整页；
//! - 逐行模式（排序阶段）：`fill_heads` / `pop_min`，按全局最小行逐条弹出。

use super::comparer::{OrderByComparer, OrderByRow, PartitionComparer};
use super::partition_enumerator::PartitionPageEnumerator;
use crate::core::error::{QueryError, QueryResult};
use crate::core::try_catch::TryCatch;
use crate::query::continuation::order_by::ResumePoint;
use crate::query::data_source::{QueryDataSource, QueryPaginationOptions};
use crate::query::page::{QueryPage, QuerySpec, QueryState};
use crate::routing::feed_range::{FeedRange, FeedRangeState};
use crate::routing::provider::{resolve_feed_ranges, RoutingMapProvider};
use futures::stream::{self, StreamExt};
use log::{debug, warn};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 构造游标所需的共享依赖
#[derive(Clone)]
pub struct EnumeratorContext {
    pub data_source: Arc<dyn QueryDataSource>,
    pub routing: Arc<dyn RoutingMapProvider>,
    pub collection_id: String,
    pub spec: Arc<QuerySpec>,
    pub options: QueryPaginationOptions,
    pub max_concurrency: usize,
    pub enable_prefetch: bool,
    pub max_split_retries: usize,
}

/// 一个游标的可恢复快照
#[derive(Debug, Clone, PartialEq)]
pub struct CursorSnapshot {
    pub feed_range_state: FeedRangeState<Option<QueryState>>,
    pub resume: Option<ResumePoint>,
}

impl CursorSnapshot {
    pub fn from_start(feed_range: FeedRange) -> Self {
        Self {
            feed_range_state: FeedRangeState::new(feed_range, None),
            resume: None,
        }
    }
}

pub struct PartitionCursor {
    enumerator: PartitionPageEnumerator,
    /// 已取回、尚未输出的整页（整页模式）
    pending: Option<TryCatch<QueryPage>>,
    /// 已取回、尚未输出的行（逐行模式）
    buffer: VecDeque<OrderByRow>,
    /// 当前缓冲内容所属页的起始状态
    page_start_state: Option<QueryState>,
    resume: Option<ResumePoint>,
    sequence: u64,
}

impl PartitionCursor {
    fn new(context: &EnumeratorContext, snapshot: CursorSnapshot, sequence: u64) -> Self {
        let page_start_state = snapshot.feed_range_state.state.clone();
        Self {
            enumerator: PartitionPageEnumerator::new(
                context.data_source.clone(),
                context.spec.clone(),
                snapshot.feed_range_state,
                context.options.clone(),
            ),
            pending: None,
            buffer: VecDeque::new(),
            page_start_state,
            resume: snapshot.resume,
            sequence,
        }
    }

    pub fn feed_range(&self) -> &FeedRange {
        self.enumerator.feed_range()
    }

    pub fn head(&self) -> Option<&OrderByRow> {
        self.buffer.front()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    fn has_buffered(&self) -> bool {
        self.pending.as_ref().map_or(false, |page| page.succeeded()) || !self.buffer.is_empty()
    }

    fn is_drained(&self) -> bool {
        self.enumerator.is_exhausted() && self.pending.is_none() && self.buffer.is_empty()
    }

    /// 续传时应从哪个状态重新取页
    fn durable_state(&self) -> Option<QueryState> {
        if self.has_buffered() {
            self.page_start_state.clone()
        } else {
            self.enumerator.state().state.clone()
        }
    }

    pub fn snapshot(&self) -> CursorSnapshot {
        CursorSnapshot {
            feed_range_state: FeedRangeState::new(self.feed_range().clone(), self.durable_state()),
            resume: self.resume.clone(),
        }
    }

    async fn fetch(&mut self, cancellation: &CancellationToken) -> TryCatch<QueryPage> {
        self.page_start_state = self.enumerator.state().state.clone();
        if !self.enumerator.move_next(cancellation).await {
            return TryCatch::from_error(QueryError::Internal(format!(
                "范围 {} 已耗尽，不应再取页",
                self.feed_range()
            )));
        }
        self.enumerator.take_current().unwrap_or_else(|| {
            TryCatch::from_error(QueryError::Internal("游标没有当前页".to_string()))
        })
    }

    fn rewind(&mut self) {
        let state = FeedRangeState::new(self.feed_range().clone(), self.page_start_state.clone());
        self.enumerator.rewind(state);
    }
}

pub struct CrossPartitionEnumerator<C: PartitionComparer> {
    context: EnumeratorContext,
    comparer: C,
    cursors: Vec<Option<PartitionCursor>>,
    next_sequence: u64,
    current: Option<TryCatch<QueryPage>>,
    request_charge: f64,
    last_activity_id: String,
}

impl<C: PartitionComparer> CrossPartitionEnumerator<C> {
    pub fn new(context: EnumeratorContext, comparer: C, mut initial: Vec<CursorSnapshot>) -> Self {
        initial.sort_by(|a, b| a.feed_range_state.feed_range.cmp(&b.feed_range_state.feed_range));
        let cursors: Vec<Option<PartitionCursor>> = initial
            .into_iter()
            .enumerate()
            .map(|(i, snapshot)| Some(PartitionCursor::new(&context, snapshot, i as u64)))
            .collect();
        let next_sequence = cursors.len() as u64;
        debug!("cross partition enumerator created with {} cursors", cursors.len());
        Self {
            context,
            comparer,
            cursors,
            next_sequence,
            current: None,
            request_charge: 0.0,
            last_activity_id: String::new(),
        }
    }

    pub fn comparer(&self) -> &C {
        &self.comparer
    }

    pub fn live_count(&self) -> usize {
        self.cursors.iter().filter(|c| c.is_some()).count()
    }

    pub fn is_exhausted(&self) -> bool {
        self.live_count() == 0
    }

    /// 全部未耗尽游标的快照，按范围排序
    pub fn snapshot(&self) -> Vec<CursorSnapshot> {
        let mut snapshots: Vec<CursorSnapshot> =
            self.cursors.iter().flatten().map(PartitionCursor::snapshot).collect();
        snapshots.sort_by(|a, b| a.feed_range_state.feed_range.cmp(&b.feed_range_state.feed_range));
        snapshots
    }

    /// 取走自上次调用以来逐行模式累计的请求开销
    pub fn take_request_charge(&mut self) -> f64 {
        std::mem::take(&mut self.request_charge)
    }

    pub fn last_activity_id(&self) -> &str {
        &self.last_activity_id
    }

    pub fn current(&self) -> Option<&TryCatch<QueryPage>> {
        self.current.as_ref()
    }

    pub fn take_current(&mut self) -> Option<TryCatch<QueryPage>> {
        self.current.take()
    }

    fn order(&self, left: &PartitionCursor, right: &PartitionCursor) -> Ordering {
        self.comparer
            .compare(left, right)
            .then_with(|| left.sequence.cmp(&right.sequence))
            .then_with(|| left.feed_range().min_inclusive().cmp(right.feed_range().min_inclusive()))
    }

    /// 按选择顺序排列的存活句柄
    fn queue_order(&self) -> Vec<usize> {
        let mut handles: Vec<usize> = self
            .cursors
            .iter()
            .enumerate()
            .filter_map(|(handle, cursor)| cursor.as_ref().map(|_| handle))
            .collect();
        handles.sort_by(|a, b| match (&self.cursors[*a], &self.cursors[*b]) {
            (Some(l), Some(r)) => self.order(l, r),
            _ => Ordering::Equal,
        });
        handles
    }

    fn select_min(&self) -> Option<usize> {
        self.queue_order().into_iter().next()
    }

    fn batch_limit(&self) -> usize {
        self.context.max_concurrency.max(1)
    }

    /// 并发取页，同时在途的请求数不超过 `max_concurrency`
    async fn fetch_batch(
        &mut self,
        handles: Vec<usize>,
        cancellation: &CancellationToken,
    ) -> Vec<(usize, TryCatch<QueryPage>)> {
        let taken: Vec<(usize, PartitionCursor)> = handles
            .into_iter()
            .filter_map(|handle| self.cursors[handle].take().map(|cursor| (handle, cursor)))
            .collect();

        let fetched: Vec<(usize, PartitionCursor, TryCatch<QueryPage>)> = stream::iter(
            taken.into_iter().map(|(handle, mut cursor)| async move {
                let page = cursor.fetch(cancellation).await;
                (handle, cursor, page)
            }),
        )
        .buffer_unordered(self.batch_limit())
        .collect()
        .await;

        let mut results = Vec::with_capacity(fetched.len());
        for (handle, cursor, page) in fetched {
            self.cursors[handle] = Some(cursor);
            results.push((handle, page));
        }
        results.sort_by_key(|(handle, _)| *handle);
        results
    }

    /// 用子范围替换已拆分的游标
    ///
    /// 返回 `Ok(false)` 表示刷新后的路由仍是原范围，调用方应上报原始错误。
    async fn replace_split(&mut self, handle: usize) -> QueryResult<bool> {
        let parent = match self.cursors[handle].take() {
            Some(parent) => parent,
            None => return Err(QueryError::Internal(format!("无效的游标句柄 {}", handle))),
        };
        let parent_range = parent.feed_range().clone();
        let children = match resolve_feed_ranges(
            self.context.routing.as_ref(),
            &self.context.collection_id,
            &parent_range,
            true,
        )
        .await
        {
            Ok(children) => children,
            Err(e) => {
                self.cursors[handle] = Some(parent);
                return Err(e);
            }
        };

        if children.len() == 1 && children[0] == parent_range {
            self.cursors[handle] = Some(parent);
            return Ok(false);
        }

        warn!(
            "range {} split into {} child ranges, substituting cursors",
            parent_range,
            children.len()
        );
        let state = parent.durable_state();
        for child in children {
            let snapshot = CursorSnapshot {
                feed_range_state: FeedRangeState::new(child, state.clone()),
                resume: parent.resume.clone(),
            };
            self.cursors
                .push(Some(PartitionCursor::new(&self.context, snapshot, parent.sequence)));
        }
        Ok(true)
    }

    /// 处理拆分失败：替换成功返回 `None`，否则返回应上报的失败
    async fn handle_split(
        &mut self,
        handle: usize,
        page: TryCatch<QueryPage>,
        splits: &mut usize,
    ) -> Option<TryCatch<QueryPage>> {
        if *splits >= self.context.max_split_retries {
            warn!("split retry budget exhausted for handle {}", handle);
            return Some(page);
        }
        *splits += 1;
        match self.replace_split(handle).await {
            Ok(true) => None,
            Ok(false) => Some(page),
            Err(e) => Some(TryCatch::from_error(e)),
        }
    }

    /// 整页模式：输出队首游标的下一页
    pub async fn move_next(&mut self, cancellation: &CancellationToken) -> bool {
        if cancellation.is_cancelled() {
            self.current = Some(TryCatch::from_error(QueryError::Cancelled));
            return true;
        }

        let mut splits = 0usize;
        loop {
            let head = match self.select_min() {
                Some(head) => head,
                None => {
                    self.current = None;
                    return false;
                }
            };

            if self.cursors[head].as_ref().map_or(false, |c| c.pending.is_some()) {
                self.current = Some(self.emit_pending(head));
                return true;
            }

            let mut batch = vec![head];
            if self.context.enable_prefetch {
                let limit = self.batch_limit();
                for handle in self.queue_order() {
                    if batch.len() >= limit {
                        break;
                    }
                    let idle = self.cursors[handle]
                        .as_ref()
                        .map_or(false, |c| c.pending.is_none() && !c.enumerator.is_exhausted());
                    if handle != head && idle {
                        batch.push(handle);
                    }
                }
            }

            for (handle, page) in self.fetch_batch(batch, cancellation).await {
                let page = if page.failed() && page.error().is_split() {
                    match self.handle_split(handle, page, &mut splits).await {
                        Some(surfaced) => surfaced,
                        None => continue,
                    }
                } else {
                    page
                };
                if let Some(cursor) = self.cursors[handle].as_mut() {
                    cursor.pending = Some(page);
                }
            }
        }
    }

    fn emit_pending(&mut self, handle: usize) -> TryCatch<QueryPage> {
        let page = match self.cursors[handle].as_mut().and_then(|c| c.pending.take()) {
            Some(page) => page,
            None => return TryCatch::from_error(QueryError::Internal("队首游标没有待输出页".to_string())),
        };
        if page.succeeded() {
            let drained = self.cursors[handle]
                .as_ref()
                .map_or(true, PartitionCursor::is_drained);
            if drained {
                self.cursors[handle] = None;
            } else if let Some(cursor) = self.cursors[handle].as_mut() {
                cursor.sequence = self.next_sequence;
                self.next_sequence += 1;
            }
        }
        page
    }
}

impl CrossPartitionEnumerator<OrderByComparer> {
    /// 逐行模式：保证每个未耗尽的游标缓冲区非空
    ///
    /// 只有在确实需要取页时才检查取消；缓冲区已满时弹行不受取消影响。
    pub async fn fill_heads(&mut self, cancellation: &CancellationToken) -> TryCatch<()> {
        let mut splits = 0usize;
        loop {
            for slot in self.cursors.iter_mut() {
                if slot.as_ref().map_or(false, PartitionCursor::is_drained) {
                    *slot = None;
                }
            }

            let needy: Vec<usize> = self
                .queue_order()
                .into_iter()
                .filter(|handle| {
                    self.cursors[*handle]
                        .as_ref()
                        .map_or(false, |c| c.buffer.is_empty())
                })
                .collect();
            if needy.is_empty() {
                return TryCatch::success();
            }
            if cancellation.is_cancelled() {
                return TryCatch::from_error(QueryError::Cancelled);
            }

            let limit = if self.context.enable_prefetch { self.batch_limit() } else { 1 };
            let batch: Vec<usize> = needy.into_iter().take(limit).collect();

            let mut failure: Option<TryCatch<QueryPage>> = None;
            for (handle, page) in self.fetch_batch(batch, cancellation).await {
                if page.failed() {
                    let surfaced = if page.error().is_split() {
                        self.handle_split(handle, page, &mut splits).await
                    } else {
                        Some(page)
                    };
                    if failure.is_none() {
                        failure = surfaced;
                    }
                    continue;
                }
                if let Err(e) = self.buffer_rows(handle, page) {
                    if failure.is_none() {
                        failure = Some(TryCatch::from_error(e));
                    }
                }
            }

            if let Some(failed) = failure {
                return failed.try_map(|_| ());
            }
        }
    }

    fn buffer_rows(&mut self, handle: usize, page: TryCatch<QueryPage>) -> QueryResult<()> {
        let page = page.into_result()?;
        let parsed: QueryResult<Vec<OrderByRow>> =
            page.documents.iter().map(OrderByRow::try_from_element).collect();

        let cursor = self.cursors[handle]
            .as_mut()
            .ok_or_else(|| QueryError::Internal(format!("无效的游标句柄 {}", handle)))?;
        let rows = match parsed {
            Ok(rows) => rows,
            Err(e) => {
                cursor.rewind();
                return Err(e);
            }
        };
        let rows = match &cursor.resume {
            Some(resume) => self.comparer.filter_resumed(rows, resume),
            None => rows,
        };
        cursor.buffer = rows.into();
        self.request_charge += page.request_charge;
        self.last_activity_id = page.activity_id;
        Ok(())
    }

    /// 弹出全局最小行，并把它记为所属游标的恢复点
    ///
    /// 调用前必须先 `fill_heads`。所有游标都耗尽时返回 `None`。
    pub fn pop_min(&mut self) -> Option<OrderByRow> {
        let handle = self
            .queue_order()
            .into_iter()
            .find(|h| self.cursors[*h].as_ref().map_or(false, |c| !c.buffer.is_empty()))?;
        let cursor = self.cursors[handle].as_mut()?;
        let row = cursor.buffer.pop_front()?;

        let skip_count = match &cursor.resume {
            Some(prev) if prev.rid == row.rid && prev.order_by_items == row.order_by_items => {
                prev.skip_count + 1
            }
            _ => 1,
        };
        cursor.resume = Some(ResumePoint {
            order_by_items: row.order_by_items.clone(),
            rid: row.rid.clone(),
            skip_count,
        });

        if cursor.is_drained() {
            self.cursors[handle] = None;
        }
        Some(row)
    }
}
