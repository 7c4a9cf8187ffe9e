//! 游标选择策略
//!
//! 并行执行时所有游标相等，退化为按队列序号的先进先出；排序执行时比较各游标
//! 缓冲区头部行的排序值，相等时按范围 `min` 升序，保证跨分区的全局顺序确定。

use super::cross_partition::PartitionCursor;
use crate::core::error::{QueryError, QueryResult};
use crate::core::value::Element;
use crate::query::continuation::order_by::{unwrap_items, ResumePoint};
use crate::query::plan::SortOrder;
use std::cmp::Ordering;

/// 改写后的排序行
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByRow {
    pub order_by_items: Vec<Element>,
    pub rid: String,
    pub payload: Element,
}

impl OrderByRow {
    pub fn try_from_element(element: &Element) -> QueryResult<Self> {
        let fields = element.as_object().ok_or_else(|| {
            QueryError::InvalidPayload(format!(
                "排序行应为对象，实际为 {}",
                element.kind().name()
            ))
        })?;
        let items = fields
            .get("orderByItems")
            .ok_or_else(|| QueryError::InvalidPayload("排序行缺少 orderByItems".to_string()))?;
        let order_by_items = unwrap_items(items)
            .map_err(|e| QueryError::InvalidPayload(format!("orderByItems 无效: {}", e)))?;
        let rid = fields
            .get("_rid")
            .and_then(Element::as_str)
            .ok_or_else(|| QueryError::InvalidPayload("排序行缺少 _rid".to_string()))?
            .to_string();
        let payload = fields.get("payload").cloned().unwrap_or(Element::Undefined);
        Ok(Self {
            order_by_items,
            rid,
            payload,
        })
    }
}

pub trait PartitionComparer: Send + Sync {
    fn compare(&self, left: &PartitionCursor, right: &PartitionCursor) -> Ordering;
}

/// 并行执行：全部相等
#[derive(Debug, Default, Clone, Copy)]
pub struct RangeComparer;

impl PartitionComparer for RangeComparer {
    fn compare(&self, _left: &PartitionCursor, _right: &PartitionCursor) -> Ordering {
        Ordering::Equal
    }
}

#[derive(Debug, Clone)]
pub struct OrderByComparer {
    sort_orders: Vec<SortOrder>,
}

impl OrderByComparer {
    pub fn new(sort_orders: Vec<SortOrder>) -> Self {
        Self { sort_orders }
    }

    pub fn sort_orders(&self) -> &[SortOrder] {
        &self.sort_orders
    }

    pub fn compare_items(&self, left: &[Element], right: &[Element]) -> Ordering {
        for ((l, r), order) in left.iter().zip(right.iter()).zip(self.sort_orders.iter()) {
            let ordering = order.apply(l.cmp(r));
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// 单个范围内的行序：排序值，然后是 rid（方向跟随第一个排序方向）
    pub fn compare_with_rid(&self, left: &OrderByRow, items: &[Element], rid: &str) -> Ordering {
        self.compare_items(&left.order_by_items, items).then_with(|| {
            let direction = self.sort_orders.first().copied().unwrap_or(SortOrder::Ascending);
            direction.apply(left.rid.as_str().cmp(rid))
        })
    }

    /// 丢弃恢复点之前（含）已输出的行
    pub fn filter_resumed(&self, rows: Vec<OrderByRow>, resume: &ResumePoint) -> Vec<OrderByRow> {
        let mut equal_seen = 0u64;
        rows.into_iter()
            .filter(|row| match self.compare_with_rid(row, &resume.order_by_items, &resume.rid) {
                Ordering::Less => false,
                Ordering::Equal => {
                    equal_seen += 1;
                    equal_seen > resume.skip_count
                }
                Ordering::Greater => true,
            })
            .collect()
    }
}

impl PartitionComparer for OrderByComparer {
    fn compare(&self, left: &PartitionCursor, right: &PartitionCursor) -> Ordering {
        let by_items = match (left.head(), right.head()) {
            (Some(l), Some(r)) => self.compare_items(&l.order_by_items, &r.order_by_items),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_items.then_with(|| left.feed_range().min_inclusive().cmp(right.feed_range().min_inclusive()))
    }
}
