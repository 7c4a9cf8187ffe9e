//! 有效分区键空间上的半开区间及其续传状态
//!
//! `FeedRange` 不可变；拆分后由子范围替换父范围，而不是修改原对象。

use crate::core::error::{QueryError, QueryResult};
use crate::core::hash::{MAX_EPK_EXCLUSIVE, MIN_EPK_INCLUSIVE};
use crate::core::value::{required_field, Element};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `[min, max)` 区间，按 `min`、再按 `max` 排序
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeedRange {
    min: String,
    max: String,
}

impl FeedRange {
    /// 整个键空间 `["", "FF")`
    pub fn full() -> Self {
        Self {
            min: MIN_EPK_INCLUSIVE.to_string(),
            max: MAX_EPK_EXCLUSIVE.to_string(),
        }
    }

    pub fn new(min: impl Into<String>, max: impl Into<String>) -> QueryResult<Self> {
        let (min, max) = (min.into(), max.into());
        if min > max {
            return Err(QueryError::Routing(format!(
                "无效的范围: min '{}' 大于 max '{}'",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    pub fn min_inclusive(&self) -> &str {
        &self.min
    }

    pub fn max_exclusive(&self) -> &str {
        &self.max
    }

    pub fn is_empty(&self) -> bool {
        self.min >= self.max
    }

    pub fn contains(&self, epk: &str) -> bool {
        self.min.as_str() <= epk && epk < self.max.as_str()
    }

    pub fn overlaps(&self, other: &FeedRange) -> bool {
        !self.is_empty() && !other.is_empty() && self.min < other.max && other.min < self.max
    }

    pub fn is_subset_of(&self, other: &FeedRange) -> bool {
        other.min <= self.min && self.max <= other.max
    }

    /// 两个范围的交集，不相交时返回 `None`
    pub fn intersection(&self, other: &FeedRange) -> Option<FeedRange> {
        if !self.overlaps(other) {
            return None;
        }
        let min = std::cmp::max(&self.min, &other.min).clone();
        let max = std::cmp::min(&self.max, &other.max).clone();
        Some(FeedRange { min, max })
    }

    pub fn to_element(&self) -> Element {
        Element::object([
            ("min", Element::from(self.min.as_str())),
            ("max", Element::from(self.max.as_str())),
        ])
    }

    pub fn try_from_element(element: &Element) -> QueryResult<Self> {
        let min = required_field(element, "min", "range")?
            .as_str()
            .ok_or_else(|| QueryError::malformed("range.min 应为字符串"))?;
        let max = required_field(element, "max", "range")?
            .as_str()
            .ok_or_else(|| QueryError::malformed("range.max 应为字符串"))?;
        if min >= max {
            return Err(QueryError::malformed(format!(
                "range [{}, {}) 为空或倒置",
                min, max
            )));
        }
        Ok(Self {
            min: min.to_string(),
            max: max.to_string(),
        })
    }
}

impl fmt::Display for FeedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.min, self.max)
    }
}

/// 一个范围及其续传状态。每次取页后整体替换。
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRangeState<S> {
    pub feed_range: FeedRange,
    pub state: S,
}

impl<S> FeedRangeState<S> {
    pub fn new(feed_range: FeedRange, state: S) -> Self {
        Self { feed_range, state }
    }

    /// 用新状态替换，范围不变
    pub fn with_state<T>(&self, state: T) -> FeedRangeState<T> {
        FeedRangeState {
            feed_range: self.feed_range.clone(),
            state,
        }
    }
}

/// 正在被遍历的全部范围状态，按 `min` 有序
#[derive(Debug, Clone, PartialEq)]
pub struct CrossFeedRangeState<S> {
    states: Vec<FeedRangeState<S>>,
}

impl<S> CrossFeedRangeState<S> {
    /// 排序并校验：非空、各范围非空、互不重叠
    pub fn new(mut states: Vec<FeedRangeState<S>>) -> QueryResult<Self> {
        states.sort_by(|a, b| a.feed_range.cmp(&b.feed_range));
        let cross = Self { states };
        cross.validate()?;
        Ok(cross)
    }

    pub fn validate(&self) -> QueryResult<()> {
        if self.states.is_empty() {
            return Err(QueryError::malformed("跨分区状态不能为空"));
        }
        for state in &self.states {
            if state.feed_range.is_empty() {
                return Err(QueryError::malformed(format!(
                    "范围 {} 为空",
                    state.feed_range
                )));
            }
        }
        for pair in self.states.windows(2) {
            if pair[0].feed_range.overlaps(&pair[1].feed_range) {
                return Err(QueryError::malformed(format!(
                    "范围 {} 与 {} 重叠",
                    pair[0].feed_range, pair[1].feed_range
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeedRangeState<S>> {
        self.states.iter()
    }

    pub fn into_vec(self) -> Vec<FeedRangeState<S>> {
        self.states
    }
}
