//! 路由模块
//!
//! 键范围（`FeedRange`）与分区映射提供者

pub mod feed_range;
pub mod provider;

pub use feed_range::{CrossFeedRangeState, FeedRange, FeedRangeState};
pub use provider::{resolve_feed_ranges, PartitionKeyRange, RoutingMapProvider};
