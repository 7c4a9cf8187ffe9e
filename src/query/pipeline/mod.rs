//! 查询管道阶段
//!
//! 每个阶段都是一个异步的页迭代器，拥有其内层来源并把来源的页转换为自己的页。
//! 阶段输出页的 `state` 是该阶段自己的续传令牌（`QueryState` 包装的 `Element`），
//! 外层阶段把它当作不透明的 `SourceToken` 嵌入自己的令牌。
//!
//! 组合顺序（内 -> 外）：来源（并行 | 排序 | 直通） -> 聚合 -> 去重 -> 分组 -> 跳过 -> 截取

pub mod aggregate;
pub mod distinct;
pub mod factory;
pub mod group_by;
pub mod order_by;
pub mod parallel;
pub mod passthrough;
pub mod skip;
pub mod take;

use crate::core::try_catch::TryCatch;
use crate::query::page::QueryPage;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use aggregate::AggregateStage;
pub use distinct::DistinctStage;
pub use factory::{create_pipeline, PipelineContext};
pub use group_by::GroupByStage;
pub use order_by::OrderByCrossPartitionStage;
pub use parallel::ParallelCrossPartitionStage;
pub use passthrough::PassthroughStage;
pub use skip::SkipStage;
pub use take::TakeStage;

/// 管道阶段
///
/// 所有方法都要求 `&mut self`，同一时刻只有一个调用方推进管道。
#[async_trait]
pub trait QueryPipelineStage: Send {
    /// 推进到下一页；返回 `false` 表示已无更多页
    ///
    /// 返回 `true` 时 `current()` 必有值，可能是失败页。失败后可以再次调用以重试。
    async fn move_next(&mut self, cancellation: &CancellationToken) -> bool;

    fn current(&self) -> Option<&TryCatch<QueryPage>>;

    fn take_current(&mut self) -> Option<TryCatch<QueryPage>>;

    /// 阶段名称
    fn name(&self) -> &'static str;

    /// 释放资源
    async fn dispose(&mut self) {}
}

pub type BoxedStage = Box<dyn QueryPipelineStage>;

/// 从来源取下一页；来源已结束时返回 `None`
pub(crate) async fn next_source_page(
    source: &mut BoxedStage,
    cancellation: &CancellationToken,
) -> Option<TryCatch<QueryPage>> {
    if !source.move_next(cancellation).await {
        return None;
    }
    source.take_current()
}
