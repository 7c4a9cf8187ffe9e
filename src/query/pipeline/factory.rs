//! 管道工厂
//!
//! 根据查询计划决定阶段组合，并把续传令牌逐层拆开交给对应阶段：外层令牌的
//! `SourceToken` 就是内层阶段的令牌。分组/聚合令牌处于 `Done` 阶段时不再创建
//! 其内层阶段。

use super::aggregate::AggregateStage;
use super::distinct::{DistinctMap, DistinctStage};
use super::group_by::GroupByStage;
use super::order_by::OrderByCrossPartitionStage;
use super::parallel::ParallelCrossPartitionStage;
use super::passthrough::PassthroughStage;
use super::skip::SkipStage;
use super::take::TakeStage;
use super::BoxedStage;
use crate::config::PipelineConfig;
use crate::core::error::{QueryError, QueryResult};
use crate::core::value::Element;
use crate::query::continuation::{
    AggregateContinuationToken, ContinuationToken, GroupByContinuationToken, ParallelContinuationToken,
    SkipContinuationToken, TakeContinuationToken,
};
use crate::query::data_source::{QueryDataSource, QueryPaginationOptions};
use crate::query::page::QuerySpec;
use crate::query::pagination::EnumeratorContext;
use crate::query::plan::QueryInfo;
use crate::routing::feed_range::{FeedRange, FeedRangeState};
use crate::routing::provider::{resolve_feed_ranges, RoutingMapProvider};
use log::debug;
use std::sync::Arc;

/// 创建管道所需的全部输入
#[derive(Clone)]
pub struct PipelineContext {
    pub data_source: Arc<dyn QueryDataSource>,
    pub routing: Arc<dyn RoutingMapProvider>,
    pub collection_id: String,
    pub spec: QuerySpec,
    pub query_info: QueryInfo,
    /// 查询的目标范围，默认为整个键空间
    pub target_ranges: Vec<FeedRange>,
    pub partition_key: Option<Element>,
    pub config: PipelineConfig,
}

impl PipelineContext {
    pub fn new(
        data_source: Arc<dyn QueryDataSource>,
        routing: Arc<dyn RoutingMapProvider>,
        collection_id: impl Into<String>,
        spec: QuerySpec,
        query_info: QueryInfo,
    ) -> Self {
        Self {
            data_source,
            routing,
            collection_id: collection_id.into(),
            spec,
            query_info,
            target_ranges: vec![FeedRange::full()],
            partition_key: None,
            config: PipelineConfig::default(),
        }
    }

    pub fn with_target_ranges(mut self, ranges: Vec<FeedRange>) -> Self {
        self.target_ranges = ranges;
        self
    }

    pub fn with_partition_key(mut self, partition_key: impl Into<Element>) -> Self {
        self.partition_key = Some(partition_key.into());
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    fn enumerator_context(&self) -> EnumeratorContext {
        // 跨分区执行使用改写后的查询，参数沿用原查询
        let spec = match &self.query_info.rewritten_query {
            Some(rewritten) => QuerySpec {
                query_text: rewritten.clone(),
                parameters: self.spec.parameters.clone(),
            },
            None => self.spec.clone(),
        };
        EnumeratorContext {
            data_source: self.data_source.clone(),
            routing: self.routing.clone(),
            collection_id: self.collection_id.clone(),
            spec: Arc::new(spec),
            options: QueryPaginationOptions {
                page_size_hint: Some(self.config.max_item_count),
                partition_key: self.partition_key.clone(),
            },
            max_concurrency: self.config.max_concurrency,
            enable_prefetch: self.config.enable_prefetch,
            max_split_retries: self.config.max_split_retries,
        }
    }
}

/// 由外到内的阶段层
enum Layer {
    Take(u64),
    Skip(u64),
    GroupBy(Option<GroupByContinuationToken>),
    Distinct(DistinctMap),
    Aggregate(Option<AggregateContinuationToken>),
}

/// 拆出外层令牌后剩下的内层令牌；`Done` 阶段没有内层
enum Inner {
    Token(Option<Element>),
    Finished,
}

fn parse_layers(query_info: &QueryInfo, continuation: Option<&Element>) -> QueryResult<(Vec<Layer>, Inner)> {
    let mut layers = Vec::new();
    let mut token = continuation.cloned();

    if let Some(take) = query_info.take_count() {
        let remaining = match token.take() {
            Some(element) => {
                let parsed = TakeContinuationToken::parse(&element)?;
                token = Some(parsed.source);
                parsed.take_count
            }
            None => take,
        };
        layers.push(Layer::Take(remaining));
    }

    if let Some(offset) = query_info.offset {
        let remaining = match token.take() {
            Some(element) => {
                let parsed = SkipContinuationToken::parse(&element)?;
                token = Some(parsed.source);
                parsed.skip_count
            }
            None => offset,
        };
        layers.push(Layer::Skip(remaining));
    }

    if query_info.has_group_by() {
        let parsed = token.take().map(|e| GroupByContinuationToken::parse(&e)).transpose()?;
        let finished = parsed.as_ref().map_or(false, |t| t.source.is_done());
        token = parsed
            .as_ref()
            .and_then(|t| t.source.source_state())
            .map(|state| state.value().clone());
        layers.push(Layer::GroupBy(parsed));
        if finished {
            return Ok((layers, Inner::Finished));
        }
    }

    if query_info.has_distinct() {
        let (map, inner) = DistinctStage::parse_continuation(query_info.distinct_type, token.as_ref())?;
        token = inner;
        layers.push(Layer::Distinct(map));
    }

    if query_info.has_aggregates() && !query_info.has_group_by() {
        let parsed = token.take().map(|e| AggregateContinuationToken::parse(&e)).transpose()?;
        let finished = parsed.as_ref().map_or(false, |t| t.source.is_done());
        token = parsed
            .as_ref()
            .and_then(|t| t.source.source_state())
            .map(|state| state.value().clone());
        layers.push(Layer::Aggregate(parsed));
        if finished {
            return Ok((layers, Inner::Finished));
        }
    }

    Ok((layers, Inner::Token(token)))
}

async fn resolve_target_ranges(context: &PipelineContext) -> QueryResult<Vec<FeedRange>> {
    let mut ranges = Vec::new();
    for target in &context.target_ranges {
        ranges.extend(
            resolve_feed_ranges(context.routing.as_ref(), &context.collection_id, target, false).await?,
        );
    }
    ranges.sort();
    ranges.dedup();
    Ok(ranges)
}

/// 创建最内层的来源阶段
async fn create_source(context: &PipelineContext, continuation: Option<&Element>) -> QueryResult<BoxedStage> {
    let info = &context.query_info;
    let enumerator_context = context.enumerator_context();
    let cross_partition = info.requires_cross_partition_merge();

    match continuation {
        Some(element @ Element::Object(_)) => {
            if cross_partition {
                return Err(QueryError::malformed(
                    "跨分区查询的来源令牌应为数组，实际为单分区令牌",
                ));
            }
            let token = ParallelContinuationToken::parse(element)?;
            return Ok(Box::new(PassthroughStage::new(
                enumerator_context,
                token.into_feed_range_state(),
            )));
        }
        Some(Element::Array(_)) | None => {}
        Some(other) => {
            return Err(QueryError::malformed(format!(
                "来源令牌应为数组或对象，实际为 {}",
                other.kind().name()
            )))
        }
    }

    let ranges = match continuation {
        Some(_) => Vec::new(),
        None => resolve_target_ranges(context).await?,
    };

    if continuation.is_none() && !cross_partition && ranges.len() == 1 {
        let state = FeedRangeState::new(ranges[0].clone(), None);
        return Ok(Box::new(PassthroughStage::new(enumerator_context, state)));
    }

    if info.has_order_by() {
        Ok(Box::new(OrderByCrossPartitionStage::try_create(
            enumerator_context,
            info.order_by.clone(),
            &ranges,
            context.config.max_item_count,
            continuation,
        )?))
    } else {
        Ok(Box::new(ParallelCrossPartitionStage::try_create(
            enumerator_context,
            &ranges,
            continuation,
        )?))
    }
}

/// 创建完整管道；`continuation` 是版本信封内的来源令牌
pub async fn create_pipeline(context: &PipelineContext, continuation: Option<&Element>) -> QueryResult<BoxedStage> {
    context.query_info.validate()?;
    let (layers, inner) = parse_layers(&context.query_info, continuation)?;

    let mut stage: Option<BoxedStage> = match inner {
        Inner::Token(token) => Some(create_source(context, token.as_ref()).await?),
        Inner::Finished => None,
    };

    let query_info = Arc::new(context.query_info.clone());
    for layer in layers.into_iter().rev() {
        let wrapped: BoxedStage = match layer {
            Layer::Aggregate(token) => Box::new(AggregateStage::new(stage.take(), &query_info, token.as_ref())?),
            Layer::GroupBy(token) => Box::new(GroupByStage::new(
                stage.take(),
                query_info.clone(),
                context.config.max_item_count,
                token.as_ref(),
            )?),
            Layer::Distinct(map) => Box::new(DistinctStage::new(require(stage.take())?, map)),
            Layer::Skip(remaining) => Box::new(SkipStage::new(require(stage.take())?, remaining)),
            Layer::Take(remaining) => Box::new(TakeStage::new(require(stage.take())?, remaining)),
        };
        stage = Some(wrapped);
    }

    let stage = require(stage)?;
    debug!("query pipeline created, outermost stage: {}", stage.name());
    Ok(stage)
}

fn require(stage: Option<BoxedStage>) -> QueryResult<BoxedStage> {
    stage.ok_or_else(|| QueryError::Internal("阶段缺少来源".to_string()))
}
