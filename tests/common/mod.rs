//! 集成测试共享工具模块
//!
//! 提供内存容器与管道上下文的构造，以及一次排空/逐页恢复排空两种读取方式，
//! 供所有集成测试使用

pub mod assertions;

use crossquery::config::PipelineConfig;
use crossquery::core::hash::{epk_from_point, epk_to_point};
use crossquery::core::value::Element;
use crossquery::query::{PipelineContext, QueryInfo, QueryIterator, QueryResult, QuerySpec};
use crossquery::storage::InMemoryContainer;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const COLLECTION: &str = "items";

/// 防止实现缺陷导致测试无限循环
const MAX_PAGES: usize = 10_000;

/// 创建按 `pk` 字段分区的内存容器
pub fn test_container(partition_count: usize) -> Arc<InMemoryContainer> {
    Arc::new(InMemoryContainer::new(COLLECTION, "pk", partition_count))
}

/// 第 `index` 个分区内、距下界 `offset + 1` 的 EPK
pub fn epk_in_partition(container: &InMemoryContainer, index: usize, offset: u32) -> String {
    let partitions = container.partitions();
    let low = epk_to_point(&partitions[index].min_inclusive).expect("分区下界应为有效 EPK");
    epk_from_point(low + 1 + offset)
}

/// 把文档依次放入指定分区
pub fn place(container: &InMemoryContainer, index: usize, documents: Vec<serde_json::Value>) {
    for (offset, document) in documents.into_iter().enumerate() {
        container.insert_with_epk(epk_in_partition(container, index, offset as u32), document);
    }
}

pub fn pipeline_context(
    container: &Arc<InMemoryContainer>,
    query_text: &str,
    query_info: QueryInfo,
    page_size: usize,
) -> PipelineContext {
    PipelineContext::new(
        container.clone(),
        container.clone(),
        COLLECTION,
        QuerySpec::new(query_text),
        query_info,
    )
    .with_config(PipelineConfig {
        max_item_count: page_size,
        ..PipelineConfig::default()
    })
}

/// 排空结果
#[derive(Debug, Default)]
pub struct Drained {
    pub documents: Vec<Element>,
    pub pages: usize,
    pub tokens: Vec<String>,
}

impl Drained {
    fn push(&mut self, documents: &[Element], token: Option<&str>) {
        self.pages += 1;
        assert!(self.pages < MAX_PAGES, "分页次数超过上限，迭代器可能没有结束");
        self.documents.extend(documents.iter().cloned());
        if let Some(token) = token {
            self.tokens.push(token.to_string());
        }
    }
}

/// 用同一个迭代器读到结束
pub async fn drain(context: PipelineContext, continuation: Option<String>) -> QueryResult<Drained> {
    let cancel = CancellationToken::new();
    let mut iterator = QueryIterator::new(context, continuation);
    let mut drained = Drained::default();
    while let Some(page) = iterator.read_next_page(&cancel).await? {
        drained.push(&page.documents, page.continuation_token());
    }
    Ok(drained)
}

/// 每读一页就丢弃迭代器，用该页的令牌重新创建
pub async fn drain_resuming(context: &PipelineContext) -> QueryResult<Drained> {
    let cancel = CancellationToken::new();
    let mut drained = Drained::default();
    let mut continuation: Option<String> = None;
    loop {
        let mut iterator = QueryIterator::new(context.clone(), continuation.take());
        let page = match iterator.read_next_page(&cancel).await? {
            Some(page) => page,
            None => return Ok(drained),
        };
        drained.push(&page.documents, page.continuation_token());
        match page.continuation_token() {
            Some(token) => continuation = Some(token.to_string()),
            None => return Ok(drained),
        }
    }
}

/// 文档的 `id` 字段
pub fn ids(documents: &[Element]) -> Vec<i64> {
    documents
        .iter()
        .map(|d| d.get("id").and_then(Element::as_i64).expect("文档应包含整数 id"))
        .collect()
}

pub fn sorted_ids(documents: &[Element]) -> Vec<i64> {
    let mut ids = ids(documents);
    ids.sort_unstable();
    ids
}
