//! 去重阶段
//!
//! 以文档的 64 位哈希判断重复。无序去重记住所有已输出文档的哈希；有序去重的输入
//! 已按投影排序，只需记住上一条。

use super::{BoxedStage, QueryPipelineStage};
use crate::core::error::{QueryError, QueryResult};
use crate::core::hash::distinct_hash;
use crate::core::try_catch::TryCatch;
use crate::core::value::Element;
use crate::query::continuation::{ContinuationToken, DistinctContinuationToken};
use crate::query::page::{QueryPage, QueryState};
use crate::query::plan::DistinctType;
use async_trait::async_trait;
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub enum DistinctMap {
    Ordered { last: Option<String> },
    Unordered { seen: BTreeSet<String> },
}

impl DistinctMap {
    pub fn new(distinct_type: DistinctType) -> QueryResult<Self> {
        match distinct_type {
            DistinctType::Ordered => Ok(DistinctMap::Ordered { last: None }),
            DistinctType::Unordered => Ok(DistinctMap::Unordered { seen: BTreeSet::new() }),
            DistinctType::None => Err(QueryError::UnsupportedQueryPlan(
                "去重阶段需要 Ordered 或 Unordered".to_string(),
            )),
        }
    }

    /// 首次出现返回 `true`，并记下该文档
    pub fn add(&mut self, document: &Element) -> bool {
        let hash = distinct_hash(document);
        match self {
            DistinctMap::Ordered { last } => {
                if last.as_deref() == Some(hash.as_str()) {
                    false
                } else {
                    *last = Some(hash);
                    true
                }
            }
            DistinctMap::Unordered { seen } => seen.insert(hash),
        }
    }

    pub fn to_token(&self) -> Element {
        match self {
            DistinctMap::Ordered { last } => match last {
                Some(hash) => Element::from(hash.as_str()),
                None => Element::Null,
            },
            DistinctMap::Unordered { seen } => {
                Element::Array(seen.iter().map(|h| Element::from(h.as_str())).collect())
            }
        }
    }

    pub fn from_token(distinct_type: DistinctType, token: &Element) -> QueryResult<Self> {
        match (distinct_type, token) {
            (DistinctType::Ordered, Element::Null) => Ok(DistinctMap::Ordered { last: None }),
            (DistinctType::Ordered, Element::String(hash)) => Ok(DistinctMap::Ordered {
                last: Some(hash.clone()),
            }),
            (DistinctType::Unordered, Element::Array(items)) => {
                let seen = items
                    .iter()
                    .map(|item| {
                        item.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| QueryError::malformed("DistinctMapToken 元素应为字符串"))
                    })
                    .collect::<QueryResult<BTreeSet<String>>>()?;
                Ok(DistinctMap::Unordered { seen })
            }
            (_, other) => Err(QueryError::malformed(format!(
                "DistinctMapToken 与去重类型不符: {}",
                other.kind().name()
            ))),
        }
    }
}

pub struct DistinctStage {
    source: BoxedStage,
    map: DistinctMap,
    current: Option<TryCatch<QueryPage>>,
}

impl DistinctStage {
    /// `continuation` 是本阶段令牌；返回阶段与内层来源令牌
    pub fn parse_continuation(
        distinct_type: DistinctType,
        continuation: Option<&Element>,
    ) -> QueryResult<(DistinctMap, Option<Element>)> {
        match continuation {
            None => Ok((DistinctMap::new(distinct_type)?, None)),
            Some(element) => {
                let token = DistinctContinuationToken::parse(element)?;
                let map = DistinctMap::from_token(distinct_type, &token.distinct_map)?;
                Ok((map, Some(token.source)))
            }
        }
    }

    pub fn new(source: BoxedStage, map: DistinctMap) -> Self {
        Self {
            source,
            map,
            current: None,
        }
    }
}

#[async_trait]
impl QueryPipelineStage for DistinctStage {
    async fn move_next(&mut self, cancellation: &CancellationToken) -> bool {
        if !self.source.move_next(cancellation).await {
            self.current = None;
            return false;
        }
        let page = match self.source.take_current() {
            Some(page) => page,
            None => {
                self.current = None;
                return false;
            }
        };

        let map = &mut self.map;
        self.current = Some(page.try_map(|page| {
            let documents: Vec<Element> = page
                .documents
                .iter()
                .filter(|document| map.add(document))
                .cloned()
                .collect();
            let state = page.state.clone().map(|source| {
                QueryState::new(
                    DistinctContinuationToken {
                        source: source.into_element(),
                        distinct_map: map.to_token(),
                    }
                    .to_element(),
                )
            });
            page.with_documents(documents, state)
        }));
        true
    }

    fn current(&self) -> Option<&TryCatch<QueryPage>> {
        self.current.as_ref()
    }

    fn take_current(&mut self) -> Option<TryCatch<QueryPage>> {
        self.current.take()
    }

    fn name(&self) -> &'static str {
        "Distinct"
    }

    async fn dispose(&mut self) {
        self.source.dispose().await;
    }
}
