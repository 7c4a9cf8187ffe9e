//! 续传令牌编解码
//!
//! 各阶段的令牌都是 [`Element`] 树；只有最外层的版本信封会被序列化成字符串。
//! 解析严格：缺字段、类型不符、空数组都返回 `MalformedContinuationToken`，
//! 不做任何默认值填充。

pub mod envelope;
pub mod order_by;
pub mod parallel;
pub mod phase;
pub mod wrappers;

use crate::core::error::{QueryError, QueryResult};
use crate::core::try_catch::TryCatch;
use crate::core::value::Element;

pub use envelope::PipelineContinuationToken;
pub use order_by::OrderByContinuationToken;
pub use parallel::ParallelContinuationToken;
pub use phase::{AggregateContinuationToken, GroupByContinuationToken, SourcePhase};
pub use wrappers::{DistinctContinuationToken, SkipContinuationToken, TakeContinuationToken};

/// 可移植续传令牌
pub trait ContinuationToken: Sized {
    fn to_element(&self) -> Element;

    fn parse(element: &Element) -> QueryResult<Self>;

    fn try_parse(element: &Element) -> TryCatch<Self> {
        Self::parse(element).into()
    }
}

/// 解析非空令牌数组
pub fn parse_token_array<T: ContinuationToken>(element: &Element, context: &str) -> QueryResult<Vec<T>> {
    let items = element.as_array().ok_or_else(|| {
        QueryError::malformed(format!(
            "{} 令牌应为数组，实际为 {}",
            context,
            element.kind().name()
        ))
    })?;
    if items.is_empty() {
        return Err(QueryError::malformed(format!("{} 令牌数组不能为空", context)));
    }
    items.iter().map(T::parse).collect()
}

pub fn tokens_to_element<T: ContinuationToken>(tokens: &[T]) -> Element {
    Element::Array(tokens.iter().map(ContinuationToken::to_element).collect())
}

pub(crate) fn expect_u64(element: &Element, field: &str) -> QueryResult<u64> {
    element
        .as_i64()
        .filter(|v| *v >= 0)
        .map(|v| v as u64)
        .ok_or_else(|| {
            QueryError::malformed(format!(
                "字段 '{}' 应为非负整数，实际为 {}",
                field,
                element.kind().name()
            ))
        })
}

pub(crate) fn expect_str<'a>(element: &'a Element, field: &str) -> QueryResult<&'a str> {
    element.as_str().ok_or_else(|| {
        QueryError::malformed(format!(
            "字段 '{}' 应为字符串，实际为 {}",
            field,
            element.kind().name()
        ))
    })
}
