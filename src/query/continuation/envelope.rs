//! 顶层版本信封 `{"V": "1.1", "SourceContinuationToken": <el>}`
//!
//! 这是唯一被序列化为字符串、交给调用方的令牌。

use super::ContinuationToken;
use crate::core::error::{QueryError, QueryResult};
use crate::core::value::{required_field, Element};

pub const CURRENT_VERSION: &str = "1.1";

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineContinuationToken {
    pub version: String,
    pub source: Element,
}

impl PipelineContinuationToken {
    pub fn new(source: Element) -> Self {
        Self {
            version: CURRENT_VERSION.to_string(),
            source,
        }
    }

    pub fn to_token_string(&self) -> String {
        self.to_element().to_json_string()
    }

    /// 解析调用方传回的字符串
    pub fn from_token_string(text: &str) -> QueryResult<Self> {
        let element = Element::parse(text).map_err(|e| {
            QueryError::malformed(format!("续传令牌不是有效的 JSON: {}", e))
        })?;
        Self::parse(&element)
    }
}

impl ContinuationToken for PipelineContinuationToken {
    fn to_element(&self) -> Element {
        Element::object([
            ("V", Element::from(self.version.as_str())),
            ("SourceContinuationToken", self.source.clone()),
        ])
    }

    fn parse(element: &Element) -> QueryResult<Self> {
        let version = required_field(element, "V", "pipeline continuation")?
            .as_str()
            .ok_or_else(|| QueryError::malformed("版本号应为字符串"))?;
        if version != CURRENT_VERSION {
            return Err(QueryError::malformed(format!(
                "不支持的续传令牌版本 '{}'，期望 '{}'",
                version, CURRENT_VERSION
            )));
        }
        let source = required_field(element, "SourceContinuationToken", "pipeline continuation")?;
        Ok(Self {
            version: version.to_string(),
            source: source.clone(),
        })
    }
}
