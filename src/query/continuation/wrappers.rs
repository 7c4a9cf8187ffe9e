//! 去重、跳过、截取阶段的令牌：各自的计数/状态加上内层来源令牌

use super::{expect_u64, ContinuationToken};
use crate::core::error::QueryResult;
use crate::core::value::{required_field, Element};

/// `{"SourceToken": <el>, "DistinctMapToken": <el>}`
#[derive(Debug, Clone, PartialEq)]
pub struct DistinctContinuationToken {
    pub source: Element,
    pub distinct_map: Element,
}

impl ContinuationToken for DistinctContinuationToken {
    fn to_element(&self) -> Element {
        Element::object([
            ("SourceToken", self.source.clone()),
            ("DistinctMapToken", self.distinct_map.clone()),
        ])
    }

    fn parse(element: &Element) -> QueryResult<Self> {
        Ok(Self {
            source: required_field(element, "SourceToken", "distinct continuation")?.clone(),
            distinct_map: required_field(element, "DistinctMapToken", "distinct continuation")?
                .clone(),
        })
    }
}

/// `{"SkipCount": n, "SourceToken": <el>}`
#[derive(Debug, Clone, PartialEq)]
pub struct SkipContinuationToken {
    pub skip_count: u64,
    pub source: Element,
}

impl ContinuationToken for SkipContinuationToken {
    fn to_element(&self) -> Element {
        Element::object([
            ("SkipCount", Element::from(self.skip_count)),
            ("SourceToken", self.source.clone()),
        ])
    }

    fn parse(element: &Element) -> QueryResult<Self> {
        Ok(Self {
            skip_count: expect_u64(
                required_field(element, "SkipCount", "skip continuation")?,
                "SkipCount",
            )?,
            source: required_field(element, "SourceToken", "skip continuation")?.clone(),
        })
    }
}

/// `{"TakeCount": n, "SourceToken": <el>}`
#[derive(Debug, Clone, PartialEq)]
pub struct TakeContinuationToken {
    pub take_count: u64,
    pub source: Element,
}

impl ContinuationToken for TakeContinuationToken {
    fn to_element(&self) -> Element {
        Element::object([
            ("TakeCount", Element::from(self.take_count)),
            ("SourceToken", self.source.clone()),
        ])
    }

    fn parse(element: &Element) -> QueryResult<Self> {
        Ok(Self {
            take_count: expect_u64(
                required_field(element, "TakeCount", "take continuation")?,
                "TakeCount",
            )?,
            source: required_field(element, "SourceToken", "take continuation")?.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_take_wire_shape_and_parse() {
        let token = TakeContinuationToken {
            take_count: 4,
            source: Element::from(json!([{"token": null, "range": {"min": "", "max": "FF"}}])),
        };
        let json = token.to_element().to_json();
        assert_eq!(json["TakeCount"], json!(4));
        assert_eq!(TakeContinuationToken::parse(&token.to_element()).ok(), Some(token));
    }

    #[test]
    fn test_negative_skip_count_is_malformed() {
        let element = Element::from(json!({"SkipCount": -2, "SourceToken": []}));
        let err = SkipContinuationToken::parse(&element).expect_err("negative count");
        assert!(err.is_malformed_continuation());
    }

    #[test]
    fn test_distinct_requires_both_fields() {
        let element = Element::from(json!({"SourceToken": []}));
        assert!(DistinctContinuationToken::parse(&element).is_err());
    }
}
